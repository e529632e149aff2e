//! Audio device capabilities
//!
//! The session and scheduler only see these two traits, so they run the same
//! against real `cpal` devices and against deterministic fakes.

use tokio::sync::mpsc;

use crate::Result;

/// Channel carrying fixed-size sample blocks from an input source
///
/// An `Err` item reports a device failure; the capture pipeline funnels it
/// into session teardown.
pub type BlockSender = mpsc::UnboundedSender<Result<Vec<f32>>>;

/// Receiving end of a [`BlockSender`]
pub type BlockReceiver = mpsc::UnboundedReceiver<Result<Vec<f32>>>;

/// A microphone-like source of mono `f32` samples
pub trait AudioInputSource {
    /// Sample rate of delivered blocks in Hz
    fn sample_rate(&self) -> u32;

    /// Acquire exclusive access to the device
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` if the device is refused or absent
    fn open(&mut self) -> Result<()>;

    /// Begin delivering blocks of exactly `block_size` samples
    ///
    /// The device callback must never block; blocks are pushed into `blocks`.
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be started
    fn start(&mut self, block_size: usize, blocks: BlockSender) -> Result<()>;

    /// Stop the stream and release the device. Safe to call repeatedly.
    fn close(&mut self);

    /// Whether the device is currently held
    fn is_open(&self) -> bool;
}

/// Identifies one scheduled buffer on an output sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackHandle(pub u64);

/// A speaker-like sink with its own monotonic clock
pub trait AudioOutputSink {
    /// Sample rate the sink renders at in Hz
    fn sample_rate(&self) -> u32;

    /// Acquire the output device and start its clock
    ///
    /// # Errors
    ///
    /// Returns error if no output device can be opened
    fn open(&mut self) -> Result<()>;

    /// Current output clock time in seconds
    fn now(&self) -> f64;

    /// Schedule `samples` (at [`Self::sample_rate`]) to start at `start_at`
    ///
    /// # Errors
    ///
    /// Returns error if the sink is closed or rejects the buffer
    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<PlaybackHandle>;

    /// Stop one scheduled or playing buffer immediately
    fn stop(&mut self, handle: PlaybackHandle);

    /// Stop everything and release the device. Safe to call repeatedly.
    fn close(&mut self);

    /// Whether the device is currently held
    fn is_open(&self) -> bool;
}
