//! Audio capture from microphone
//!
//! [`MicrophoneSource`] wraps the default `cpal` input device; the
//! [`CapturePipeline`] turns its fixed-size blocks into encoded wire frames.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::codec::encode_frame;
use super::device::{AudioInputSource, BlockReceiver, BlockSender};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per capture block (256 ms at 16kHz)
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Captures audio from the default input device
#[derive(Default)]
pub struct MicrophoneSource {
    device: Option<Device>,
    config: Option<StreamConfig>,
    stream: Option<Stream>,
}

impl MicrophoneSource {
    /// Create an unopened microphone source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioInputSource for MicrophoneSource {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn open(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::PermissionDenied("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::PermissionDenied(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "microphone acquired"
        );

        self.device = Some(device);
        self.config = Some(config);
        Ok(())
    }

    fn start(&mut self, block_size: usize, blocks: BlockSender) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (Some(device), Some(config)) = (self.device.as_ref(), self.config.as_ref()) else {
            return Err(Error::Audio("microphone not acquired".to_string()));
        };

        let error_tx = blocks.clone();
        let mut pending: Vec<f32> = Vec::with_capacity(block_size * 2);

        let stream = device
            .build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    pending.extend_from_slice(data);
                    while pending.len() >= block_size {
                        let block: Vec<f32> = pending.drain(..block_size).collect();
                        if blocks.send(Ok(block)).is_err() {
                            pending.clear();
                            break;
                        }
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    let _ = error_tx.send(Err(Error::Audio(err.to_string())));
                },
                None,
            )
            .map_err(|e| match e {
                BuildStreamError::DeviceNotAvailable => Error::PermissionDenied(e.to_string()),
                other => Error::Audio(other.to_string()),
            })?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!(block_size, "audio capture started");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
        if self.device.take().is_some() {
            self.config = None;
            tracing::debug!("microphone released");
        }
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }
}

/// Pulls blocks from an input source and encodes them as PCM16 frames
pub struct CapturePipeline {
    source: Box<dyn AudioInputSource>,
    block_size: usize,
    blocks: Option<BlockReceiver>,
    frames: u64,
}

impl CapturePipeline {
    /// Create a pipeline with the standard 4096-sample block
    #[must_use]
    pub fn new(source: Box<dyn AudioInputSource>) -> Self {
        Self::with_block_size(source, CAPTURE_BLOCK_SIZE)
    }

    /// Create a pipeline with a custom block size
    #[must_use]
    pub fn with_block_size(source: Box<dyn AudioInputSource>, block_size: usize) -> Self {
        Self {
            source,
            block_size: block_size.max(1),
            blocks: None,
            frames: 0,
        }
    }

    /// Acquire the microphone without starting the stream
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` if the device is refused
    pub fn acquire(&mut self) -> Result<()> {
        if self.source.is_open() {
            return Ok(());
        }
        self.source.open()
    }

    /// Start delivering frames. No-op while already running.
    ///
    /// # Errors
    ///
    /// Returns error if the device stream cannot be started
    pub fn start(&mut self) -> Result<()> {
        if self.blocks.is_some() {
            return Ok(());
        }

        self.acquire()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.source.start(self.block_size, tx)?;
        self.blocks = Some(rx);
        self.frames = 0;

        tracing::debug!(
            block_size = self.block_size,
            sample_rate = self.source.sample_rate(),
            "capture pipeline started"
        );
        Ok(())
    }

    /// Wait for the next encoded frame
    ///
    /// Never resolves while the pipeline is stopped. Yields `None` if the
    /// source hung up while running.
    pub async fn next_frame(&mut self) -> Option<Result<Vec<u8>>> {
        let Some(blocks) = self.blocks.as_mut() else {
            return std::future::pending().await;
        };

        let block = blocks.recv().await?;
        Some(block.map(|samples| {
            self.frames += 1;
            encode_frame(&samples)
        }))
    }

    /// Stop the stream and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        let was_running = self.blocks.take().is_some();
        if was_running || self.source.is_open() {
            self.source.close();
            tracing::debug!(frames = self.frames, "capture pipeline stopped");
        }
    }

    /// Whether frames are currently being delivered
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.blocks.is_some()
    }

    /// Whether the microphone is held
    #[must_use]
    pub fn holds_device(&self) -> bool {
        self.source.is_open()
    }

    /// Frames encoded since the last start
    #[must_use]
    pub const fn frames_captured(&self) -> u64 {
        self.frames
    }
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for pair in encode_frame(samples).chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
