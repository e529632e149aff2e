//! Audio playback to speakers
//!
//! [`SpeakerSink`] mixes scheduled buffers into the default `cpal` output
//! device against a sample-counting clock. [`PlaybackScheduler`] places
//! incoming speech chunks back-to-back on that clock and can cancel them all
//! at once on barge-in.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};

use super::codec::decode_frame_base64;
use super::device::{AudioOutputSink, PlaybackHandle};
use crate::{Error, Result};

/// Sample rate of synthesized speech from the live service
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Input block size for the fallback resampler (20ms at 24kHz)
const RESAMPLE_BLOCK: usize = 480;

/// One buffer queued on the mixer
struct Voice {
    id: u64,
    start_frame: u64,
    samples: Vec<f32>,
}

/// Sums active voices into the device buffer and counts rendered frames
#[derive(Default)]
struct Mixer {
    rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    #[allow(clippy::cast_possible_truncation)]
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);

        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let position = self.rendered + i as u64;
            let mut sample = 0.0_f32;

            for voice in &self.voices {
                if position >= voice.start_frame {
                    let offset = (position - voice.start_frame) as usize;
                    if let Some(s) = voice.samples.get(offset) {
                        sample += s;
                    }
                }
            }

            frame.fill(sample.clamp(-1.0, 1.0));
        }

        self.rendered += (out.len() / channels) as u64;
        let rendered = self.rendered;
        self.voices
            .retain(|v| v.start_frame + v.samples.len() as u64 > rendered);
    }
}

/// Plays scheduled buffers on the default output device
pub struct SpeakerSink {
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<Stream>,
    sample_rate: u32,
    next_id: u64,
}

impl Default for SpeakerSink {
    fn default() -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::default())),
            stream: None,
            sample_rate: PLAYBACK_SAMPLE_RATE,
            next_id: 0,
        }
    }
}

impl SpeakerSink {
    /// Create an unopened speaker sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a 24kHz config (mono, then stereo) or fall back to the device default
    fn select_config(device: &cpal::Device) -> Result<StreamConfig> {
        let at_playback_rate = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        };

        if let Some(supported) = at_playback_rate(1).or_else(|| at_playback_rate(2)) {
            return Ok(supported
                .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
                .config());
        }

        // Fallback: native rate, chunks get resampled by the scheduler
        device
            .default_output_config()
            .map(|c| c.config())
            .map_err(|e| Error::Audio(format!("no suitable output config found: {e}")))
    }
}

impl AudioOutputSink for SpeakerSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let config = Self::select_config(&device)?;
        let channels = usize::from(config.channels);

        if let Ok(mut mixer) = self.mixer.lock() {
            *mixer = Mixer::default();
        }

        let mixer = Arc::clone(&self.mixer);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if let Ok(mut mixer) = mixer.lock() {
                        mixer.render(data, channels);
                    } else {
                        data.fill(0.0);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        self.sample_rate = config.sample_rate.0;
        self.stream = Some(stream);

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate = self.sample_rate,
            channels,
            "audio playback initialized"
        );
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> f64 {
        let rendered = self.mixer.lock().map(|m| m.rendered).unwrap_or(0);
        rendered as f64 / f64::from(self.sample_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<PlaybackHandle> {
        if self.stream.is_none() {
            return Err(Error::Audio("output device not open".to_string()));
        }

        self.next_id += 1;
        let id = self.next_id;
        let start_frame = (start_at.max(0.0) * f64::from(self.sample_rate)).round() as u64;

        self.mixer
            .lock()
            .map_err(|_| Error::Audio("playback mixer poisoned".to_string()))?
            .voices
            .push(Voice {
                id,
                start_frame,
                samples,
            });

        Ok(PlaybackHandle(id))
    }

    fn stop(&mut self, handle: PlaybackHandle) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.voices.retain(|v| v.id != handle.0);
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            if let Ok(mut mixer) = self.mixer.lock() {
                *mixer = Mixer::default();
            }
            tracing::debug!("audio playback closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// A buffer placed on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    /// Sink handle used to cancel the buffer
    pub handle: PlaybackHandle,
    /// Output clock time playback begins
    pub start_time: f64,
    /// Length in seconds
    pub duration: f64,
}

impl ScheduledBuffer {
    /// Output clock time playback ends
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Schedules speech chunks gaplessly in arrival order
///
/// Chunks are never reordered; the transport is assumed to deliver them in
/// generation order.
pub struct PlaybackScheduler {
    sink: Box<dyn AudioOutputSink>,
    source_rate: u32,
    next_start_time: f64,
    registry: Vec<ScheduledBuffer>,
    resampler: Option<StreamResampler>,
    dropped: u64,
}

impl PlaybackScheduler {
    /// Create a scheduler for 24kHz speech chunks
    #[must_use]
    pub fn new(sink: Box<dyn AudioOutputSink>) -> Self {
        Self::with_source_rate(sink, PLAYBACK_SAMPLE_RATE)
    }

    /// Create a scheduler for chunks at `source_rate`
    #[must_use]
    pub fn with_source_rate(sink: Box<dyn AudioOutputSink>, source_rate: u32) -> Self {
        Self {
            sink,
            source_rate,
            next_start_time: 0.0,
            registry: Vec::new(),
            resampler: None,
            dropped: 0,
        }
    }

    /// Open the output device and its clock
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    pub fn open(&mut self) -> Result<()> {
        if self.sink.is_open() {
            return Ok(());
        }
        self.sink.open()?;
        self.next_start_time = 0.0;
        self.resampler = None;
        Ok(())
    }

    /// Decode a base64 PCM16 chunk and schedule it
    ///
    /// Malformed payloads are logged and dropped without touching the cursor
    /// or registry. Chunks arriving while the sink is closed are ignored.
    ///
    /// # Errors
    ///
    /// Returns error only for device failures, which should end the session
    pub fn on_audio_chunk(&mut self, payload: &str) -> Result<Option<ScheduledBuffer>> {
        if !self.sink.is_open() {
            tracing::debug!("ignoring audio chunk: output closed");
            return Ok(None);
        }

        let samples = match decode_frame_base64(payload) {
            Ok(samples) => samples,
            Err(e) => {
                self.dropped += 1;
                tracing::warn!(error = %e, dropped = self.dropped, "dropping malformed audio chunk");
                return Ok(None);
            }
        };

        self.schedule_samples(samples)
    }

    /// Schedule already-decoded samples at the source rate
    ///
    /// When the sink runs at another rate the chunk goes through one
    /// resampler that persists across chunks. The filter holds back a short
    /// tail until more audio or [`Self::finish_turn`] arrives, so a chunk
    /// may schedule fewer samples than it carried, or none at all.
    ///
    /// # Errors
    ///
    /// Returns error if resampling or the sink fails
    pub fn schedule_samples(&mut self, samples: Vec<f32>) -> Result<Option<ScheduledBuffer>> {
        if samples.is_empty() {
            return Ok(None);
        }

        self.reap();

        let rate = self.sink.sample_rate();
        let samples = if rate == self.source_rate {
            samples
        } else {
            self.resampler_for(rate)?.push(&samples)?
        };
        self.place(samples, rate)
    }

    /// Schedule whatever the resampler still holds for the current turn
    ///
    /// A no-op when the sink runs at the source rate.
    ///
    /// # Errors
    ///
    /// Returns error if resampling or the sink fails
    pub fn finish_turn(&mut self) -> Result<Option<ScheduledBuffer>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(None);
        };
        let tail = resampler.flush()?;
        if !self.sink.is_open() {
            return Ok(None);
        }
        let rate = self.sink.sample_rate();
        self.place(tail, rate)
    }

    fn resampler_for(&mut self, to_rate: u32) -> Result<&mut StreamResampler> {
        let stale = self
            .resampler
            .as_ref()
            .is_none_or(|r| r.from_rate != self.source_rate || r.to_rate != to_rate);
        if stale {
            tracing::debug!(from = self.source_rate, to = to_rate, "starting playback resampler");
            self.resampler = Some(StreamResampler::new(self.source_rate, to_rate)?);
        }
        self.resampler
            .as_mut()
            .ok_or_else(|| Error::Audio("resampler unavailable".to_string()))
    }

    /// Queue output-rate samples at the cursor
    #[allow(clippy::cast_precision_loss)]
    fn place(&mut self, samples: Vec<f32>, rate: u32) -> Result<Option<ScheduledBuffer>> {
        if samples.is_empty() {
            return Ok(None);
        }

        let duration = samples.len() as f64 / f64::from(rate);
        let start_time = self.next_start_time.max(self.sink.now());
        let handle = self.sink.schedule(samples, start_time)?;

        let buffer = ScheduledBuffer {
            handle,
            start_time,
            duration,
        };
        self.registry.push(buffer);
        self.next_start_time = buffer.end_time();

        tracing::trace!(
            start_time,
            duration,
            queued = self.registry.len(),
            "audio chunk scheduled"
        );
        Ok(Some(buffer))
    }

    /// Stop every scheduled buffer and reset the cursor to zero
    ///
    /// Returns the number of buffers stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.registry.len();
        for buffer in self.registry.drain(..) {
            self.sink.stop(buffer.handle);
        }
        self.next_start_time = 0.0;
        self.resampler = None;

        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Deregister buffers that finished playing
    ///
    /// Returns the number of buffers removed.
    pub fn reap(&mut self) -> usize {
        let now = self.sink.now();
        let before = self.registry.len();
        self.registry.retain(|b| b.end_time() > now);
        before - self.registry.len()
    }

    /// Interrupt playback and release the output device. Idempotent.
    pub fn close(&mut self) {
        self.interrupt();
        if self.sink.is_open() {
            self.sink.close();
        }
    }

    /// Next free instant on the output clock
    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Buffers scheduled or playing, in scheduling order
    #[must_use]
    pub fn scheduled(&self) -> &[ScheduledBuffer] {
        &self.registry
    }

    /// Whether every scheduled buffer has finished
    pub fn is_drained(&mut self) -> bool {
        self.reap();
        self.registry.is_empty()
    }

    /// Current output clock time
    #[must_use]
    pub fn now(&self) -> f64 {
        self.sink.now()
    }

    /// Whether the output device is held
    #[must_use]
    pub fn holds_device(&self) -> bool {
        self.sink.is_open()
    }

    /// Malformed chunks dropped so far
    #[must_use]
    pub const fn dropped_chunks(&self) -> u64 {
        self.dropped
    }
}

/// Mono resampler carried across the chunks of one turn
///
/// Blocks are filtered against their neighbours so chunk boundaries carry
/// no edge silence. The filter delay is trimmed once at the start, and the
/// output of a turn is exactly `input * to / from` samples once flushed.
struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
    skip: usize,
    consumed: u64,
    produced: u64,
}

impl StreamResampler {
    fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner =
            FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_BLOCK, 1, 1)
                .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;
        let skip = inner.output_delay();
        Ok(Self {
            from_rate,
            to_rate,
            inner,
            pending: Vec::new(),
            skip,
            consumed: 0,
            produced: 0,
        })
    }

    /// Feed a chunk and return every output sample the filter has settled
    fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        self.consumed += samples.len() as u64;

        let mut out = Vec::new();
        loop {
            let need = self.inner.input_frames_next();
            if self.pending.len() < need {
                break;
            }
            let block: Vec<f32> = self.pending.drain(..need).collect();
            self.process_block(&block, &mut out)?;
        }
        Ok(self.emit(out))
    }

    /// Drain the held-back tail with silence and start a fresh stream
    fn flush(&mut self) -> Result<Vec<f32>> {
        if self.consumed == 0 {
            return Ok(Vec::new());
        }

        let owed = self.expected_total().saturating_sub(self.produced);
        let mut out = Vec::new();
        while (out.len() as u64) < self.skip as u64 + owed {
            let mut block: Vec<f32> = self.pending.drain(..).collect();
            block.resize(self.inner.input_frames_next(), 0.0);
            self.process_block(&block, &mut out)?;
        }
        let tail = self.emit(out);

        *self = Self::new(self.from_rate, self.to_rate)?;
        Ok(tail)
    }

    fn process_block(&mut self, block: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let result = self
            .inner
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        out.extend_from_slice(&result[0]);
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn emit(&mut self, mut out: Vec<f32>) -> Vec<f32> {
        let skipped = self.skip.min(out.len());
        out.drain(..skipped);
        self.skip -= skipped;

        let owed = self.expected_total().saturating_sub(self.produced);
        out.truncate(owed as usize);
        self.produced += out.len() as u64;
        out
    }

    /// Output length owed for the input consumed so far, rounded to nearest
    fn expected_total(&self) -> u64 {
        let from = u64::from(self.from_rate);
        (self.consumed * u64::from(self.to_rate) + from / 2) / from
    }
}
