//! Voice processing module
//!
//! Handles the PCM16 wire codec, microphone capture and gapless playback
//! scheduling for the live session.

mod capture;
mod codec;
mod device;
mod playback;

pub use capture::{
    CAPTURE_BLOCK_SIZE, CapturePipeline, MicrophoneSource, SAMPLE_RATE, samples_to_wav,
};
pub use codec::{
    decode_base64, decode_frame, decode_frame_base64, encode_base64, encode_frame,
    encode_frame_base64,
};
pub use device::{AudioInputSource, AudioOutputSink, BlockReceiver, BlockSender, PlaybackHandle};
pub use playback::{PLAYBACK_SAMPLE_RATE, PlaybackScheduler, ScheduledBuffer, SpeakerSink};
