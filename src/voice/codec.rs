//! PCM16 frame codec
//!
//! Converts between `f32` samples in `[-1.0, 1.0]` and the little-endian
//! 16-bit signed PCM the live service speaks, plus the base64 wrapping used
//! on the JSON control channel.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{Error, Result};

/// Full-scale factor between float samples and PCM16
const PCM_SCALE: f32 = 32768.0;

/// Encode float samples as little-endian PCM16 bytes
///
/// Samples are clamped to `[-1.0, 1.0]`, scaled by 32768, rounded and
/// saturated to the `i16` range, so `1.0` maps to `32767`.
#[must_use]
pub fn encode_frame(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // `as` saturates and maps NaN to 0
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample.clamp(-1.0, 1.0) * PCM_SCALE).round() as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode little-endian PCM16 bytes into float samples
///
/// # Errors
///
/// Returns `Error::Decode` if the payload has an odd number of bytes
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM_SCALE)
        .collect())
}

/// Base64-encode a wire payload (standard alphabet, padded)
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Base64-decode a wire payload
///
/// # Errors
///
/// Returns `Error::Decode` for malformed input
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(payload.trim())
        .map_err(|e| Error::Decode(e.to_string()))
}

/// Encode samples straight to the base64 text sent over the control channel
#[must_use]
pub fn encode_frame_base64(samples: &[f32]) -> String {
    encode_base64(&encode_frame(samples))
}

/// Decode base64 PCM16 text into float samples
///
/// # Errors
///
/// Returns `Error::Decode` if the base64 or PCM framing is malformed
pub fn decode_frame_base64(payload: &str) -> Result<Vec<f32>> {
    decode_frame(&decode_base64(payload)?)
}
