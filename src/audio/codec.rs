//! # PCM16 Sample Codec
//!
//! Browsers hand us normalized `f32` samples; the remote speech service wants
//! 16-bit signed little-endian PCM, base64 encoded inside a JSON envelope.
//!
//! ## Conversion rules:
//! - Each sample is clamped to `[-1.0, 1.0]` (NaN becomes silence)
//! - Scaled by `i16::MAX` (32767) and truncated toward zero
//! - Packed little-endian, two bytes per sample, in input order
//!
//! Because the scale is the positive maximum, `-1.0` maps to `-32767`;
//! `-32768` is never produced.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{ByteOrder, LittleEndian};

/// Scale factor between normalized floats and PCM16.
pub const PCM16_SCALE: f64 = i16::MAX as f64;

/// Convert one normalized sample to PCM16.
pub fn sample_to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let clamped = sample.clamp(-1.0, 1.0) as f64;
    // `as` truncates toward zero
    (clamped * PCM16_SCALE) as i16
}

/// Encode normalized samples as little-endian PCM16 bytes.
///
/// Pure and deterministic; never fails. An empty slice gives an empty buffer.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let pcm: Vec<i16> = samples.iter().map(|&s| sample_to_pcm16(s)).collect();
    let mut bytes = vec![0u8; pcm.len() * 2];
    LittleEndian::write_i16_into(&pcm, &mut bytes);
    bytes
}

/// Standard base64 of the byte payload, for embedding in JSON text.
pub fn to_transport_text(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Samples straight to the text form sent in `input_audio_buffer.append`.
pub fn encode_for_transport(samples: &[f32]) -> String {
    to_transport_text(&encode_pcm16(samples))
}
