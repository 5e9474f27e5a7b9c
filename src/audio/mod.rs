//! # Audio Format Module
//!
//! Conversion between the browser's normalized float samples and the PCM16
//! payload the remote speech service consumes.
//!
//! ## Audio Format (remote leg):
//! - **Bit Depth**: 16-bit PCM
//! - **Encoding**: Little-endian signed integers, standard base64 on the wire

pub mod codec;    // float <-> PCM16 <-> base64

pub use codec::encode_for_transport;
