//! # Remote Speech Service Event Protocol
//!
//! JSON events exchanged with the realtime speech API over its socket.
//!
//! ## Outbound (we send):
//! - `session.update`: once per connection, sets the turn-detection policy
//! - `input_audio_buffer.append`: one base64 PCM16 chunk
//! - `control.stop`: at teardown
//!
//! ## Inbound (we read):
//! Any event envelope. Only `response.audio.delta` carries audio we forward;
//! everything else is classified as `Other` and dropped by the reader.

use serde::{Deserialize, Serialize};

/// Event type carrying an audio output increment.
pub const AUDIO_DELTA_EVENT: &str = "response.audio.delta";

/// Commands sent to the remote service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RemoteCommand {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    #[serde(rename = "control.stop")]
    ControlStop,
}

impl RemoteCommand {
    /// Configuration event for a fresh connection.
    pub fn configure(turn_detection: &TurnDetection) -> Self {
        RemoteCommand::SessionUpdate {
            session: SessionSettings {
                turn_detection: turn_detection.clone(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSettings {
    pub turn_detection: TurnDetection,
}

/// Server-side end-pointing policy.
///
/// ## Fields:
/// - **kind**: detector type, e.g. `semantic_vad`
/// - **eagerness**: how quickly a pause counts as end of turn (`low`, `medium`, `high`, `auto`)
/// - **create_response**: whether the service answers automatically at end of turn
/// - **interrupt_response**: whether user speech cuts off an in-progress answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub eagerness: String,
    pub create_response: bool,
    pub interrupt_response: bool,
}

/// Decoded inbound event, reduced to what the relay cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// Base64 PCM16 audio increment
    AudioDelta(String),
    /// Any other event kind, by its `type`
    Other(String),
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
}

impl RemoteEvent {
    /// Classify one inbound text frame.
    ///
    /// An audio delta event without a `delta` payload is treated as `Other`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEvent = serde_json::from_str(text)?;
        if raw.kind == AUDIO_DELTA_EVENT {
            if let Some(delta) = raw.delta {
                return Ok(RemoteEvent::AudioDelta(delta));
            }
        }
        Ok(RemoteEvent::Other(raw.kind))
    }
}
