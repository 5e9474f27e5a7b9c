//! Browser-facing message formats.
//!
//! ## Client → Server:
//! - `{"audio": [0.1, -0.2, ...]}`: normalized float samples
//! - `{"type": "end_session"}`: ask the server to end the session
//!
//! ## Server → Client:
//! - `{"type": "session_id", "session_id": "..."}`: first message on connect
//! - `{"type": "audio_chunk", "audio": "<base64 PCM16>"}`: remote audio
//! - `{"type": "session_end"}`: the session is over
//! - `{"type": "error", "message": "..."}`: session could not be set up

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};

/// A usable client request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Audio(Vec<f32>),
    EndSession,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawClientMessage {
    Audio { audio: Vec<f32> },
    Control {
        #[serde(rename = "type")]
        kind: String,
    },
}

impl ClientRequest {
    /// Parse one client text message.
    ///
    /// Anything that is neither an audio message nor a known control message
    /// is `MalformedMessage`.
    pub fn parse(text: &str) -> RelayResult<Self> {
        let raw: RawClientMessage = serde_json::from_str(text)
            .map_err(|e| RelayError::MalformedMessage(format!("unrecognized client message: {}", e)))?;

        match raw {
            RawClientMessage::Audio { audio } => Ok(ClientRequest::Audio(audio)),
            RawClientMessage::Control { kind } if kind == "end_session" => Ok(ClientRequest::EndSession),
            RawClientMessage::Control { kind } => Err(RelayError::MalformedMessage(format!(
                "unsupported message type '{}'",
                kind
            ))),
        }
    }
}

/// Messages sent to the browser.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionId { session_id: String },
    AudioChunk { audio: String },
    SessionEnd,
    Error { message: String },
}

impl ServerMessage {
    pub fn to_json(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
