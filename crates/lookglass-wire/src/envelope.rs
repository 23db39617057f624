use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::path::Path;

/// One named event with its sanitized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub event_name: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleaned: Vec<Path>,
}

/// Every message that crosses a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Envelope {
    Event(EventFrame),
    ManyEvents {
        events: Vec<EventFrame>,
    },
    Call {
        name: String,
        args: Value,
        callback: u64,
    },
    Inspect {
        id: String,
        path: Path,
        callback: u64,
    },
    Callback {
        id: u64,
        args: Vec<Value>,
    },
    /// Asks the peer to hold its batched queue until `Resume`.
    Pause,
    Resume,
}

impl Envelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Event(_) => "event",
            Envelope::ManyEvents { .. } => "many-events",
            Envelope::Call { .. } => "call",
            Envelope::Inspect { .. } => "inspect",
            Envelope::Callback { .. } => "callback",
            Envelope::Pause => "pause",
            Envelope::Resume => "resume",
        }
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

pub type WireResult<T> = Result<T, WireError>;

pub fn encode_envelope(envelope: &Envelope) -> WireResult<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(WireError::Encode)
}

pub fn decode_envelope(bytes: &[u8]) -> WireResult<Envelope> {
    serde_json::from_slice(bytes).map_err(WireError::Decode)
}
