//! Wire protocol between clients and the capture daemon.
//!
//! One WebSocket connection carries two kinds of frames: text frames hold the
//! JSON envelopes defined here, binary frames hold framed audio chunks with no
//! further envelope.
//!
//! Every text envelope has the shape `{"type", "request", "payload"}`:
//! clients send `control` and `ping`, the daemon sends `state` and `pong`.

mod requests;
mod responses;

pub use requests::ControlMessage;
pub use responses::ServerMessage;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while decoding protocol envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a JSON envelope at all
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The envelope parsed but its configuration payload did not
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// The envelope parsed but its state payload did not
    #[error("invalid state payload: {0}")]
    InvalidState(#[source] serde_json::Error),
}

/// Raw envelope as it arrives on the wire, before dispatch on `type`.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    request: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Envelope {
    fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    /// Payload, treating an explicit `null` the same as an absent field.
    fn payload(&self) -> Option<&serde_json::Value> {
        if self.payload.is_null() {
            None
        } else {
            Some(&self.payload)
        }
    }
}
