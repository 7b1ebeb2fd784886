//! Daemon-to-client messages.

use serde_json::json;

use super::{Envelope, ProtocolError};
use crate::types::MicState;

/// Text message sent by the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Authoritative microphone state
    State(MicState),
    /// Reply to a ping
    Pong,
}

impl ServerMessage {
    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> String {
        let value = match self {
            ServerMessage::State(state) => json!({
                "type": "state",
                "request": "mic",
                "payload": state,
            }),
            ServerMessage::Pong => json!({
                "type": "pong",
                "request": "",
                "payload": null,
            }),
        };
        value.to_string()
    }

    /// Decode a text frame received by a client.
    ///
    /// Returns `Ok(None)` for envelopes this client does not understand.
    pub fn from_json(text: &str) -> Result<Option<Self>, ProtocolError> {
        let envelope = Envelope::parse(text)?;

        match (envelope.kind.as_str(), envelope.request.as_str()) {
            ("state", "mic") => {
                let state: MicState = serde_json::from_value(envelope.payload)
                    .map_err(ProtocolError::InvalidState)?;
                Ok(Some(ServerMessage::State(state)))
            }
            ("pong", _) => Ok(Some(ServerMessage::Pong)),
            _ => Ok(None),
        }
    }
}
