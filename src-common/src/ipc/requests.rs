//! Client-to-daemon control messages.

use serde_json::json;

use super::{Envelope, ProtocolError};
use crate::types::MicConfig;

/// Control request sent from a client to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Start a capture session, optionally replacing the stored config first
    StartListening(Option<MicConfig>),
    /// Stop the active capture session
    StopListening,
    /// Replace the stored config (ignored while a session is active)
    SetConfig(MicConfig),
    /// Ask the daemon to echo its current state
    RequestState,
    /// Liveness probe
    Ping,
}

impl ControlMessage {
    /// The `request` string this message travels under, if any.
    pub fn request_name(&self) -> &'static str {
        match self {
            ControlMessage::StartListening(_) => "mic-listen",
            ControlMessage::StopListening => "mic-stop",
            ControlMessage::SetConfig(_) => "mic-config",
            ControlMessage::RequestState => "mic-state",
            ControlMessage::Ping => "",
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> String {
        let value = match self {
            ControlMessage::Ping => json!({ "type": "ping" }),
            ControlMessage::StartListening(Some(config)) | ControlMessage::SetConfig(config) => {
                json!({
                    "type": "control",
                    "request": self.request_name(),
                    "payload": config,
                })
            }
            _ => json!({
                "type": "control",
                "request": self.request_name(),
            }),
        };
        value.to_string()
    }

    /// Decode a text frame received by the daemon.
    ///
    /// Returns `Ok(None)` for envelopes with an unknown `type` or `request`;
    /// those are ignored rather than treated as errors.
    pub fn from_json(text: &str) -> Result<Option<Self>, ProtocolError> {
        let envelope = Envelope::parse(text)?;

        match envelope.kind.as_str() {
            "ping" => Ok(Some(ControlMessage::Ping)),
            "control" => match envelope.request.as_str() {
                "mic-listen" => {
                    let config = envelope.payload().map(parse_config).transpose()?;
                    Ok(Some(ControlMessage::StartListening(config)))
                }
                "mic-stop" => Ok(Some(ControlMessage::StopListening)),
                "mic-config" => {
                    let payload = envelope
                        .payload()
                        .ok_or_else(|| ProtocolError::InvalidConfig("missing payload".into()))?;
                    Ok(Some(ControlMessage::SetConfig(parse_config(payload)?)))
                }
                "mic-state" => Ok(Some(ControlMessage::RequestState)),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

fn parse_config(payload: &serde_json::Value) -> Result<MicConfig, ProtocolError> {
    let config: MicConfig = serde_json::from_value(payload.clone())
        .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
    config
        .validate()
        .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
    Ok(config)
}
