//! Error types for the capture client.

use micrelay_common::ConfigError;
use thiserror::Error;

/// Errors returned by capture backends and the backend manager.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to the capture daemon")]
    NotConnected,
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid capture configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("capture backend has shut down")]
    Closed,
}

/// Errors raised while acquiring or running local microphone capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,
    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to launch recorder `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("recorder command is empty")]
    EmptyCommand,
    #[error("capture thread exited before the stream started")]
    ThreadExited,
    #[error("no capture strategy could start: {0}")]
    Exhausted(String),
}
