//! Daemon error types.

use std::io;

use micrelay_common::ConfigError;
use thiserror::Error;

/// Failure starting a capture session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("capture command is empty")]
    EmptyCommand,
    #[error("failed to spawn capture command {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("capture command has no stdout")]
    NoStdout,
    #[error("invalid capture config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Fatal daemon errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
