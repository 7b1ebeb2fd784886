//! micrelay Common Library
//!
//! Shared types, WAV chunk framing and the wire protocol spoken between the
//! micrelay client library, the CLI and the capture daemon.

pub mod config;
pub mod ipc;
pub mod logging;
pub mod types;
pub mod wav;

pub use config::ClientConfig;
pub use types::*;

/// Default TCP port the capture daemon listens on.
pub const DEFAULT_PORT: u16 = 8890;

/// Default daemon URL used when nothing else is configured.
pub fn default_daemon_url() -> String {
    format!("ws://127.0.0.1:{}/", DEFAULT_PORT)
}
