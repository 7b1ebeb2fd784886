//! micrelay capture daemon.
//!
//! Records from a local capture command on demand and streams the audio as
//! WAV chunks to the WebSocket client that asked for it, while every
//! connected client sees the same microphone state.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod server;
pub mod session;

pub use config::DaemonConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use error::{DaemonError, SessionError};
pub use server::run_server;
pub use session::{CaptureSession, SessionOptions};
