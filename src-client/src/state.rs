//! Capture status state machine and state snapshots.

use std::fmt;
use std::sync::Arc;

use micrelay_common::wav::{self, WavError, WavHeader};
use micrelay_common::CaptureConfig;
use serde::Serialize;

/// Which capture source is currently serving the application.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Network,
    Local,
    #[default]
    Unset,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Network => "network",
            BackendKind::Local => "local",
            BackendKind::Unset => "unset",
        })
    }
}

/// Connection/capture status shared by both backends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Listening,
    Error,
}

/// Inputs to the status state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Begin opening the source
    Open,
    /// Source opened successfully
    Opened,
    /// Capture started
    Listen,
    /// Capture stopped
    Unlisten,
    /// Any failure while opening or running
    Fail,
    /// Scheduled recovery fired
    Retry,
    /// Explicit shutdown or cleanup
    Close,
}

impl CaptureStatus {
    /// Apply `event`, returning the next status or `None` if the event is not
    /// valid in this status.
    pub fn on(self, event: StatusEvent) -> Option<CaptureStatus> {
        use CaptureStatus::*;
        use StatusEvent::*;

        match (self, event) {
            (_, Close) => Some(Disconnected),
            (Disconnected, Open) => Some(Connecting),
            (Connecting, Opened) => Some(Connected),
            (Connected, Listen) => Some(Listening),
            (Listening, Unlisten) => Some(Connected),
            (Connecting | Connected | Listening, Fail) => Some(Error),
            (Error, Retry) => Some(Connecting),
            _ => None,
        }
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureStatus::Disconnected => "disconnected",
            CaptureStatus::Connecting => "connecting",
            CaptureStatus::Connected => "connected",
            CaptureStatus::Listening => "listening",
            CaptureStatus::Error => "error",
        })
    }
}

/// Immutable snapshot of a backend's state, handed to state subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureState {
    pub backend: BackendKind,
    pub status: CaptureStatus,
    pub error: String,
    pub chunk_count: u64,
    pub byte_count: u64,
    pub config: Option<CaptureConfig>,
}

impl CaptureState {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            status: CaptureStatus::Disconnected,
            error: String::new(),
            chunk_count: 0,
            byte_count: 0,
            config: None,
        }
    }

    /// Apply a status event. Returns `false` and leaves the snapshot untouched
    /// when the event is not valid in the current status.
    pub fn apply(&mut self, event: StatusEvent) -> bool {
        match self.status.on(event) {
            Some(next) => {
                if next == CaptureStatus::Listening && self.status != CaptureStatus::Listening {
                    self.reset_counters();
                }
                self.status = next;
                true
            }
            None => false,
        }
    }

    pub fn reset_counters(&mut self) {
        self.chunk_count = 0;
        self.byte_count = 0;
    }

    pub fn record_chunk(&mut self, chunk: &Chunk) {
        self.chunk_count += 1;
        self.byte_count += chunk.len() as u64;
    }
}

/// One framed audio chunk: 44-byte WAV header plus PCM.
///
/// Cheap to clone; every subscriber sees the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk(Arc<[u8]>);

impl Chunk {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn header(&self) -> Result<WavHeader, WavError> {
        wav::parse_header(&self.0)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk(bytes.into())
    }
}
