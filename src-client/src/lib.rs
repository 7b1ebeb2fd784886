//! micrelay capture client.
//!
//! Streams framed PCM chunks to an application from either a micrelay daemon
//! or the local microphone. [`BackendManager`] negotiates the source, keeps
//! it healthy and exposes one capture API regardless of which source won.
//!
//! ```no_run
//! # async fn demo() -> Result<(), micrelay_client::ClientError> {
//! use micrelay_client::BackendManager;
//! use micrelay_common::ClientConfig;
//!
//! let manager = BackendManager::from_config(&ClientConfig::load());
//! let _chunks = manager
//!     .subscribe_chunks(|chunk| println!("{} bytes", chunk.len()))
//!     .await;
//! manager.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod local;
pub mod manager;
pub mod network;
pub mod pcm;
pub mod state;
pub mod subscribers;
pub mod timer;

pub use backend::{CaptureBackend, EventHub, EventSink};
pub use error::{CaptureError, ClientError};
pub use local::{LocalBackend, LocalOptions};
pub use manager::{BackendFactory, BackendManager, DefaultBackendFactory, ManagerOptions};
pub use network::{NetworkBackend, NetworkOptions};
pub use state::{BackendKind, CaptureState, CaptureStatus, Chunk, StatusEvent};
pub use subscribers::Subscription;
