//! The capture contract shared by every backend, and the event plumbing that
//! carries backend output to application subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use micrelay_common::CaptureConfig;

use crate::error::ClientError;
use crate::state::{BackendKind, CaptureState, Chunk};
use crate::subscribers::{Subscribers, Subscription};

/// Uniform capture API implemented by the network and local backends.
#[async_trait]
pub trait CaptureBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Replace the capture configuration used for subsequent chunks.
    async fn configure(&mut self, config: CaptureConfig) -> Result<(), ClientError>;

    async fn start(&mut self) -> Result<(), ClientError>;

    async fn stop(&mut self) -> Result<(), ClientError>;

    /// Latest state snapshot.
    fn state(&self) -> CaptureState;

    /// Record a failed operation in the state's error field and publish the
    /// resulting snapshot.
    async fn report_error(&mut self, error: String);

    /// Release every resource the backend holds. No events are emitted once
    /// this returns.
    async fn shutdown(&mut self);
}

/// Subscriber sets for state snapshots and chunks, plus the generation counter
/// that decides which backend may currently publish into them.
#[derive(Clone, Default)]
pub struct EventHub {
    states: Subscribers<CaptureState>,
    chunks: Subscribers<Chunk>,
    generation: Arc<AtomicU64>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CaptureState) + Send + Sync + 'static,
    {
        self.states.subscribe(callback)
    }

    pub fn subscribe_chunks<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Chunk) + Send + Sync + 'static,
    {
        self.chunks.subscribe(callback)
    }

    /// Hand out a sink for a new backend. Every sink issued earlier goes
    /// stale and its events are discarded from now on.
    pub fn sink(&self) -> EventSink {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        EventSink {
            generation,
            hub: self.clone(),
        }
    }

    /// Invalidate every issued sink without handing out a new one.
    pub fn retire(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.states.clear();
        self.chunks.clear();
    }
}

/// Publishing side of an [`EventHub`], owned by exactly one backend.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    hub: EventHub,
}

impl EventSink {
    pub fn is_current(&self) -> bool {
        self.hub.generation.load(Ordering::SeqCst) == self.generation
    }

    pub fn emit_state(&self, state: &CaptureState) {
        if self.is_current() {
            self.hub.states.emit(state);
        }
    }

    pub fn emit_chunk(&self, chunk: &Chunk) {
        if self.is_current() {
            self.hub.chunks.emit(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_stale_sink_is_silenced() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let _sub = hub.subscribe_state(move |state| s.lock().push(state.backend));

        let old = hub.sink();
        old.emit_state(&CaptureState::new(BackendKind::Network));

        let new = hub.sink();
        old.emit_state(&CaptureState::new(BackendKind::Network));
        new.emit_state(&CaptureState::new(BackendKind::Local));

        assert!(!old.is_current());
        assert_eq!(*seen.lock(), vec![BackendKind::Network, BackendKind::Local]);
    }

    #[test]
    fn test_retire_silences_everything() {
        let hub = EventHub::new();
        let chunks = Arc::new(Mutex::new(0));

        let c = chunks.clone();
        let _sub = hub.subscribe_chunks(move |_| *c.lock() += 1);

        let sink = hub.sink();
        sink.emit_chunk(&Chunk::from(vec![0; 4]));
        hub.retire();
        sink.emit_chunk(&Chunk::from(vec![0; 4]));

        assert_eq!(*chunks.lock(), 1);
    }
}
