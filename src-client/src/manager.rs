//! Backend negotiation and the application-facing capture API.
//!
//! [`BackendManager`] picks a capture source (daemon first, local microphone
//! second), exposes one capture API over whichever source won, and forwards
//! its state and chunk events to subscribers. Subscribers live in the manager,
//! so switching backends never drops them.

use std::sync::Arc;

use async_trait::async_trait;
use micrelay_common::{CaptureConfig, ClientConfig};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{CaptureBackend, EventHub, EventSink};
use crate::error::{CaptureError, ClientError};
use crate::local::{LocalBackend, LocalOptions};
use crate::network::{NetworkBackend, NetworkOptions};
use crate::state::{BackendKind, CaptureState, Chunk};
use crate::subscribers::Subscription;

/// Error text reported through state when no backend could be opened.
pub const NO_BACKEND_ERROR: &str = "no capture backend available";

/// Opens candidate backends during negotiation.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn open_network(
        &self,
        config: &CaptureConfig,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureBackend>, ClientError>;

    async fn open_local(
        &self,
        config: &CaptureConfig,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureBackend>, ClientError>;
}

/// Production factory: a real daemon connection and the default local
/// acquisition chain.
#[derive(Debug, Clone, Default)]
pub struct DefaultBackendFactory {
    pub network: NetworkOptions,
    pub local: LocalOptions,
}

impl From<&ClientConfig> for DefaultBackendFactory {
    fn from(config: &ClientConfig) -> Self {
        Self {
            network: NetworkOptions::from(config),
            local: LocalOptions::from(config),
        }
    }
}

#[async_trait]
impl BackendFactory for DefaultBackendFactory {
    async fn open_network(
        &self,
        config: &CaptureConfig,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureBackend>, ClientError> {
        let backend = NetworkBackend::connect(self.network.clone(), config.clone(), sink).await?;
        Ok(Box::new(backend))
    }

    async fn open_local(
        &self,
        config: &CaptureConfig,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureBackend>, ClientError> {
        if !LocalBackend::is_supported() {
            return Err(CaptureError::NoDevice.into());
        }
        Ok(Box::new(LocalBackend::open(self.local.clone(), config.clone(), sink)))
    }
}

/// Construction options for [`BackendManager`].
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Configuration applied to every backend the manager opens
    pub config: CaptureConfig,
}

impl From<&ClientConfig> for ManagerOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            config: config.capture.clone(),
        }
    }
}

struct Inner {
    backend: Option<Box<dyn CaptureBackend>>,
    kind: BackendKind,
    config: CaptureConfig,
    /// State reported while no backend is selected
    unset_state: CaptureState,
}

impl Inner {
    async fn release(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            info!("Releasing {} capture backend", backend.kind());
            backend.shutdown().await;
        }
        self.kind = BackendKind::Unset;
    }

    fn state(&self) -> CaptureState {
        match &self.backend {
            Some(backend) => backend.state(),
            None => self.unset_state.clone(),
        }
    }
}

/// Application-facing capture component.
pub struct BackendManager {
    factory: Arc<dyn BackendFactory>,
    hub: EventHub,
    inner: Arc<Mutex<Inner>>,
    negotiation: parking_lot::Mutex<CancellationToken>,
}

impl BackendManager {
    /// Create the manager and start negotiating immediately.
    ///
    /// Must be called inside a tokio runtime. Every operation waits for the
    /// negotiation to finish before acting.
    pub fn new(factory: Arc<dyn BackendFactory>, options: ManagerOptions) -> Self {
        let hub = EventHub::new();
        let inner = Arc::new(Mutex::new(Inner {
            backend: None,
            kind: BackendKind::Unset,
            config: options.config,
            unset_state: CaptureState::new(BackendKind::Unset),
        }));
        let token = CancellationToken::new();

        // The lock is fresh, so this always succeeds; operations queue behind it.
        if let Ok(mut guard) = inner.clone().try_lock_owned() {
            let factory = factory.clone();
            let hub = hub.clone();
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => info!("Backend negotiation superseded"),
                    _ = negotiate(factory.as_ref(), &hub, &mut guard) => {}
                }
            });
        }

        Self {
            factory,
            hub,
            inner,
            negotiation: parking_lot::Mutex::new(token),
        }
    }

    /// Build a manager over the production factory from a client config.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            Arc::new(DefaultBackendFactory::from(config)),
            ManagerOptions::from(config),
        )
    }

    /// Replace the capture configuration. It is also re-applied to any
    /// backend negotiated later.
    ///
    /// An invalid config changes nothing; the rejection is published through
    /// the state's error field before the error is returned.
    pub async fn configure(&self, config: CaptureConfig) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        if let Err(e) = config.validate() {
            warn!("Rejecting capture config: {}", e);
            match inner.backend.as_mut() {
                Some(backend) => backend.report_error(e.to_string()).await,
                None => {
                    inner.unset_state.error = e.to_string();
                    self.hub.sink().emit_state(&inner.unset_state);
                }
            }
            return Err(e.into());
        }

        inner.config = config.clone();
        match inner.backend.as_mut() {
            Some(backend) => backend.configure(config).await,
            None => {
                self.report_unset(&mut inner, "configure");
                Ok(())
            }
        }
    }

    pub async fn start(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        match inner.backend.as_mut() {
            Some(backend) => backend.start().await,
            None => {
                self.report_unset(&mut inner, "start");
                Ok(())
            }
        }
    }

    pub async fn stop(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        match inner.backend.as_mut() {
            Some(backend) => backend.stop().await,
            None => {
                self.report_unset(&mut inner, "stop");
                Ok(())
            }
        }
    }

    pub async fn get_state(&self) -> CaptureState {
        self.inner.lock().await.state()
    }

    pub async fn active_backend(&self) -> BackendKind {
        self.inner.lock().await.kind
    }

    pub async fn subscribe_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CaptureState) + Send + Sync + 'static,
    {
        let _ready = self.inner.lock().await;
        self.hub.subscribe_state(callback)
    }

    pub async fn subscribe_chunks<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Chunk) + Send + Sync + 'static,
    {
        let _ready = self.inner.lock().await;
        self.hub.subscribe_chunks(callback)
    }

    /// Release the active backend and negotiate again.
    ///
    /// A negotiation still in flight is cancelled first. If another
    /// `retry_backend` supersedes this one while it waits, it returns without
    /// negotiating.
    pub async fn retry_backend(&self) -> BackendKind {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.negotiation.lock(), token.clone());
        previous.cancel();

        let mut inner = self.inner.lock().await;
        if token.is_cancelled() {
            return inner.kind;
        }

        inner.release().await;
        tokio::select! {
            _ = token.cancelled() => info!("Backend negotiation superseded"),
            _ = negotiate(self.factory.as_ref(), &self.hub, &mut inner) => {}
        }
        inner.kind
    }

    /// Tear everything down. No subscriber is invoked after this returns.
    pub async fn shutdown(&self) {
        self.negotiation.lock().cancel();
        let mut inner = self.inner.lock().await;
        inner.release().await;
        self.hub.retire();
        self.hub.clear();
        info!("Capture manager shut down");
    }

    fn report_unset(&self, inner: &mut Inner, operation: &str) {
        warn!("Cannot {}: {}", operation, NO_BACKEND_ERROR);
        inner.unset_state.error = NO_BACKEND_ERROR.to_string();
        inner.unset_state.config = Some(inner.config.clone());
        self.hub.sink().emit_state(&inner.unset_state);
    }
}

async fn negotiate(factory: &dyn BackendFactory, hub: &EventHub, inner: &mut Inner) {
    let config = inner.config.clone();

    match factory.open_network(&config, hub.sink()).await {
        Ok(backend) => {
            info!("Using network capture backend");
            install(inner, backend);
            return;
        }
        Err(e) => info!("Network capture backend unavailable: {}", e),
    }

    match factory.open_local(&config, hub.sink()).await {
        Ok(backend) => {
            info!("Using local capture backend");
            install(inner, backend);
            return;
        }
        Err(e) => warn!("Local capture backend unavailable: {}", e),
    }

    warn!("{}", NO_BACKEND_ERROR);
    inner.kind = BackendKind::Unset;
    inner.unset_state = CaptureState::new(BackendKind::Unset);
    inner.unset_state.error = NO_BACKEND_ERROR.to_string();
    inner.unset_state.config = Some(config);
    hub.sink().emit_state(&inner.unset_state);
}

fn install(inner: &mut Inner, backend: Box<dyn CaptureBackend>) {
    inner.kind = backend.kind();
    inner.backend = Some(backend);
}
