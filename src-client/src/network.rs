//! Network capture backend.
//!
//! Keeps one WebSocket connection to a micrelay daemon. A single driver task
//! owns the socket, the liveness and reconnect timers, and the backend state;
//! the public handle talks to it over a command channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use micrelay_common::ipc::{ControlMessage, ServerMessage};
use micrelay_common::{CaptureConfig, ClientConfig, MicConfig, MicState, MicStatus};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{CaptureBackend, EventSink};
use crate::error::ClientError;
use crate::state::{BackendKind, CaptureState, CaptureStatus, Chunk, StatusEvent};
use crate::timer::ReconnectTimer;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = oneshot::Sender<Result<(), ClientError>>;

/// Connection and health-check settings for [`NetworkBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkOptions {
    pub url: String,
    pub connect_timeout: Duration,
    /// Delay before reconnecting after an organic close or error
    pub reconnect_delay: Duration,
    /// Silence allowed after a liveness probe before the connection is dropped
    pub liveness_timeout: Duration,
    pub ping_interval: Duration,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            url: micrelay_common::default_daemon_url(),
            connect_timeout: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(3),
            liveness_timeout: Duration::from_secs(2),
            ping_interval: Duration::from_secs(5),
        }
    }
}

impl From<&ClientConfig> for NetworkOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            url: config.daemon_url.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            liveness_timeout: Duration::from_millis(config.liveness_timeout_ms),
            ping_interval: Duration::from_millis(config.ping_interval_ms),
        }
    }
}

enum Command {
    Configure(CaptureConfig, Reply),
    Start(Reply),
    Stop(Reply),
    ReportError(String, Reply),
}

/// Capture backend that relays through a remote daemon.
pub struct NetworkBackend {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Mutex<CaptureState>>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl NetworkBackend {
    /// Open a connection to the daemon.
    ///
    /// The first attempt is made before returning, so failure here means the
    /// daemon is unreachable. Later drops are recovered by the driver task.
    pub async fn connect(
        options: NetworkOptions,
        config: CaptureConfig,
        sink: EventSink,
    ) -> Result<Self, ClientError> {
        let mut state = CaptureState::new(BackendKind::Network);
        state.config = Some(config.clone());
        state.apply(StatusEvent::Open);
        sink.emit_state(&state);

        info!("Connecting to capture daemon at {}", options.url);
        let socket = open_socket(&options).await?;

        let shared = Arc::new(Mutex::new(state));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let period = options.ping_interval.max(Duration::from_millis(10));
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut driver = Driver {
            options,
            sink,
            shared: shared.clone(),
            commands: command_rx,
            cancel: cancel.clone(),
            socket: None,
            reconnect: ReconnectTimer::new(),
            liveness: None,
            ping,
            config,
            wants_listening: false,
        };

        let handle = tokio::spawn(async move {
            driver.on_connected(socket).await;
            driver.run().await;
        });

        Ok(Self {
            commands,
            shared,
            cancel,
            driver: Some(handle),
        })
    }

    /// Cancel both timers, close the socket and wait for the driver task to
    /// publish its final `disconnected` snapshot.
    pub async fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!("Network backend driver ended abnormally: {}", e);
            }
        }
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)?
    }
}

impl Drop for NetworkBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl CaptureBackend for NetworkBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Network
    }

    async fn configure(&mut self, config: CaptureConfig) -> Result<(), ClientError> {
        self.request(|reply| Command::Configure(config, reply)).await
    }

    async fn start(&mut self) -> Result<(), ClientError> {
        self.request(Command::Start).await
    }

    async fn stop(&mut self) -> Result<(), ClientError> {
        self.request(Command::Stop).await
    }

    fn state(&self) -> CaptureState {
        self.shared.lock().clone()
    }

    async fn report_error(&mut self, error: String) {
        if let Err(e) = self.request(|reply| Command::ReportError(error, reply)).await {
            debug!("Could not report error to network backend: {}", e);
        }
    }

    async fn shutdown(&mut self) {
        self.disconnect().await;
    }
}

async fn open_socket(options: &NetworkOptions) -> Result<Socket, ClientError> {
    match tokio::time::timeout(options.connect_timeout, connect_async(options.url.as_str())).await
    {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(e)) => Err(ClientError::WebSocket(e)),
        Err(_) => Err(ClientError::ConnectTimeout(options.url.clone())),
    }
}

async fn next_frame(socket: &mut Option<Socket>) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct Driver {
    options: NetworkOptions,
    sink: EventSink,
    shared: Arc<Mutex<CaptureState>>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    socket: Option<Socket>,
    reconnect: ReconnectTimer,
    /// Deadline for any inbound frame after the last probe
    liveness: Option<Instant>,
    ping: Interval,
    config: CaptureConfig,
    wants_listening: bool,
}

impl Driver {
    async fn run(&mut self) {
        loop {
            let connected = self.socket.is_some();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                frame = next_frame(&mut self.socket) => self.handle_frame(frame),
                _ = wait_until(self.liveness) => self.on_liveness_expired(),
                _ = self.ping.tick(), if connected => self.send_probe().await,
                _ = self.reconnect.fired() => self.try_reconnect().await,
            }
        }

        self.close().await;
    }

    fn update(&self, change: impl FnOnce(&mut CaptureState)) {
        let snapshot = {
            let mut state = self.shared.lock();
            change(&mut state);
            state.clone()
        };
        self.sink.emit_state(&snapshot);
    }

    fn status(&self) -> CaptureStatus {
        self.shared.lock().status
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Configure(config, reply) => {
                self.config = config.clone();
                self.shared.lock().config = Some(config.clone());
                // The daemon ignores mic-config mid-session; the next
                // mic-listen carries the new config instead.
                let result = if self.status() == CaptureStatus::Listening {
                    Ok(())
                } else {
                    self.send(ControlMessage::SetConfig(MicConfig::from(&config)))
                        .await
                };
                let _ = reply.send(result);
            }
            Command::Start(reply) => {
                let message = ControlMessage::StartListening(Some(MicConfig::from(&self.config)));
                let result = self.send(message).await;
                if result.is_ok() {
                    self.wants_listening = true;
                }
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                self.wants_listening = false;
                let _ = reply.send(self.send(ControlMessage::StopListening).await);
            }
            Command::ReportError(error, reply) => {
                self.update(|state| state.error = error);
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn send(&mut self, message: ControlMessage) -> Result<(), ClientError> {
        let socket = self.socket.as_mut().ok_or(ClientError::NotConnected)?;
        debug!("Sending {} to daemon", message.request_name());
        let result = socket.send(Message::Text(message.to_json())).await;
        if let Err(e) = result {
            self.connection_lost(format!("send failed: {}", e));
            return Err(ClientError::WebSocket(e));
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) {
        match frame {
            Some(Ok(message)) => {
                // Any inbound frame proves the connection is alive.
                self.liveness = None;
                match message {
                    Message::Binary(bytes) => self.on_chunk(Chunk::from(bytes)),
                    Message::Text(text) => self.on_text(&text),
                    Message::Close(frame) => {
                        let reason = frame
                            .map(|f| format!("closed by daemon: {}", f.reason))
                            .unwrap_or_else(|| "closed by daemon".to_string());
                        self.connection_lost(reason);
                    }
                    _ => {}
                }
            }
            Some(Err(e)) => self.connection_lost(e.to_string()),
            None => self.connection_lost("connection closed".to_string()),
        }
    }

    fn on_chunk(&mut self, chunk: Chunk) {
        self.shared.lock().record_chunk(&chunk);
        self.sink.emit_chunk(&chunk);
    }

    fn on_text(&mut self, text: &str) {
        match ServerMessage::from_json(text) {
            Ok(Some(ServerMessage::State(remote))) => self.mirror(remote),
            Ok(Some(ServerMessage::Pong)) => debug!("Daemon answered liveness probe"),
            Ok(None) => debug!("Ignoring unrecognized daemon message"),
            Err(e) => warn!("Unparseable daemon message: {}", e),
        }
    }

    /// Copy the daemon's authoritative state into ours.
    fn mirror(&mut self, remote: MicState) {
        let status = match remote.state {
            MicStatus::Idle => CaptureStatus::Connected,
            MicStatus::Listening => CaptureStatus::Listening,
            MicStatus::Error => CaptureStatus::Error,
        };
        let mut config = CaptureConfig::from(&remote.config);
        config.device_id = self.config.device_id.clone();

        self.update(|state| {
            if status == CaptureStatus::Listening && state.status != CaptureStatus::Listening {
                state.reset_counters();
            }
            state.status = status;
            state.error = remote.error;
            state.config = Some(config);
        });
    }

    fn connection_lost(&mut self, reason: String) {
        warn!("Daemon connection lost: {}", reason);
        self.socket = None;
        self.liveness = None;
        self.update(|state| {
            state.apply(StatusEvent::Fail);
            state.error = reason;
        });
        self.reconnect.schedule(self.options.reconnect_delay);
    }

    fn on_liveness_expired(&mut self) {
        warn!(
            "No frame from daemon within {:?} of liveness probe, reconnecting",
            self.options.liveness_timeout
        );
        self.socket = None;
        self.liveness = None;
        self.update(|state| {
            state.apply(StatusEvent::Fail);
            state.error = "daemon stopped responding".to_string();
        });
        self.reconnect.cancel();
        self.reconnect.schedule(Duration::ZERO);
    }

    async fn send_probe(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        let result = socket
            .send(Message::Text(ControlMessage::Ping.to_json()))
            .await;
        match result {
            Ok(()) => {
                if self.liveness.is_none() {
                    self.liveness = Some(Instant::now() + self.options.liveness_timeout);
                }
            }
            Err(e) => self.connection_lost(format!("probe failed: {}", e)),
        }
    }

    async fn try_reconnect(&mut self) {
        self.update(|state| {
            state.apply(StatusEvent::Retry);
        });
        info!("Reconnecting to capture daemon at {}", self.options.url);

        let attempt = tokio::select! {
            _ = self.cancel.cancelled() => return,
            attempt = open_socket(&self.options) => attempt,
        };

        match attempt {
            Ok(socket) => self.on_connected(socket).await,
            Err(e) => {
                warn!("Reconnect failed: {}", e);
                self.update(|state| {
                    state.apply(StatusEvent::Fail);
                    state.error = e.to_string();
                });
                self.reconnect.schedule(self.options.reconnect_delay);
            }
        }
    }

    async fn on_connected(&mut self, socket: Socket) {
        info!("Connected to capture daemon");
        self.socket = Some(socket);
        self.liveness = None;
        self.update(|state| {
            state.apply(StatusEvent::Opened);
            state.error.clear();
        });

        self.ping.reset();
        self.send_probe().await;

        if self.wants_listening {
            info!("Resuming listening after reconnect");
            let message = ControlMessage::StartListening(Some(MicConfig::from(&self.config)));
            if let Err(e) = self.send(message).await {
                warn!("Failed to resume listening: {}", e);
            }
        }
    }

    async fn close(&mut self) {
        self.reconnect.cancel();
        self.liveness = None;
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                debug!("Error closing daemon connection: {}", e);
            }
        }
        self.update(|state| {
            state.apply(StatusEvent::Close);
        });
        info!("Disconnected from capture daemon");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EventHub;
    use micrelay_common::wav::{frame_chunk, WavSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn options(url: String) -> NetworkOptions {
        NetworkOptions {
            url,
            connect_timeout: Duration::from_secs(1),
            ..NetworkOptions::default()
        }
    }

    /// Minimal daemon: greets with idle state, answers pings, and answers
    /// mic-listen with a listening state followed by one chunk. The first
    /// connection stays mute when `mute_first` is set.
    async fn spawn_daemon(mute_first: bool) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    if mute_first && index == 0 {
                        while let Some(Ok(_)) = ws.next().await {}
                        return;
                    }

                    let mut config = MicConfig::default();
                    let idle = ServerMessage::State(MicState::idle(config));
                    let _ = ws.send(Message::Text(idle.to_json())).await;

                    while let Some(Ok(message)) = ws.next().await {
                        let Message::Text(text) = message else { continue };
                        match ControlMessage::from_json(&text) {
                            Ok(Some(ControlMessage::Ping)) => {
                                let _ = ws.send(Message::Text(ServerMessage::Pong.to_json())).await;
                            }
                            Ok(Some(ControlMessage::StartListening(requested))) => {
                                if let Some(requested) = requested {
                                    config = requested;
                                }
                                let state = MicState {
                                    state: MicStatus::Listening,
                                    config,
                                    error: String::new(),
                                };
                                let _ = ws
                                    .send(Message::Text(ServerMessage::State(state).to_json()))
                                    .await;
                                let pcm = vec![0u8; config.read_window_len().unwrap()];
                                let chunk = frame_chunk(&pcm, &WavSpec::from(&config));
                                let _ = ws.send(Message::Binary(chunk)).await;
                            }
                            Ok(Some(ControlMessage::StopListening)) => {
                                let idle = ServerMessage::State(MicState::idle(config));
                                let _ = ws.send(Message::Text(idle.to_json())).await;
                            }
                            _ => {}
                        }
                    }
                });
            }
        });

        (url, accepted)
    }

    /// Daemon that greets with idle state, answers pings, and answers the
    /// n-th other control message with the n-th batch of `replies`.
    async fn spawn_scripted_daemon(replies: Vec<Vec<Message>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else { return };
            let mut ws = accept_async(stream).await.unwrap();
            let idle = ServerMessage::State(MicState::idle(MicConfig::default()));
            let _ = ws.send(Message::Text(idle.to_json())).await;

            let mut replies = replies.into_iter();
            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else { continue };
                match ControlMessage::from_json(&text) {
                    Ok(Some(ControlMessage::Ping)) => {
                        let _ = ws.send(Message::Text(ServerMessage::Pong.to_json())).await;
                    }
                    Ok(Some(_)) => {
                        for reply in replies.next().unwrap_or_default() {
                            let _ = ws.send(reply).await;
                        }
                    }
                    _ => {}
                }
            }
        });

        url
    }

    fn state_frame(state: MicStatus, error: &str) -> Message {
        let state = MicState {
            state,
            config: MicConfig::default(),
            error: error.to_string(),
        };
        Message::Text(ServerMessage::State(state).to_json())
    }

    fn chunk_frame(len: usize) -> Message {
        let config = MicConfig::default();
        Message::Binary(frame_chunk(&vec![0u8; len], &WavSpec::from(&config)))
    }

    async fn wait_for(backend: &NetworkBackend, check: impl Fn(&CaptureState) -> bool) -> bool {
        for _ in 0..200 {
            if check(&backend.state()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        drop(listener);

        let hub = EventHub::new();
        let result = NetworkBackend::connect(options(url), CaptureConfig::default(), hub.sink()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_listen_relays_chunks() {
        let (url, _) = spawn_daemon(false).await;
        let hub = EventHub::new();
        let chunks = Arc::new(Mutex::new(Vec::<Chunk>::new()));
        let c = chunks.clone();
        let _sub = hub.subscribe_chunks(move |chunk| c.lock().push(chunk.clone()));

        let mut backend =
            NetworkBackend::connect(options(url), CaptureConfig::default(), hub.sink())
                .await
                .unwrap();
        assert!(wait_for(&backend, |s| s.status == CaptureStatus::Connected).await);

        backend.start().await.unwrap();
        assert!(wait_for(&backend, |s| s.chunk_count == 1).await);

        let state = backend.state();
        assert_eq!(state.status, CaptureStatus::Listening);
        assert_eq!(state.byte_count, 44 + 32_000);

        let chunk = chunks.lock()[0].clone();
        assert_eq!(chunk.len(), 44 + 32_000);
        assert_eq!(chunk.header().unwrap().spec.sample_rate, 16_000);

        backend.stop().await.unwrap();
        assert!(wait_for(&backend, |s| s.status == CaptureStatus::Connected).await);
        assert_eq!(backend.state().chunk_count, 1);

        backend.shutdown().await;
    }

    #[tokio::test]
    async fn test_daemon_error_is_mirrored_verbatim() {
        let url = spawn_scripted_daemon(vec![vec![state_frame(
            MicStatus::Error,
            "Audio start error",
        )]])
        .await;
        let hub = EventHub::new();
        let errors = Arc::new(Mutex::new(Vec::<String>::new()));
        let e = errors.clone();
        let _sub = hub.subscribe_state(move |state| e.lock().push(state.error.clone()));

        let mut backend =
            NetworkBackend::connect(options(url), CaptureConfig::default(), hub.sink())
                .await
                .unwrap();
        assert!(wait_for(&backend, |s| s.status == CaptureStatus::Connected).await);

        backend.start().await.unwrap();
        assert!(wait_for(&backend, |s| s.status == CaptureStatus::Error).await);
        assert_eq!(backend.state().error, "Audio start error");
        assert_eq!(
            errors.lock().last().map(String::as_str),
            Some("Audio start error")
        );

        // The socket is still healthy, so no reconnect is attempted.
        backend.stop().await.unwrap();

        backend.shutdown().await;
    }

    #[tokio::test]
    async fn test_counters_reset_on_new_listening_period() {
        let url = spawn_scripted_daemon(vec![
            vec![
                state_frame(MicStatus::Listening, ""),
                chunk_frame(100),
                chunk_frame(100),
            ],
            vec![state_frame(MicStatus::Idle, "")],
            vec![state_frame(MicStatus::Listening, ""), chunk_frame(60)],
        ])
        .await;
        let hub = EventHub::new();
        let mut backend =
            NetworkBackend::connect(options(url), CaptureConfig::default(), hub.sink())
                .await
                .unwrap();
        assert!(wait_for(&backend, |s| s.status == CaptureStatus::Connected).await);

        backend.start().await.unwrap();
        assert!(wait_for(&backend, |s| s.chunk_count == 2).await);
        assert_eq!(backend.state().byte_count, 2 * (44 + 100));

        backend.stop().await.unwrap();
        assert!(wait_for(&backend, |s| s.status == CaptureStatus::Connected).await);
        assert_eq!(backend.state().chunk_count, 2);

        backend.start().await.unwrap();
        assert!(wait_for(&backend, |s| {
            s.status == CaptureStatus::Listening && s.chunk_count == 1
        })
        .await);
        assert_eq!(backend.state().byte_count, 44 + 60);

        backend.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_publishes_final_state() {
        let (url, _) = spawn_daemon(false).await;
        let hub = EventHub::new();
        let states = Arc::new(Mutex::new(Vec::<CaptureStatus>::new()));
        let s = states.clone();
        let _sub = hub.subscribe_state(move |state| s.lock().push(state.status));

        let mut backend =
            NetworkBackend::connect(options(url), CaptureConfig::default(), hub.sink())
                .await
                .unwrap();
        backend.shutdown().await;

        let seen = states.lock().clone();
        assert_eq!(seen.first(), Some(&CaptureStatus::Connecting));
        assert_eq!(seen.last(), Some(&CaptureStatus::Disconnected));

        let count = seen.len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(states.lock().len(), count);
        assert!(matches!(backend.start().await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_silent_daemon_triggers_one_immediate_reconnect() {
        let (url, accepted) = spawn_daemon(true).await;
        let hub = EventHub::new();

        let mut opts = options(url);
        opts.liveness_timeout = Duration::from_millis(200);
        let mut backend = NetworkBackend::connect(opts, CaptureConfig::default(), hub.sink())
            .await
            .unwrap();

        // Well under the 3 s reconnect delay: the liveness path skips it.
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        assert_eq!(backend.state().status, CaptureStatus::Connected);

        backend.shutdown().await;
    }

    #[tokio::test]
    async fn test_requests_fail_while_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let mut ws = accept_async(stream).await.unwrap();
                let _ = ws.close(None).await;
            }
        });

        let hub = EventHub::new();
        let mut backend =
            NetworkBackend::connect(options(url), CaptureConfig::default(), hub.sink())
                .await
                .unwrap();
        assert!(wait_for(&backend, |s| s.status == CaptureStatus::Error).await);

        assert!(matches!(backend.start().await, Err(ClientError::NotConnected)));
        backend.shutdown().await;
        assert_eq!(backend.state().status, CaptureStatus::Disconnected);
    }
}
