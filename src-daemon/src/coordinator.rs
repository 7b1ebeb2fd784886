//! Single owner of the daemon's microphone state.
//!
//! Connections never touch state directly: they send [`Command`]s through a
//! [`CoordinatorHandle`] and the coordinator task applies them one at a time,
//! starting and stopping the capture session and pushing state to every
//! registered connection.

use std::collections::HashMap;

use micrelay_common::ipc::{ControlMessage, ProtocolError, ServerMessage};
use micrelay_common::{MicConfig, MicState, MicStatus};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::session::{CaptureSession, SessionOptions};

pub const INVALID_COMMAND: &str = "Invalid command";
pub const INVALID_CONFIG: &str = "Invalid config";
pub const AUDIO_START_ERROR: &str = "Audio start error";
pub const AUDIO_READ_ERROR: &str = "Audio read error";
pub const CONNECTION_READ_ERROR: &str = "WebSocket read error";

pub type ConnectionId = u64;

/// Outbound frame queue of one connection, drained by its writer task.
pub type Outbound = mpsc::UnboundedSender<Message>;

/// Requests handled by the coordinator task.
#[derive(Debug)]
pub enum Command {
    Register {
        id: ConnectionId,
        outbound: Outbound,
    },
    Unregister {
        id: ConnectionId,
        read_failed: bool,
    },
    Control {
        id: ConnectionId,
        message: ControlMessage,
        ack: oneshot::Sender<()>,
    },
    Rejected {
        id: ConnectionId,
        error: ProtocolError,
        ack: oneshot::Sender<()>,
    },
    SessionEnded {
        generation: u64,
        error: String,
    },
}

/// Cloneable sender side of the coordinator's command channel.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    /// Add a connection. The current state is queued to it immediately.
    pub fn register(&self, id: ConnectionId, outbound: Outbound) {
        let _ = self.tx.send(Command::Register { id, outbound });
    }

    pub fn unregister(&self, id: ConnectionId, read_failed: bool) {
        let _ = self.tx.send(Command::Unregister { id, read_failed });
    }

    /// Apply a control message and wait until it has been handled.
    pub async fn control(&self, id: ConnectionId, message: ControlMessage) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Control { id, message, ack }).is_ok() {
            let _ = done.await;
        }
    }

    /// Report an undecodable text frame and wait until it has been handled.
    pub async fn reject(&self, id: ConnectionId, error: ProtocolError) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Rejected { id, error, ack }).is_ok() {
            let _ = done.await;
        }
    }
}

struct ActiveSession {
    owner: ConnectionId,
    generation: u64,
    session: CaptureSession,
}

/// The coordinator task's state.
pub struct Coordinator {
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Command>,
    options: SessionOptions,
    config: MicConfig,
    status: MicStatus,
    error: String,
    session: Option<ActiveSession>,
    generation: u64,
    connections: HashMap<ConnectionId, Outbound>,
}

impl Coordinator {
    /// Create a coordinator reporting `initial` as its idle config.
    pub fn new(options: SessionOptions, initial: MicConfig) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle { tx: tx.clone() };
        let coordinator = Self {
            rx,
            tx,
            options,
            config: initial,
            status: MicStatus::Idle,
            error: String::new(),
            session: None,
            generation: 0,
            connections: HashMap::new(),
        };
        (coordinator, handle)
    }

    /// Process commands until `cancel` fires, then tear down the session.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        self.stop_session().await;
        self.connections.clear();
        debug!("Coordinator stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Register { id, outbound } => {
                send_text(&outbound, &ServerMessage::State(self.snapshot()));
                self.connections.insert(id, outbound);
                info!("Client {} connected ({} open)", id, self.connections.len());
            }
            Command::Unregister { id, read_failed } => {
                self.connections.remove(&id);
                info!("Client {} disconnected ({} open)", id, self.connections.len());
                self.on_disconnect(id, read_failed).await;
            }
            Command::Control { id, message, ack } => {
                self.on_control(id, message).await;
                let _ = ack.send(());
            }
            Command::Rejected { id, error, ack } => {
                warn!("Rejected message from client {}: {}", id, error);
                let reason = match error {
                    ProtocolError::InvalidConfig(_) => INVALID_CONFIG,
                    _ => INVALID_COMMAND,
                };
                self.set_status(MicStatus::Error, reason);
                let _ = ack.send(());
            }
            Command::SessionEnded { generation, error } => {
                if self.session.as_ref().map(|s| s.generation) != Some(generation) {
                    return;
                }
                error!("Capture session ended: {}", error);
                self.stop_session().await;
                self.set_status(MicStatus::Error, AUDIO_READ_ERROR);
            }
        }
    }

    async fn on_control(&mut self, id: ConnectionId, message: ControlMessage) {
        debug!("Client {} sent {:?}", id, message);
        match message {
            ControlMessage::StartListening(config) => {
                if self.session.is_some() {
                    debug!("Already listening, ignoring start request");
                    return;
                }
                if let Some(config) = config {
                    if !self.accept_config(config) {
                        return;
                    }
                }
                self.start_session(id);
            }
            ControlMessage::StopListening => {
                if self.session.is_some() {
                    self.stop_session().await;
                    self.set_status(MicStatus::Idle, "");
                }
            }
            ControlMessage::SetConfig(config) => {
                if self.session.is_some() {
                    debug!("Session active, ignoring config change");
                    return;
                }
                if self.accept_config(config) {
                    self.broadcast();
                }
            }
            ControlMessage::RequestState => {
                if let Some(outbound) = self.connections.get(&id) {
                    send_text(outbound, &ServerMessage::State(self.snapshot()));
                }
            }
            ControlMessage::Ping => {
                if let Some(outbound) = self.connections.get(&id) {
                    send_text(outbound, &ServerMessage::Pong);
                }
            }
        }
    }

    /// Store `config` if it is valid, otherwise report it as invalid.
    fn accept_config(&mut self, config: MicConfig) -> bool {
        match config.validate() {
            Ok(()) => {
                self.config = config;
                true
            }
            Err(e) => {
                warn!("Refusing capture config: {}", e);
                self.set_status(MicStatus::Error, INVALID_CONFIG);
                false
            }
        }
    }

    async fn on_disconnect(&mut self, id: ConnectionId, read_failed: bool) {
        let owned = self.session.as_ref().map(|s| s.owner) == Some(id);
        if owned {
            info!("Session owner {} went away, stopping capture", id);
            self.stop_session().await;
        }

        if read_failed {
            self.set_status(MicStatus::Error, CONNECTION_READ_ERROR);
        } else if owned {
            self.set_status(MicStatus::Idle, "");
        }
    }

    fn start_session(&mut self, owner: ConnectionId) {
        let Some(outbound) = self.connections.get(&owner).cloned() else {
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();

        let started = CaptureSession::start(
            &self.options,
            self.config,
            move |chunk| {
                let _ = outbound.send(Message::Binary(chunk));
            },
            move |error| {
                let _ = tx.send(Command::SessionEnded { generation, error });
            },
        );

        match started {
            Ok(session) => {
                self.session = Some(ActiveSession {
                    owner,
                    generation,
                    session,
                });
                self.set_status(MicStatus::Listening, "");
            }
            Err(SessionError::InvalidConfig(e)) => {
                error!("Stored capture config is invalid: {}", e);
                self.set_status(MicStatus::Error, INVALID_CONFIG);
            }
            Err(e) => {
                error!("Audio start error: {}", e);
                self.set_status(MicStatus::Error, AUDIO_START_ERROR);
            }
        }
    }

    async fn stop_session(&mut self) {
        if let Some(active) = self.session.take() {
            active.session.stop().await;
        }
    }

    fn set_status(&mut self, status: MicStatus, error: &str) {
        self.status = status;
        self.error = error.to_string();
        self.broadcast();
    }

    fn snapshot(&self) -> MicState {
        MicState {
            state: self.status,
            config: self.config,
            error: self.error.clone(),
        }
    }

    fn broadcast(&self) {
        let text = ServerMessage::State(self.snapshot()).to_json();
        for outbound in self.connections.values() {
            let _ = outbound.send(Message::Text(text.clone()));
        }
    }
}

fn send_text(outbound: &Outbound, message: &ServerMessage) {
    let _ = outbound.send(Message::Text(message.to_json()));
}
