//! Direct WebSocket client for one-shot daemon requests.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use micrelay_common::ipc::{ControlMessage, ProtocolError, ServerMessage};
use micrelay_common::MicState;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Failures talking to the daemon.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("Failed to send {request}: {source}")]
    Send {
        request: &'static str,
        #[source]
        source: tungstenite::Error,
    },
    #[error("Daemon did not respond")]
    Timeout,
    #[error("Daemon closed the connection")]
    Closed,
    #[error("Connection error: {0}")]
    Connection(#[source] tungstenite::Error),
    #[error("Unreadable daemon message: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Connection to the capture daemon.
pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    timeout: Duration,
    state: MicState,
}

impl Client {
    /// Connect and wait for the state the daemon sends on every new connection.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, IpcError> {
        let (ws, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| IpcError::ConnectTimeout(url.to_string()))?
            .map_err(|source| IpcError::Connect {
                url: url.to_string(),
                source,
            })?;

        let mut client = Self {
            ws,
            timeout,
            state: MicState::idle(Default::default()),
        };
        loop {
            if let ServerMessage::State(state) = client.read_message().await? {
                client.state = state;
                return Ok(client);
            }
        }
    }

    /// Most recent state seen on this connection.
    pub fn state(&self) -> &MicState {
        &self.state
    }

    /// Send a control message and return the state once the daemon has
    /// handled it.
    ///
    /// A ping follows the message; the daemon answers in order, so every
    /// state caused by the message arrives before the pong.
    pub async fn request(&mut self, message: ControlMessage) -> Result<MicState, IpcError> {
        self.send(&message).await?;
        self.ping().await?;
        Ok(self.state.clone())
    }

    /// Round trip of a ping, tracking any state that arrives meanwhile.
    pub async fn ping(&mut self) -> Result<Duration, IpcError> {
        let started = Instant::now();
        self.send(&ControlMessage::Ping).await?;
        loop {
            match self.read_message().await? {
                ServerMessage::Pong => return Ok(started.elapsed()),
                ServerMessage::State(state) => self.state = state,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    async fn send(&mut self, message: &ControlMessage) -> Result<(), IpcError> {
        let request = match message.request_name() {
            "" => "ping",
            name => name,
        };
        self.ws
            .send(Message::Text(message.to_json()))
            .await
            .map_err(|source| IpcError::Send { request, source })
    }

    async fn read_message(&mut self) -> Result<ServerMessage, IpcError> {
        loop {
            let frame = tokio::time::timeout(self.timeout, self.ws.next())
                .await
                .map_err(|_| IpcError::Timeout)?;
            match frame {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text)? {
                    Some(message) => return Ok(message),
                    None => continue,
                },
                Some(Ok(Message::Close(_))) | None => return Err(IpcError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(IpcError::Connection(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("ws://{}/", addr);
        let err = Client::connect(&url, Duration::from_secs(5)).await.err().unwrap();
        assert!(matches!(err, IpcError::Connect { .. }));
        assert!(err.to_string().contains(&url));
    }

    #[tokio::test]
    async fn test_silent_daemon_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(ws);
        });

        let err = Client::connect(&format!("ws://{}/", addr), Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IpcError::Timeout));

        server.abort();
    }
}
