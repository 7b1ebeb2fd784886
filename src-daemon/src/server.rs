//! WebSocket connection server.
//!
//! Every accepted connection gets a writer task draining its outbound queue
//! and a reader loop that hands one message at a time to the coordinator.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use micrelay_common::ipc::ControlMessage;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::coordinator::{ConnectionId, Coordinator, CoordinatorHandle};
use crate::error::DaemonError;
use crate::session::SessionOptions;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Run the daemon until `cancel` fires.
///
/// If `ready_tx` is provided, it receives the bound address once the listener
/// accepts connections, so callers binding port 0 learn the real port.
pub async fn run_server(
    config: &DaemonConfig,
    cancel: CancellationToken,
    ready_tx: Option<oneshot::Sender<SocketAddr>>,
) -> Result<(), DaemonError> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| DaemonError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {}", local_addr);

    let options = SessionOptions {
        command: config.capture_command.clone(),
        native: config.default_config,
    };
    let (coordinator, handle) = Coordinator::new(options, config.default_config);
    let coordinator_task = tokio::spawn(coordinator.run(cancel.clone()));

    if let Some(tx) = ready_tx {
        let _ = tx.send(local_addr);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Shutdown requested, stopping WebSocket server");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let handle = handle.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, handle, cancel).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            },
        }
    }

    if let Err(e) = coordinator_task.await {
        error!("Coordinator task failed: {}", e);
    }
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    coordinator: CoordinatorHandle,
    cancel: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Upgrade error from {}: {}", peer, e);
            return;
        }
    };
    let id: ConnectionId = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    debug!("Client {} is {}", id, peer);

    let (mut sink, mut stream) = ws.split();
    let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!("Write to client {} failed: {}", id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    coordinator.register(id, outbound);

    let read_failed = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break false,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match ControlMessage::from_json(&text) {
                Ok(Some(message)) => coordinator.control(id, message).await,
                Ok(None) => debug!("Ignoring unknown message from client {}", id),
                Err(e) => coordinator.reject(id, e).await,
            },
            Some(Ok(Message::Close(_))) | None => break false,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket read error from client {}: {}", id, e);
                break true;
            }
        }
    };

    coordinator.unregister(id, read_failed);
    if let Err(e) = writer.await {
        error!("Writer task for client {} failed: {}", id, e);
    }
}
