//! WebSocket server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                               ┌──► outbound queue A ──► Client A
//!             ├── conn task ── ConnectionEvent ─► EventLoop ──┼──► outbound queue B ──► Client B
//! Client B ──┘                               └──► outbound queue C ──► Client C
//! ```
//!
//! One task per TCP stream performs the handshake (only on `ws_path`),
//! forwards inbound text frames to the event loop and drains the
//! connection's outbound queue into the socket. All state lives behind the
//! single event loop task.
//!
//! A failed `accept` is logged and the loop keeps going, pausing briefly
//! when the process is out of descriptors. On shutdown the event loop and
//! every connection task are aborted.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ServerConfig;
use crate::lifecycle::{ConnectionEvent, EventLoop};
use crate::registry::{Connection, ConnectionId};

/// Pause after an `accept` failure that is not about a single peer.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    /// Upgrades refused (wrong path or bad handshake)
    pub rejected_handshakes: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    stats: Arc<RwLock<ServerStats>>,
    next_connection_id: Arc<AtomicU64>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            stats: Arc::new(RwLock::new(ServerStats::default())),
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener forever.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        log::info!("Sync server listening on ws://{local}{}", self.config.ws_path);

        let (events_tx, events_rx) = mpsc::channel(self.config.event_capacity);
        let event_loop = tokio::spawn(EventLoop::default().run(events_rx));
        let mut connections = JoinSet::new();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::error!("Accept on {local} failed: {e}");
                            let delay = accept_backoff(&e);
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                            continue;
                        }
                    };
                    let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
                    log::debug!("New TCP connection from {addr} ({id})");

                    let events = events_tx.clone();
                    let stats = self.stats.clone();
                    let ws_path = self.config.ws_path.clone();
                    let capacity = self.config.outbound_capacity;

                    connections.spawn(async move {
                        if let Err(e) =
                            Self::handle_connection(stream, addr, id, events, stats, ws_path, capacity).await
                        {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut shutdown => {
                    log::info!(
                        "Sync server on {local} shutting down ({} open connections)",
                        connections.len()
                    );
                    connections.abort_all();
                    event_loop.abort();
                    return Ok(());
                }
            }
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        id: ConnectionId,
        events: mpsc::Sender<ConnectionEvent>,
        stats: Arc<RwLock<ServerStats>>,
        ws_path: String,
        outbound_capacity: usize,
    ) -> Result<(), ServerError> {
        let check_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            if req.uri().path() == ws_path {
                Ok(resp)
            } else {
                log::warn!("Refused upgrade from {addr} on {}", req.uri().path());
                let mut refusal = ErrorResponse::new(Some("Not Found".to_string()));
                *refusal.status_mut() = StatusCode::NOT_FOUND;
                Err(refusal)
            }
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
            Ok(ws) => ws,
            Err(e) => {
                stats.write().await.rejected_handshakes += 1;
                return Err(e.into());
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr} ({id})");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (connection, mut outbound) = Connection::channel(id, outbound_capacity);
        if events.send(ConnectionEvent::Opened(connection)).await.is_err() {
            log::error!("Event loop is gone; dropping {id}");
            stats.write().await.active_connections -= 1;
            return Ok(());
        }

        let ended: Result<(), String> = loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                        // Binary frames carry the same JSON; invalid UTF-8
                        // becomes an empty frame, which the router rejects.
                        Some(Ok(Message::Binary(data))) => {
                            std::str::from_utf8(&data).unwrap_or_default().to_owned()
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // tungstenite queued the pong; push it out.
                            if let Err(e) = ws_sender.flush().await {
                                break Err(e.to_string());
                            }
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr} ({id})");
                            break Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break Err(e.to_string());
                        }
                    };

                    {
                        let mut s = stats.write().await;
                        s.total_messages += 1;
                        s.total_bytes += text.len() as u64;
                    }
                    log::trace!("{id} -> {text}");

                    if events.send(ConnectionEvent::Frame { id, text }).await.is_err() {
                        break Err("event loop stopped".to_string());
                    }
                }

                // Outgoing frame queued by the event loop
                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = ws_sender.send(frame).await {
                                log::error!("Send to {addr} failed: {e}");
                                break Err(e.to_string());
                            }
                        }
                        None => {
                            // Evicted or the event loop stopped.
                            log::info!("Outbound queue for {id} closed; closing {addr}");
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break Ok(());
                        }
                    }
                }
            }
        };

        // Closing the queue first makes the connection read as not open to
        // any broadcast that races with the departure event.
        drop(outbound);
        let event = match ended {
            Ok(()) => ConnectionEvent::Closed { id },
            Err(reason) => ConnectionEvent::Failed { id, reason },
        };
        let _ = events.send(event).await;

        stats.write().await.active_connections -= 1;
        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }
}

/// How long to wait before the next `accept` after `error`. Errors about one
/// peer are retried at once; anything else (such as running out of file
/// descriptors) backs off.
fn accept_backoff(error: &io::Error) -> Duration {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => Duration::ZERO,
        _ => ACCEPT_BACKOFF,
    }
}
