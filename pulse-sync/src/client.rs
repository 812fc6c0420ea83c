//! WebSocket sync client.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, retry)
//! - Automatic `REGISTER_USER` on every (re)connect
//! - Reconnection with capped exponential backoff
//! - Typed command helpers for every client command
//!
//! One supervisor task per session reads server frames and, when the
//! socket drops unexpectedly, walks the reconnect schedule. A writer task
//! drains the outgoing queue into the socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use pulse_core::{ProposalFields, ProposalStatus};

use crate::config::ClientConfig;
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Not connected")]
    NotConnected,
    #[error("Already connected")]
    AlreadyConnected,
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; stays here until `retry()`.
    Failed,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Socket open and `REGISTER_USER` queued
    Connected,
    /// Server event
    Message(ServerMessage),
    /// Socket closed, by us or by the peer
    Disconnected,
    /// About to wait `delay` before reconnect attempt `attempt` (1-based)
    Reconnecting { attempt: u32, delay: Duration },
    /// Every reconnect attempt failed
    ConnectionFailed,
}

/// Backoff schedule for reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_retries: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based): doubles each time, capped
    /// at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// State shared between the handle and its background tasks.
struct Shared {
    user_id: String,
    config: ClientConfig,
    state: RwLock<ConnectionState>,
    /// Queue into the current session's writer task
    outgoing: RwLock<Option<mpsc::Sender<Message>>>,
    event_tx: mpsc::Sender<SyncEvent>,
    /// Set by `disconnect()`; a session ending while set is not retried.
    closing: AtomicBool,
}

impl Shared {
    fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            log::debug!("Client event dropped: {e}");
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Open a socket, queue `REGISTER_USER` and start the writer task.
    async fn open_session(&self) -> Result<WsReader, ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.config.ws_url.as_str()).await?;
        let (mut ws_writer, ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(self.config.outgoing_capacity);
        let register = ClientMessage::RegisterUser {
            user_id: self.user_id.clone(),
        }
        .encode()?;
        out_tx
            .send(Message::text(register))
            .await
            .map_err(|_| ClientError::NotConnected)?;

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let is_close = matches!(frame, Message::Close(_));
                if let Err(e) = ws_writer.send(frame).await {
                    log::debug!("Client writer stopped: {e}");
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        *self.outgoing.write().await = Some(out_tx);
        log::info!("Connected to {} as {}", self.config.ws_url, self.user_id);
        Ok(ws_reader)
    }

    /// Forward server events until the socket ends.
    async fn read_session(&self, mut ws_reader: WsReader) {
        while let Some(msg) = ws_reader.next().await {
            match msg {
                Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                    Ok(event) => self.emit(SyncEvent::Message(event)),
                    Err(e) => log::warn!("Undecodable server frame: {e}"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Connection to {} lost: {e}", self.config.ws_url);
                    break;
                }
            }
        }
    }

    /// Walk the backoff schedule. Returns the new session's reader, or
    /// `None` once attempts are exhausted or a disconnect was requested.
    async fn reconnect(&self) -> Option<WsReader> {
        self.set_state(ConnectionState::Reconnecting).await;
        let policy = &self.config.reconnect;

        for attempt in 1..=policy.max_retries {
            let delay = policy.delay_for(attempt);
            self.emit(SyncEvent::Reconnecting { attempt, delay });
            log::info!("Reconnect attempt {attempt}/{} in {delay:?}", policy.max_retries);
            tokio::time::sleep(delay).await;

            if self.closing.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected).await;
                return None;
            }

            match self.open_session().await {
                Ok(reader) => {
                    self.set_state(ConnectionState::Connected).await;
                    self.emit(SyncEvent::Connected);
                    return Some(reader);
                }
                Err(e) => log::warn!("Reconnect attempt {attempt} failed: {e}"),
            }
        }

        log::error!("Giving up on {} after {} attempts", self.config.ws_url, policy.max_retries);
        self.set_state(ConnectionState::Failed).await;
        self.emit(SyncEvent::ConnectionFailed);
        None
    }

    async fn supervise(self: Arc<Self>, mut ws_reader: WsReader) {
        loop {
            self.read_session(ws_reader).await;
            self.outgoing.write().await.take();
            self.emit(SyncEvent::Disconnected);

            if self.closing.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected).await;
                return;
            }
            match self.reconnect().await {
                Some(reader) => ws_reader = reader,
                None => return,
            }
        }
    }
}

/// The sync client.
///
/// Registers as `user_id` on every connect and keeps the session alive
/// across transient network failures.
pub struct SyncClient {
    shared: Arc<Shared>,
    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl SyncClient {
    pub fn new(user_id: impl Into<String>, config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            shared: Arc::new(Shared {
                user_id: user_id.into(),
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                outgoing: RwLock::new(None),
                event_tx,
                closing: AtomicBool::new(false),
            }),
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect and register.
    ///
    /// Fails without retrying if the first attempt fails; automatic
    /// reconnects only kick in once a session has been established.
    pub async fn connect(&self) -> Result<(), ClientError> {
        {
            let mut state = self.shared.state.write().await;
            if matches!(
                *state,
                ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
            ) {
                return Err(ClientError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }
        self.shared.closing.store(false, Ordering::SeqCst);

        match self.shared.open_session().await {
            Ok(reader) => {
                self.shared.set_state(ConnectionState::Connected).await;
                self.shared.emit(SyncEvent::Connected);
                tokio::spawn(self.shared.clone().supervise(reader));
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected).await;
                Err(e)
            }
        }
    }

    /// Leave the `Failed` (or `Disconnected`) state with a fresh connect.
    pub async fn retry(&self) -> Result<(), ClientError> {
        log::info!("Retrying connection to {}", self.shared.config.ws_url);
        self.connect().await
    }

    /// Send `USER_DISCONNECT`, then close the socket. No reconnect follows.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.send(&ClientMessage::UserDisconnect {
            user_id: self.shared.user_id.clone(),
        })
        .await?;
        self.send_frame(Message::Close(None)).await
    }

    /// `ADD_PROPOSAL` with this client's user as creator.
    pub async fn create_proposal(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        treasury_phone: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::add_proposal(ProposalFields {
            title: title.into(),
            description: description.into(),
            creator_id: self.shared.user_id.clone(),
            treasury_phone: treasury_phone.into(),
        }))
        .await
    }

    pub async fn add_comment(
        &self,
        proposal_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::AddComment {
            proposal_id: proposal_id.into(),
            content: content.into(),
            user_id: self.shared.user_id.clone(),
        })
        .await
    }

    pub async fn cast_vote(&self, proposal_id: impl Into<String>, in_favor: bool) -> Result<(), ClientError> {
        self.send(&ClientMessage::AddVote {
            proposal_id: proposal_id.into(),
            in_favor,
            user_id: self.shared.user_id.clone(),
        })
        .await
    }

    pub async fn update_status(
        &self,
        proposal_id: impl Into<String>,
        status: ProposalStatus,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::UpdateProposalStatus {
            proposal_id: proposal_id.into(),
            status,
        })
        .await
    }

    /// Send any command.
    pub async fn send(&self, msg: &ClientMessage) -> Result<(), ClientError> {
        let frame = Message::text(msg.encode()?);
        log::trace!("Sending {}", msg.kind());
        self.send_frame(frame).await
    }

    async fn send_frame(&self, frame: Message) -> Result<(), ClientError> {
        let tx = self
            .shared
            .outgoing
            .read()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;
        tx.send(frame).await.map_err(|_| ClientError::NotConnected)
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    pub fn server_url(&self) -> &str {
        &self.shared.config.ws_url
    }
}
