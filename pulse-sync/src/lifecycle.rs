//! Connection lifecycle and the single-writer event loop.
//!
//! Every connection task reports what happens on its socket as a
//! [`ConnectionEvent`] on one shared channel. [`EventLoop`] consumes that
//! channel in arrival order and is the only code that touches the store
//! and the registry, so no two mutations ever run concurrently.
//!
//! ```text
//!  conn task A ─┐
//!  conn task B ─┼──► mpsc<ConnectionEvent> ──► EventLoop ──► Router
//!  conn task C ─┘                                 │
//!                                                 └── sessions (open, unregistered too)
//! ```
//!
//! Per-connection state: `Connected` (open, no user) → `Registered`
//! (bound to a user) → `Closed`.
//!
//! A session the router evicts for lagging is dropped here too. Dropping
//! the last sender of its outbound queue ends the connection task, which
//! closes the socket.

use std::collections::HashMap;
use tokio::sync::mpsc;

use pulse_core::User;

use crate::router::{Outcome, Router};
use crate::registry::{Connection, ConnectionId};

/// Something that happened on one connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Transport is open; nothing else happens until it registers.
    Opened(Connection),
    /// One inbound text frame.
    Frame { id: ConnectionId, text: String },
    /// Peer closed the transport.
    Closed { id: ConnectionId },
    /// Transport failed; handled like a close.
    Failed { id: ConnectionId, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Registered,
    Closed,
}

/// What the event loop did with one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    Opened,
    Routed(Outcome),
    /// Connection gone; carries the user record removed with it, if any.
    Departed(Option<User>),
    /// Frame for a connection that was never opened or is already closed.
    Ignored,
}

#[derive(Default)]
pub struct EventLoop {
    router: Router,
    sessions: HashMap<ConnectionId, Connection>,
}

impl EventLoop {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            sessions: HashMap::new(),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Number of open transports, registered or not.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_state(&self, id: ConnectionId) -> SessionState {
        if self.router.registry().contains(id) {
            SessionState::Registered
        } else if self.sessions.contains_key(&id) {
            SessionState::Connected
        } else {
            SessionState::Closed
        }
    }

    /// Apply one event.
    pub fn handle(&mut self, event: ConnectionEvent) -> Handled {
        let handled = self.apply(event);
        self.close_evicted();
        handled
    }

    fn apply(&mut self, event: ConnectionEvent) -> Handled {
        match event {
            ConnectionEvent::Opened(connection) => {
                log::debug!("{} opened", connection.id());
                self.sessions.insert(connection.id(), connection);
                Handled::Opened
            }

            ConnectionEvent::Frame { id, text } => {
                let Some(connection) = self.sessions.get(&id) else {
                    log::warn!("Frame for unknown {id} ignored");
                    return Handled::Ignored;
                };
                Handled::Routed(self.router.handle_frame(connection, &text))
            }

            ConnectionEvent::Closed { id } => {
                log::info!("{id} closed");
                self.depart(id)
            }

            ConnectionEvent::Failed { id, reason } => {
                log::error!("{id} failed: {reason}");
                self.depart(id)
            }
        }
    }

    fn depart(&mut self, id: ConnectionId) -> Handled {
        if self.sessions.remove(&id).is_none() {
            return Handled::Ignored;
        }
        Handled::Departed(self.router.remove_user(id))
    }

    fn close_evicted(&mut self) {
        for id in self.router.take_evicted() {
            if self.sessions.remove(&id).is_some() {
                log::info!("Closing {id} after eviction");
            }
        }
    }

    /// Consume events until every sender is dropped. Returns the router so
    /// callers can inspect the final state.
    pub async fn run(mut self, mut events: mpsc::Receiver<ConnectionEvent>) -> Router {
        log::info!("Event loop started");
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        log::info!(
            "Event loop stopped ({} users, {} proposals)",
            self.router.state().user_count(),
            self.router.state().proposal_count()
        );
        self.router
    }
}
