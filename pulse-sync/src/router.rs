//! Inbound command dispatch.
//!
//! ```text
//! text frame ──► ClientMessage::parse ──► Router::dispatch
//!                      │ (error)                │
//!                      ▼                        ▼
//!               ERROR to sender         SharedState mutation
//!                                               │
//!                                   ┌───────────┴───────────┐
//!                                   ▼ Ok                    ▼ Err
//!                          BroadcastEngine fan-out    ERROR to sender
//! ```
//!
//! The router owns the store, the registry and the broadcast engine. It is
//! driven from a single task, so mutations never interleave.
//! Commands are dispatched whether or not the sending connection has
//! registered; commands that name a missing proposal fail on their own.
//!
//! A connection that misses a frame because its queue is full is evicted
//! after the command that overflowed it: its user departs as if the socket
//! had closed, and the connection id is handed to the event loop (see
//! [`Router::take_evicted`]) so the transport gets torn down and the
//! client can resync from a fresh snapshot.

use pulse_core::{ProposalFields, SharedState, User};
use std::collections::HashSet;

use crate::broadcast::BroadcastEngine;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};

/// What a dispatched frame resulted in.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// State changed and `event` went out to `delivered` connections.
    Applied { event: &'static str, delivered: usize },
    /// The sender's user was detached from the registry.
    Detached { user_id: String, was_bound: bool },
    /// Nothing changed; the sender was sent `ERROR { message }`.
    Rejected { message: String },
}

#[derive(Default)]
pub struct Router {
    state: SharedState,
    registry: ConnectionRegistry,
    engine: BroadcastEngine,
    /// Lagging connections evicted since the last `take_evicted`
    evicted: HashSet<ConnectionId>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing store.
    pub fn with_state(state: SharedState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &BroadcastEngine {
        &self.engine
    }

    /// Parse and dispatch one inbound text frame.
    pub fn handle_frame(&mut self, sender: &Connection, text: &str) -> Outcome {
        match ClientMessage::parse(text) {
            Ok(msg) => self.dispatch(sender, msg),
            Err(e) => {
                log::warn!("Rejected frame from {}: {e}", sender.id());
                let outcome = self.reject(sender, e.reply_message());
                self.evict_lagging();
                outcome
            }
        }
    }

    /// Run one command against the store and announce the result.
    pub fn dispatch(&mut self, sender: &Connection, msg: ClientMessage) -> Outcome {
        log::debug!("{} from {}", msg.kind(), sender.id());
        let outcome = self.apply(sender, msg);
        self.evict_lagging();
        outcome
    }

    fn apply(&mut self, sender: &Connection, msg: ClientMessage) -> Outcome {
        match msg {
            ClientMessage::RegisterUser { user_id } => self.register(sender, &user_id),

            ClientMessage::AddProposal {
                title,
                description,
                creator_id,
                treasury_phone,
            } => {
                let proposal = self.state.add_proposal(ProposalFields {
                    title,
                    description,
                    creator_id,
                    treasury_phone,
                });
                self.announce(ServerMessage::NewProposal(proposal))
            }

            ClientMessage::AddComment {
                proposal_id,
                content,
                user_id,
            } => match self.state.add_comment(&proposal_id, &user_id, &content) {
                Ok(comment) => self.announce(ServerMessage::NewComment {
                    proposal_id,
                    comment,
                }),
                Err(e) => self.reject(sender, e.to_string()),
            },

            ClientMessage::AddVote {
                proposal_id,
                in_favor,
                user_id,
            } => match self.state.add_vote(&proposal_id, &user_id, in_favor) {
                Ok(vote) => self.announce(ServerMessage::NewVote { proposal_id, vote }),
                Err(e) => self.reject(sender, e.to_string()),
            },

            ClientMessage::UpdateProposalStatus {
                proposal_id,
                status,
            } => match self.state.update_status(&proposal_id, status) {
                Ok(proposal) => self.announce(ServerMessage::status_changed(&proposal)),
                Err(e) => self.reject(sender, e.to_string()),
            },

            ClientMessage::UserDisconnect { user_id } => {
                // Only the connection binding goes; the user record stays.
                let was_bound = self.registry.deregister_user(&user_id).is_some();
                log::info!("User {user_id} detached (bound: {was_bound})");
                Outcome::Detached { user_id, was_bound }
            }
        }
    }

    /// `REGISTER_USER`: upsert the user, bind the connection, reply with
    /// the acknowledgment and a full snapshot, then tell everyone else.
    ///
    /// A connection re-registering under a different id leaves as its old
    /// user first, so no user record outlives its connection.
    fn register(&mut self, sender: &Connection, user_id: &str) -> Outcome {
        if let Some(previous) = self.registry.user_id_for(sender.id()) {
            if previous != user_id {
                log::info!("{} switches from {previous} to {user_id}", sender.id());
                self.depart(sender.id());
            }
        }

        let user = self.state.add_user(user_id);
        self.registry.register(user_id, sender.clone());

        self.engine
            .send_to_connection(sender, &ServerMessage::UserRegistered(user.clone()));
        self.engine
            .send_to_connection(sender, &ServerMessage::InitialData(self.state.snapshot()));

        let delivered =
            self.engine
                .broadcast_except(&self.registry, &ServerMessage::NewUser(user), sender.id());

        Outcome::Applied {
            event: "NEW_USER",
            delivered,
        }
    }

    /// Transport closed: drop the user record and its binding, then send
    /// the remaining connections the new user list. Returns the removed
    /// user, or `None` if the connection was never (or no longer) bound.
    pub fn remove_user(&mut self, conn_id: ConnectionId) -> Option<User> {
        let removed = self.depart(conn_id);
        self.evict_lagging();
        removed
    }

    fn depart(&mut self, conn_id: ConnectionId) -> Option<User> {
        let user_id = self.registry.deregister(conn_id)?;
        let removed = self.state.remove_user(&user_id);

        let users = self.state.users().to_vec();
        let delivered = self
            .engine
            .broadcast(&self.registry, &ServerMessage::UpdateUsers(users));
        log::info!("User {user_id} left via {conn_id}; user list sent to {delivered}");

        removed
    }

    /// Depart every connection the engine reported as lagging. Departures
    /// broadcast `UPDATE_USERS`, which can overflow further queues, so this
    /// runs until nothing new lags.
    fn evict_lagging(&mut self) {
        loop {
            let lagging = self.engine.take_lagging();
            if lagging.is_empty() {
                return;
            }
            for conn_id in lagging {
                if !self.evicted.insert(conn_id) {
                    continue;
                }
                log::warn!("{conn_id} fell behind; evicting it");
                self.depart(conn_id);
            }
        }
    }

    /// Connections evicted for lagging since the last call. The caller owns
    /// the transports and must close them.
    pub fn take_evicted(&mut self) -> Vec<ConnectionId> {
        self.evicted.drain().collect()
    }

    fn announce(&self, msg: ServerMessage) -> Outcome {
        let delivered = self.engine.broadcast(&self.registry, &msg);
        Outcome::Applied {
            event: msg.kind(),
            delivered,
        }
    }

    fn reject(&self, sender: &Connection, message: String) -> Outcome {
        self.engine
            .send_to_connection(sender, &ServerMessage::error(message.clone()));
        Outcome::Rejected { message }
    }
}
