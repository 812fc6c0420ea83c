//! Fan-out of server events to registered connections.
//!
//! Every event is serialized exactly once into a text frame; each
//! connection receives a cheap clone. A connection whose writer has gone
//! away is logged and skipped, and the rest of the batch still goes out.
//!
//! A connection whose queue is full has missed an event, so its copy of
//! the state can no longer be trusted. The engine records it as lagging;
//! the owner of the registry drains [`BroadcastEngine::take_lagging`] and
//! disconnects those connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::ServerMessage;
use crate::registry::{Connection, ConnectionId, ConnectionRegistry, SendError};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Events serialized (once per broadcast or targeted send)
    pub messages_encoded: u64,
    /// Frames handed to connection queues
    pub frames_delivered: u64,
    /// Frames skipped because a connection was closed or full
    pub frames_dropped: u64,
    /// Connections reported lagging because their queue was full
    pub lagging_connections: u64,
    /// Events that could not be serialized
    pub encode_failures: u64,
}

/// Atomic counters, read through `stats()`.
#[derive(Default)]
struct AtomicBroadcastStats {
    messages_encoded: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    lagging_connections: AtomicU64,
    encode_failures: AtomicU64,
}

#[derive(Default)]
pub struct BroadcastEngine {
    stats: AtomicBroadcastStats,
    /// Connections whose queue overflowed since the last `take_lagging`
    lagging: Mutex<Vec<ConnectionId>>,
}

impl BroadcastEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `msg` to every registered connection. Returns how many
    /// connections accepted the frame.
    pub fn broadcast(&self, registry: &ConnectionRegistry, msg: &ServerMessage) -> usize {
        self.fan_out(registry, msg, None)
    }

    /// Send `msg` to every registered connection except `skip`.
    pub fn broadcast_except(
        &self,
        registry: &ConnectionRegistry,
        msg: &ServerMessage,
        skip: ConnectionId,
    ) -> usize {
        self.fan_out(registry, msg, Some(skip))
    }

    /// Send `msg` to the connection bound to `user_id`. Returns whether it
    /// was queued.
    pub fn send_to(&self, registry: &ConnectionRegistry, user_id: &str, msg: &ServerMessage) -> bool {
        match registry.connection_for(user_id) {
            Some(connection) => self.send_to_connection(connection, msg),
            None => {
                log::debug!("No open connection for user {user_id}, dropping {}", msg.kind());
                false
            }
        }
    }

    /// Send `msg` to one connection, registered or not.
    pub fn send_to_connection(&self, connection: &Connection, msg: &ServerMessage) -> bool {
        match self.encode(msg) {
            Some(frame) => self.deliver(connection, frame, msg.kind()),
            None => false,
        }
    }

    fn fan_out(
        &self,
        registry: &ConnectionRegistry,
        msg: &ServerMessage,
        skip: Option<ConnectionId>,
    ) -> usize {
        let Some(frame) = self.encode(msg) else {
            return 0;
        };

        let mut delivered = 0;
        for connection in registry.all_connections() {
            if Some(connection.id()) == skip {
                continue;
            }
            if self.deliver(connection, frame.clone(), msg.kind()) {
                delivered += 1;
            }
        }

        log::trace!("{} fanned out to {delivered}/{} connections", msg.kind(), registry.len());
        delivered
    }

    fn encode(&self, msg: &ServerMessage) -> Option<Message> {
        match msg.to_frame() {
            Ok(frame) => {
                self.stats.messages_encoded.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            Err(e) => {
                self.stats.encode_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to encode {}: {e}", msg.kind());
                None
            }
        }
    }

    fn deliver(&self, connection: &Connection, frame: Message, kind: &str) -> bool {
        if !connection.is_open() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("Skipping {kind} for {}: not open", connection.id());
            return false;
        }
        match connection.send(frame) {
            Ok(()) => {
                self.stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(SendError::Closed) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Skipping {kind} for {}: closed", connection.id());
                false
            }
            Err(SendError::Full) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Dropped {kind} for {}: outbound queue full", connection.id());
                self.mark_lagging(connection.id());
                false
            }
        }
    }

    fn mark_lagging(&self, id: ConnectionId) {
        let mut lagging = self.lagging.lock().unwrap_or_else(|e| e.into_inner());
        if !lagging.contains(&id) {
            lagging.push(id);
            self.stats.lagging_connections.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Connections that missed a frame because their queue was full, in the
    /// order they overflowed. Clears the list.
    pub fn take_lagging(&self) -> Vec<ConnectionId> {
        std::mem::take(&mut *self.lagging.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_encoded: self.stats.messages_encoded.load(Ordering::Relaxed),
            frames_delivered: self.stats.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            lagging_connections: self.stats.lagging_connections.load(Ordering::Relaxed),
            encode_failures: self.stats.encode_failures.load(Ordering::Relaxed),
        }
    }
}
