//! Connection registry: user id ↔ live connection.
//!
//! Two one-directional maps kept in lockstep by `register` / `deregister`.
//! The registry is owned by the event loop, so a broadcast never sees one
//! map updated without the other.
//!
//! A `Connection` is only a handle: the bounded sending half of the
//! channel drained by that connection's socket writer task. The connection
//! counts as open for as long as the writer task holds the receiver.

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;

/// Server-assigned id of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection delivery failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    Full,
}

/// Handle to one live connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<Message>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Message>) -> Self {
        Self { id, outbound }
    }

    /// Create a connection handle plus the receiver its writer drains.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Message) -> Result<(), SendError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

#[derive(Debug)]
struct Entry {
    user_id: String,
    connection: Connection,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_user: HashMap<String, ConnectionId>,
    by_connection: HashMap<ConnectionId, Entry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `connection`, dropping any previous binding of
    /// either side.
    pub fn register(&mut self, user_id: &str, connection: Connection) {
        let conn_id = connection.id();

        if let Some(old_conn) = self.by_user.remove(user_id) {
            if old_conn != conn_id {
                self.by_connection.remove(&old_conn);
                log::debug!("User {user_id} moved from {old_conn} to {conn_id}");
            }
        }
        if let Some(old) = self.by_connection.remove(&conn_id) {
            if old.user_id != user_id {
                self.by_user.remove(&old.user_id);
                log::debug!("{conn_id} switched from user {} to {user_id}", old.user_id);
            }
        }

        self.by_user.insert(user_id.to_string(), conn_id);
        self.by_connection.insert(
            conn_id,
            Entry {
                user_id: user_id.to_string(),
                connection,
            },
        );
    }

    /// Remove a connection from both maps. Returns the user it belonged to.
    pub fn deregister(&mut self, conn_id: ConnectionId) -> Option<String> {
        let entry = self.by_connection.remove(&conn_id)?;
        self.by_user.remove(&entry.user_id);
        Some(entry.user_id)
    }

    /// Remove whatever connection `user_id` is bound to.
    pub fn deregister_user(&mut self, user_id: &str) -> Option<Connection> {
        let conn_id = self.by_user.remove(user_id)?;
        self.by_connection.remove(&conn_id).map(|e| e.connection)
    }

    /// Every registered connection, in no particular order.
    pub fn all_connections(&self) -> impl Iterator<Item = &Connection> {
        self.by_connection.values().map(|e| &e.connection)
    }

    pub fn connection_for(&self, user_id: &str) -> Option<&Connection> {
        let conn_id = self.by_user.get(user_id)?;
        self.by_connection.get(conn_id).map(|e| &e.connection)
    }

    pub fn user_id_for(&self, conn_id: ConnectionId) -> Option<&str> {
        self.by_connection.get(&conn_id).map(|e| e.user_id.as_str())
    }

    pub fn contains(&self, conn_id: ConnectionId) -> bool {
        self.by_connection.contains_key(&conn_id)
    }

    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: u64) -> (Connection, mpsc::Receiver<Message>) {
        Connection::channel(ConnectionId(id), 8)
    }

    /// Both maps agree with each other.
    fn assert_consistent(registry: &ConnectionRegistry) {
        assert_eq!(registry.by_user.len(), registry.by_connection.len());
        for (user, conn_id) in &registry.by_user {
            assert_eq!(registry.by_connection[conn_id].user_id, *user);
        }
    }

    #[test]
    fn test_register_lookup_both_ways() {
        let mut registry = ConnectionRegistry::new();
        let (c1, _rx1) = conn(1);
        registry.register("u1", c1);

        assert_eq!(registry.connection_for("u1").map(|c| c.id()), Some(ConnectionId(1)));
        assert_eq!(registry.user_id_for(ConnectionId(1)), Some("u1"));
        assert_eq!(registry.len(), 1);
        assert_consistent(&registry);
    }

    #[test]
    fn test_deregister_clears_both_maps() {
        let mut registry = ConnectionRegistry::new();
        let (c1, _rx1) = conn(1);
        registry.register("u1", c1);

        assert_eq!(registry.deregister(ConnectionId(1)), Some("u1".to_string()));
        assert!(registry.connection_for("u1").is_none());
        assert!(registry.user_id_for(ConnectionId(1)).is_none());
        assert!(registry.is_empty());
        assert_eq!(registry.deregister(ConnectionId(1)), None);
    }

    #[test]
    fn test_same_user_new_connection_replaces_old() {
        let mut registry = ConnectionRegistry::new();
        let (c1, _rx1) = conn(1);
        let (c2, _rx2) = conn(2);
        registry.register("u1", c1);
        registry.register("u1", c2);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.connection_for("u1").map(|c| c.id()), Some(ConnectionId(2)));
        assert!(registry.user_id_for(ConnectionId(1)).is_none());
        assert_consistent(&registry);

        // Closing the stale connection must not unbind the user.
        assert_eq!(registry.deregister(ConnectionId(1)), None);
        assert!(registry.connection_for("u1").is_some());
    }

    #[test]
    fn test_same_connection_new_user_replaces_old() {
        let mut registry = ConnectionRegistry::new();
        let (c1, _rx1) = conn(1);
        registry.register("u1", c1.clone());
        registry.register("u2", c1);

        assert_eq!(registry.len(), 1);
        assert!(registry.connection_for("u1").is_none());
        assert_eq!(registry.user_id_for(ConnectionId(1)), Some("u2"));
        assert_consistent(&registry);
    }

    #[test]
    fn test_deregister_user() {
        let mut registry = ConnectionRegistry::new();
        let (c1, _rx1) = conn(1);
        let (c2, _rx2) = conn(2);
        registry.register("u1", c1);
        registry.register("u2", c2);

        let removed = registry.deregister_user("u1").unwrap();
        assert_eq!(removed.id(), ConnectionId(1));
        assert!(!registry.contains(ConnectionId(1)));
        assert!(registry.contains(ConnectionId(2)));
        assert!(registry.deregister_user("u1").is_none());
        assert_consistent(&registry);
    }

    #[test]
    fn test_all_connections() {
        let mut registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for i in 0..5 {
            let (c, rx) = conn(i);
            receivers.push(rx);
            registry.register(&format!("u{i}"), c);
        }
        let mut ids: Vec<u64> = registry.all_connections().map(|c| c.id().0).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_connection_open_and_send() {
        let (c, mut rx) = Connection::channel(ConnectionId(7), 1);
        assert!(c.is_open());

        c.send(Message::text("a")).unwrap();
        assert_eq!(c.send(Message::text("b")), Err(SendError::Full));
        assert_eq!(rx.try_recv().unwrap(), Message::text("a"));

        drop(rx);
        assert!(!c.is_open());
        assert_eq!(c.send(Message::text("c")), Err(SendError::Closed));
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(42).to_string(), "conn-42");
    }
}
