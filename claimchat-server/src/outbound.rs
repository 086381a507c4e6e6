//! Outbound handles for live connections.
//!
//! Every accepted WebSocket gets a [`ConnectionId`] and an unbounded channel
//! drained by its writer task. Other components never touch a socket; they
//! push encoded frames into these channels. Delivery is best effort: a send
//! to a connection whose writer has gone away is dropped silently, and the
//! dead connection is reaped by its own connection task.

use axum::body::Bytes;
use axum::extract::ws::Message;
use claimchat_proto::codec;
use claimchat_proto::event::ServerEvent;
use claimchat_proto::message::UserId;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one live connection (one device session of a user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a fresh, time-ordered connection id (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sender half of a connection's writer channel.
pub type OutboundSender = mpsc::UnboundedSender<Message>;

struct OutboundEntry {
    sender: OutboundSender,
    user_id: Option<UserId>,
}

/// Registry of writer channels, keyed by connection.
pub struct OutboundRegistry {
    connections: DashMap<ConnectionId, OutboundEntry>,
}

impl Default for OutboundRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Registers a new connection's writer channel and returns its id.
    pub fn register(&self, sender: OutboundSender) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            OutboundEntry {
                sender,
                user_id: None,
            },
        );
        id
    }

    /// Records which user a connection acts as.
    pub fn bind_user(&self, conn: ConnectionId, user_id: UserId) {
        if let Some(mut entry) = self.connections.get_mut(&conn) {
            entry.user_id = Some(user_id);
        }
    }

    /// Returns the user a connection is bound to.
    #[must_use]
    pub fn user_of(&self, conn: ConnectionId) -> Option<UserId> {
        self.connections
            .get(&conn)
            .and_then(|entry| entry.user_id.clone())
    }

    /// Removes a connection's writer channel.
    pub fn unregister(&self, conn: ConnectionId) -> bool {
        self.connections.remove(&conn).is_some()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Encodes and queues an event for one connection.
    ///
    /// Returns `false` if the connection is unknown or its writer is gone.
    pub fn send(&self, conn: ConnectionId, event: &ServerEvent) -> bool {
        match encode_frame(event) {
            Some(frame) => self.send_frame(conn, frame),
            None => false,
        }
    }

    /// Queues an already encoded frame for one connection.
    pub fn send_frame(&self, conn: ConnectionId, frame: Bytes) -> bool {
        let Some(sender) = self.connections.get(&conn).map(|e| e.sender.clone()) else {
            return false;
        };
        if sender.send(Message::Binary(frame)).is_err() {
            tracing::debug!(conn = %conn, "dropping frame for closed connection");
            return false;
        }
        true
    }

    /// Sends a WebSocket Close frame to every registered connection.
    pub fn close_all(&self) {
        for entry in self.connections.iter() {
            tracing::info!(conn = %entry.key(), "sending close frame");
            let _ = entry.value().sender.send(Message::Close(None));
        }
    }
}

/// Encodes a server event into a frame body, logging encode failures.
#[must_use]
pub fn encode_frame(event: &ServerEvent) -> Option<Bytes> {
    match codec::encode_server(event) {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server event");
            None
        }
    }
}
