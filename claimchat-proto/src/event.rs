//! Events exchanged over a `ClaimChat` WebSocket connection.
//!
//! Each binary WebSocket frame carries exactly one postcard-encoded
//! [`ClientEvent`] (client to server) or [`ServerEvent`] (server to client).
//! The first frame a client sends must be [`ClientEvent::Authenticate`].

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, MessageId, OutgoingMessage, RoomId, TempId, UserId};
use crate::presence::PresenceStatus;

/// Events a client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// Binds the connection to a user.
    ///
    /// The id is the subject of a token already validated by the identity
    /// service. Server responds with [`ServerEvent::Authenticated`].
    Authenticate {
        /// The authenticated user.
        user_id: UserId,
    },

    /// Subscribes this connection to a room.
    JoinRoom {
        /// Room (claim) to join.
        room_id: RoomId,
    },

    /// Unsubscribes this connection from a room.
    LeaveRoom {
        /// Room (claim) to leave.
        room_id: RoomId,
    },

    /// Requests the persisted history of a joined room.
    FetchHistory {
        /// Room (claim) whose history is requested.
        room_id: RoomId,
    },

    /// Submits a message for persistence and broadcast.
    SendMessage(OutgoingMessage),

    /// Confirms that a broadcast message reached this connection.
    AckDelivered {
        /// Room the message was broadcast in.
        room_id: RoomId,
        /// The sender's provisional id for the message.
        temp_id: TempId,
    },

    /// Removes a message. Only its sender may do this.
    DeleteMessage {
        /// Canonical id of the message to remove.
        message_id: MessageId,
    },

    /// Signals that the user is typing in a room.
    Typing {
        /// Room the user is typing in.
        room_id: RoomId,
    },
}

/// Error classes reported to clients in [`ServerEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed input: empty content, empty ids, oversized frames.
    Validation,
    /// The user is not a participant of the room, or has not joined it.
    Unauthorized,
    /// The user may not act on this message.
    Forbidden,
    /// The room or message does not exist.
    NotFound,
    /// The message store or claim service could not be reached.
    StoreUnavailable,
    /// The connection has not authenticated.
    NotAuthenticated,
    /// The frame could not be decoded or was unexpected.
    Protocol,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not found",
            Self::StoreUnavailable => "store unavailable",
            Self::NotAuthenticated => "not authenticated",
            Self::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// Events the server sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// The connection is bound to the user.
    Authenticated {
        /// The user the connection now acts as.
        user_id: UserId,
    },

    /// The connection joined a room.
    Joined {
        /// The joined room.
        room_id: RoomId,
        /// The room's two authorized participants.
        participants: Vec<UserId>,
        /// Participants that currently have a live connection.
        online: Vec<UserId>,
    },

    /// The connection left a room.
    Left {
        /// The room that was left.
        room_id: RoomId,
    },

    /// Persisted messages of a room, ordered by `created_at`.
    History {
        /// The room the history belongs to.
        room_id: RoomId,
        /// Messages in store order.
        messages: Vec<ChatMessage>,
    },

    /// Direct response to the connection that submitted a message.
    MessageSent(ChatMessage),

    /// A message broadcast to the room's other connections.
    MessageReceived(ChatMessage),

    /// The receiver acknowledged a message.
    MessageDelivered {
        /// Room the message belongs to.
        room_id: RoomId,
        /// The sender's provisional id for the message.
        temp_id: TempId,
    },

    /// A message was removed by its sender.
    MessageDeleted {
        /// Room the message belonged to.
        room_id: RoomId,
        /// Canonical id of the removed message.
        message_id: MessageId,
    },

    /// A participant is typing.
    Typing {
        /// Room the participant is typing in.
        room_id: RoomId,
        /// The typing participant.
        user_id: UserId,
    },

    /// A participant went online or offline.
    PresenceChanged {
        /// The user whose presence changed.
        user_id: UserId,
        /// The new status.
        status: PresenceStatus,
    },

    /// A request from this connection failed.
    Error {
        /// Error class.
        code: ErrorCode,
        /// Human-readable description.
        reason: String,
        /// Set when the error answers a [`ClientEvent::SendMessage`].
        temp_id: Option<TempId>,
    },
}
