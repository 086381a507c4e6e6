//! Message types for the `ClaimChat` wire protocol.
//!
//! A message starts life on the client as an [`OutgoingMessage`] carrying a
//! client-assigned [`TempId`]. Once the store persists it, the server hands
//! back a [`ChatMessage`] with the canonical [`MessageId`] and `created_at`,
//! echoing the `TempId` so the sender can reconcile its optimistic entry.

use serde::{Deserialize, Serialize};

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Identifies a user as issued by the external identity service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier from the token subject.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a room. A room id is the claim id it negotiates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    /// Creates a room identifier from a claim id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical message identifier assigned by the store on persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    /// Wraps a store-assigned identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated provisional identifier, used before the store assigns a
/// [`MessageId`]. Monotonically increasing per sender session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TempId(u64);

impl TempId {
    /// Wraps a client-assigned identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Error returned when a message or identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message content is empty or whitespace only.
    #[error("message content is empty")]
    EmptyContent,
    /// Message content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// A required identifier is empty.
    #[error("{0} must not be empty")]
    EmptyId(&'static str),
    /// Sender and receiver are the same user.
    #[error("sender and receiver must be distinct users")]
    SelfAddressed,
}

/// A message as submitted by the sender, before the store has seen it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Room (claim) the message belongs to.
    pub room_id: RoomId,
    /// The submitting user.
    pub sender_id: UserId,
    /// The other participant of the room.
    pub receiver_id: UserId,
    /// Message text.
    pub content: String,
    /// Client-assigned provisional identifier.
    pub temp_id: TempId,
}

impl OutgoingMessage {
    /// Validates the message before it is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyContent`] for blank text,
    /// [`ValidationError::TooLarge`] above [`MAX_CONTENT_SIZE`],
    /// [`ValidationError::EmptyId`] for a missing room, sender or receiver,
    /// and [`ValidationError::SelfAddressed`] if sender equals receiver.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.room_id.is_empty() {
            return Err(ValidationError::EmptyId("room id"));
        }
        if self.sender_id.is_empty() {
            return Err(ValidationError::EmptyId("sender id"));
        }
        if self.receiver_id.is_empty() {
            return Err(ValidationError::EmptyId("receiver id"));
        }
        if self.sender_id == self.receiver_id {
            return Err(ValidationError::SelfAddressed);
        }
        if self.content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        let size = self.content.len();
        if size > MAX_CONTENT_SIZE {
            return Err(ValidationError::TooLarge {
                size,
                max: MAX_CONTENT_SIZE,
            });
        }
        Ok(())
    }
}

/// A persisted message enriched with its canonical id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Store-assigned identifier.
    pub id: MessageId,
    /// Echo of the sender's provisional id, if the message came through a live send.
    pub temp_id: Option<TempId>,
    /// Room (claim) the message belongs to.
    pub room_id: RoomId,
    /// Who sent the message.
    pub sender_id: UserId,
    /// Who the message is addressed to.
    pub receiver_id: UserId,
    /// Message text.
    pub content: String,
    /// Store-assigned creation time; the total order within a room.
    pub created_at: Timestamp,
}

/// Sender-side delivery status of a message.
///
/// The status is a client projection and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Submitted, waiting for the server to persist it.
    Sending,
    /// Persisted and broadcast to the room.
    Sent,
    /// Acknowledged by at least one of the receiver's connections.
    Delivered,
    /// The send was rejected; the reason is shown to the user.
    Failed(String),
}

impl MessageStatus {
    /// Position in the `sending -> sent -> delivered` progression.
    ///
    /// `Failed` ranks with `Sending`: only an unconfirmed message can fail.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Sending | Self::Failed(_) => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sending => write!(f, "sending"),
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
