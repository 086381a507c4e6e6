//! Claim directory adapter.
//!
//! The claim/authorization service decides which two users negotiate a
//! claim. The messaging core only asks it who the participants of a room
//! are; [`InMemoryClaimDirectory`] serves that answer from a static table.

use std::collections::HashMap;

use claimchat_proto::message::{RoomId, UserId};
use tokio::sync::RwLock;

/// Errors reported by the claim directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// No claim exists for the room id.
    #[error("claim {0} not found")]
    NotFound(RoomId),
    /// The claim exists but may not be used for messaging.
    #[error("claim {0} is not open for messaging")]
    Unauthorized(RoomId),
    /// The claim service could not be reached.
    #[error("claim service unavailable: {0}")]
    Unavailable(String),
}

/// The two users allowed to act in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participants {
    first: UserId,
    second: UserId,
}

impl Participants {
    /// Creates a participant pair.
    ///
    /// Returns `None` if the ids are equal or either is empty; a room always
    /// has two distinct participants.
    #[must_use]
    pub fn new(first: UserId, second: UserId) -> Option<Self> {
        if first.is_empty() || second.is_empty() || first == second {
            return None;
        }
        Some(Self { first, second })
    }

    /// Returns `true` if the user is one of the two participants.
    #[must_use]
    pub fn contains(&self, user: &UserId) -> bool {
        self.first == *user || self.second == *user
    }

    /// Returns the participant that is not `user`, if `user` is a participant.
    #[must_use]
    pub fn other(&self, user: &UserId) -> Option<&UserId> {
        if self.first == *user {
            Some(&self.second)
        } else if self.second == *user {
            Some(&self.first)
        } else {
            None
        }
    }

    /// Returns both participants in their original order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<UserId> {
        vec![self.first.clone(), self.second.clone()]
    }

    /// Iterates over both participants.
    pub fn iter(&self) -> impl Iterator<Item = &UserId> {
        [&self.first, &self.second].into_iter()
    }
}

/// Resolves the participants of a room.
pub trait ClaimDirectory: Send + Sync + 'static {
    /// Returns the two participants of the claim backing `room_id`.
    fn participants_of(
        &self,
        room_id: &RoomId,
    ) -> impl std::future::Future<Output = Result<Participants, ClaimError>> + Send;
}

/// In-memory claim directory seeded at startup.
pub struct InMemoryClaimDirectory {
    claims: RwLock<HashMap<RoomId, Participants>>,
}

impl Default for InMemoryClaimDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClaimDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            claims: RwLock::new(HashMap::new()),
        }
    }

    /// Records the participants of a claim, replacing any previous pair.
    pub async fn insert(&self, room_id: RoomId, participants: Participants) {
        self.claims.write().await.insert(room_id, participants);
    }

    /// Removes a claim, returning `true` if it existed.
    pub async fn remove(&self, room_id: &RoomId) -> bool {
        self.claims.write().await.remove(room_id).is_some()
    }
}

impl ClaimDirectory for InMemoryClaimDirectory {
    async fn participants_of(&self, room_id: &RoomId) -> Result<Participants, ClaimError> {
        self.claims
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| ClaimError::NotFound(room_id.clone()))
    }
}
