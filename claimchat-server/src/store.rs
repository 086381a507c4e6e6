//! Message store adapter.
//!
//! The durable store is an external collaborator. [`MessageStore`] is the
//! contract the messaging core consumes; [`InMemoryMessageStore`] is the
//! adapter used by the bundled server binary and by tests.

use std::collections::HashMap;

use claimchat_proto::message::{ChatMessage, MessageId, OutgoingMessage, RoomId, Timestamp};
use tokio::sync::RwLock;

/// Errors reported by a message store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for room messages.
///
/// Implementations assign the canonical [`MessageId`] and `created_at` on
/// persist, and return room history ordered by `created_at`.
pub trait MessageStore: Send + Sync + 'static {
    /// Persists a validated message, returning it enriched with id and timestamp.
    fn persist(
        &self,
        msg: &OutgoingMessage,
    ) -> impl std::future::Future<Output = Result<ChatMessage, StoreError>> + Send;

    /// Returns every message of a room, ordered by `created_at`.
    fn list_by_room(
        &self,
        room_id: &RoomId,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, StoreError>> + Send;

    /// Looks up a single message by its canonical id.
    fn find(
        &self,
        id: MessageId,
    ) -> impl std::future::Future<Output = Result<Option<ChatMessage>, StoreError>> + Send;

    /// Removes a message, returning `true` if it existed.
    fn delete(
        &self,
        id: MessageId,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;
}

/// First id handed out by a default [`InMemoryMessageStore`].
const DEFAULT_FIRST_ID: u64 = 1;

#[derive(Debug, Default)]
struct StoreInner {
    rooms: HashMap<RoomId, Vec<ChatMessage>>,
    locations: HashMap<MessageId, RoomId>,
    next_id: u64,
}

/// In-memory message store.
///
/// Rows are kept per room in append order. `created_at` never decreases
/// within a room, so append order is also `created_at` order.
pub struct InMemoryMessageStore {
    inner: RwLock<StoreInner>,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    /// Creates an empty store whose ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(DEFAULT_FIRST_ID)
    }

    /// Creates an empty store whose first assigned id is `first_id`.
    #[must_use]
    pub fn starting_at(first_id: u64) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                next_id: first_id,
                ..StoreInner::default()
            }),
        }
    }

    /// Returns the total number of stored messages.
    pub async fn len(&self) -> usize {
        self.inner.read().await.locations.len()
    }

    /// Returns `true` if no message is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl MessageStore for InMemoryMessageStore {
    async fn persist(&self, msg: &OutgoingMessage) -> Result<ChatMessage, StoreError> {
        let mut inner = self.inner.write().await;
        let id = MessageId::new(inner.next_id);
        inner.next_id += 1;

        let room = inner.rooms.entry(msg.room_id.clone()).or_default();
        let now = Timestamp::now();
        let created_at = room.last().map_or(now, |last| last.created_at.max(now));

        let stored = ChatMessage {
            id,
            temp_id: Some(msg.temp_id),
            room_id: msg.room_id.clone(),
            sender_id: msg.sender_id.clone(),
            receiver_id: msg.receiver_id.clone(),
            content: msg.content.clone(),
            created_at,
        };
        room.push(stored.clone());
        inner.locations.insert(id, msg.room_id.clone());
        drop(inner);

        Ok(stored)
    }

    async fn list_by_room(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.rooms.get(room_id).cloned().unwrap_or_default())
    }

    async fn find(&self, id: MessageId) -> Result<Option<ChatMessage>, StoreError> {
        let inner = self.inner.read().await;
        let found = inner
            .locations
            .get(&id)
            .and_then(|room_id| inner.rooms.get(room_id))
            .and_then(|msgs| msgs.iter().find(|m| m.id == id))
            .cloned();
        Ok(found)
    }

    async fn delete(&self, id: MessageId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(room_id) = inner.locations.remove(&id) else {
            return Ok(false);
        };
        if let Some(msgs) = inner.rooms.get_mut(&room_id) {
            msgs.retain(|m| m.id != id);
        }
        Ok(true)
    }
}
