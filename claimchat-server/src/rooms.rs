//! Room registry: which connections are subscribed to which claim room.
//!
//! A room is created implicitly on its first join and lives for the life of
//! the process. The first join resolves the room's two participants through
//! the [`ClaimDirectory`] and caches them; later joins only check the cache.
//! Connection membership is ephemeral and rebuilt on every (re)join.
//!
//! Rooms are held in a sharded map, so joins, leaves and broadcasts on one
//! room never wait on an unrelated busy room.

use std::collections::HashSet;

use axum::body::Bytes;
use claimchat_proto::event::ServerEvent;
use claimchat_proto::message::{RoomId, UserId};
use dashmap::DashMap;

use crate::claims::{ClaimDirectory, Participants};
use crate::error::ChatError;
use crate::outbound::{ConnectionId, OutboundRegistry, encode_frame};

/// Registry state of one room.
#[derive(Debug)]
struct RoomEntry {
    /// The two users allowed in the room, cached from the claim directory.
    participants: Participants,
    /// Connections currently subscribed to the room.
    connections: HashSet<ConnectionId>,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The room's participants.
    pub participants: Participants,
    /// `false` if the connection was already joined.
    pub newly_joined: bool,
}

/// In-memory room registry.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, RoomEntry>,
    rooms_by_user: DashMap<UserId, HashSet<RoomId>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Creates a new, empty room registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            rooms_by_user: DashMap::new(),
        }
    }

    /// Subscribes `conn`, acting as `user_id`, to a room.
    ///
    /// Idempotent: joining twice reports `newly_joined: false`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotParticipant`] if the user is not one of the
    /// room's two participants (the connection is not added), or
    /// [`ChatError::Claim`] if the directory cannot resolve the room.
    pub async fn join<D: ClaimDirectory>(
        &self,
        directory: &D,
        room_id: &RoomId,
        conn: ConnectionId,
        user_id: &UserId,
    ) -> Result<JoinOutcome, ChatError> {
        let participants = match self.participants(room_id) {
            Some(cached) => cached,
            None => {
                let resolved = directory.participants_of(room_id).await?;
                self.cache_participants(room_id, resolved)
            }
        };

        if !participants.contains(user_id) {
            return Err(ChatError::NotParticipant(room_id.clone()));
        }

        let newly_joined = self
            .rooms
            .get_mut(room_id)
            .is_some_and(|mut entry| entry.connections.insert(conn));

        Ok(JoinOutcome {
            participants,
            newly_joined,
        })
    }

    /// Unsubscribes a connection from a room. Returns `true` if it was joined.
    pub fn leave(&self, room_id: &RoomId, conn: ConnectionId) -> bool {
        self.rooms
            .get_mut(room_id)
            .is_some_and(|mut entry| entry.connections.remove(&conn))
    }

    /// Unsubscribes a connection from every listed room.
    pub fn remove_connection<'a>(
        &self,
        conn: ConnectionId,
        rooms: impl IntoIterator<Item = &'a RoomId>,
    ) {
        for room_id in rooms {
            self.leave(room_id, conn);
        }
    }

    /// Returns `true` if the connection is subscribed to the room.
    #[must_use]
    pub fn is_joined(&self, room_id: &RoomId, conn: ConnectionId) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|entry| entry.connections.contains(&conn))
    }

    /// Returns the cached participants of a room, if it has been joined before.
    #[must_use]
    pub fn participants(&self, room_id: &RoomId) -> Option<Participants> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.participants.clone())
    }

    /// Returns a snapshot of the connections subscribed to a room.
    #[must_use]
    pub fn connections(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.connections.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the known rooms in which `user_id` is a participant.
    #[must_use]
    pub fn rooms_of_user(&self, user_id: &UserId) -> Vec<RoomId> {
        self.rooms_by_user
            .get(user_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Delivers an event to every subscribed connection except `exclude`.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn broadcast(
        &self,
        outbound: &OutboundRegistry,
        room_id: &RoomId,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        self.broadcast_where(outbound, room_id, event, |conn| Some(conn) != exclude)
    }

    /// Delivers an event to the subscribed connections accepted by `keep`.
    ///
    /// The event is encoded once. Failed sends to stale connections are
    /// swallowed.
    pub fn broadcast_where(
        &self,
        outbound: &OutboundRegistry,
        room_id: &RoomId,
        event: &ServerEvent,
        keep: impl Fn(ConnectionId) -> bool,
    ) -> usize {
        let targets: Vec<ConnectionId> = self
            .connections(room_id)
            .into_iter()
            .filter(|conn| keep(*conn))
            .collect();
        if targets.is_empty() {
            return 0;
        }
        let Some(frame) = encode_frame(event) else {
            return 0;
        };
        deliver(outbound, &targets, &frame)
    }

    /// Stores the participants of a newly resolved room and indexes them.
    ///
    /// If another join cached the room first, the existing pair wins.
    fn cache_participants(&self, room_id: &RoomId, resolved: Participants) -> Participants {
        let participants = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| RoomEntry {
                participants: resolved,
                connections: HashSet::new(),
            })
            .participants
            .clone();

        for user in participants.iter() {
            self.rooms_by_user
                .entry(user.clone())
                .or_default()
                .insert(room_id.clone());
        }
        tracing::debug!(room_id = %room_id, "cached room participants");
        participants
    }
}

fn deliver(outbound: &OutboundRegistry, targets: &[ConnectionId], frame: &Bytes) -> usize {
    targets
        .iter()
        .filter(|conn| outbound.send_frame(**conn, frame.clone()))
        .count()
}
