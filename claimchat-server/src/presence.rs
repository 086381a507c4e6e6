//! Presence tracking: which users have at least one live connection.
//!
//! A user is online iff their connection set is non-empty. Status is never
//! set directly; [`PresenceTracker::mark_online`] and
//! [`PresenceTracker::mark_offline`] report a transition only when the set
//! crosses the empty/non-empty boundary. The `_with` variants report the
//! transition while the user's entry is locked, which keeps announcements of
//! one user in order. Callbacks must not touch the tracker.

use std::collections::HashSet;

use claimchat_proto::event::ServerEvent;
use claimchat_proto::message::UserId;
use claimchat_proto::presence::PresenceStatus;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::outbound::{ConnectionId, OutboundRegistry, encode_frame};
use crate::rooms::RoomRegistry;

/// Per-user connection sets.
pub struct PresenceTracker {
    sessions: DashMap<UserId, HashSet<ConnectionId>>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    /// Creates a tracker with every user offline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Adds a connection to the user's set.
    ///
    /// Returns `Some(Online)` if this is the user's first live connection.
    pub fn mark_online(&self, user_id: &UserId, conn: ConnectionId) -> Option<PresenceStatus> {
        self.mark_online_with(user_id, conn, |_| {})
    }

    /// Like [`mark_online`](Self::mark_online), running `on_change` for a
    /// transition while the user's entry is still held.
    ///
    /// Transitions of one user are reported in the order they happen, so
    /// peers never see an older status after a newer one.
    pub fn mark_online_with(
        &self,
        user_id: &UserId,
        conn: ConnectionId,
        on_change: impl FnOnce(PresenceStatus),
    ) -> Option<PresenceStatus> {
        let mut set = self.sessions.entry(user_id.clone()).or_default();
        let was_empty = set.is_empty();
        set.insert(conn);
        if !was_empty {
            return None;
        }
        on_change(PresenceStatus::Online);
        drop(set);
        Some(PresenceStatus::Online)
    }

    /// Removes a connection from the user's set.
    ///
    /// Returns `Some(Offline)` if this removed the user's last connection.
    /// Removing an unknown connection is a no-op.
    pub fn mark_offline(&self, user_id: &UserId, conn: ConnectionId) -> Option<PresenceStatus> {
        self.mark_offline_with(user_id, conn, |_| {})
    }

    /// Like [`mark_offline`](Self::mark_offline), running `on_change` for a
    /// transition while the user's entry is still held.
    pub fn mark_offline_with(
        &self,
        user_id: &UserId,
        conn: ConnectionId,
        on_change: impl FnOnce(PresenceStatus),
    ) -> Option<PresenceStatus> {
        let Entry::Occupied(mut entry) = self.sessions.entry(user_id.clone()) else {
            return None;
        };
        if !entry.get_mut().remove(&conn) || !entry.get().is_empty() {
            return None;
        }
        on_change(PresenceStatus::Offline);
        entry.remove();
        Some(PresenceStatus::Offline)
    }

    /// Current status of a user.
    #[must_use]
    pub fn status(&self, user_id: &UserId) -> PresenceStatus {
        if self.connection_count(user_id) > 0 {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        }
    }

    /// Returns `true` if the user has at least one live connection.
    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.status(user_id) == PresenceStatus::Online
    }

    /// Number of live connections of a user.
    #[must_use]
    pub fn connection_count(&self, user_id: &UserId) -> usize {
        self.sessions.get(user_id).map_or(0, |set| set.len())
    }

    /// Filters `users` down to the ones currently online, keeping order.
    pub fn online_among<'a>(&self, users: impl IntoIterator<Item = &'a UserId>) -> Vec<UserId> {
        users
            .into_iter()
            .filter(|user| self.is_online(user))
            .cloned()
            .collect()
    }
}

/// Broadcasts a presence transition to everyone sharing a room with `user_id`.
///
/// Each interested connection receives the event once, however many rooms
/// it shares with the user. The user's own connections are skipped.
pub fn announce(
    rooms: &RoomRegistry,
    outbound: &OutboundRegistry,
    user_id: &UserId,
    status: PresenceStatus,
) -> usize {
    let targets: HashSet<ConnectionId> = rooms
        .rooms_of_user(user_id)
        .iter()
        .flat_map(|room_id| rooms.connections(room_id))
        .filter(|conn| outbound.user_of(*conn).as_ref() != Some(user_id))
        .collect();
    if targets.is_empty() {
        return 0;
    }

    tracing::info!(user_id = %user_id, status = %status, peers = targets.len(), "presence changed");
    let event = ServerEvent::PresenceChanged {
        user_id: user_id.clone(),
        status,
    };
    let Some(frame) = encode_frame(&event) else {
        return 0;
    };
    targets
        .into_iter()
        .filter(|conn| outbound.send_frame(*conn, frame.clone()))
        .count()
}
