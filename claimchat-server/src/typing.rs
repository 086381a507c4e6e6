//! Typing relay.
//!
//! The server neither debounces nor expires typing signals; clients do both.
//! It only forwards `Typing` to the room, skipping every connection of the
//! typing user.

use claimchat_proto::event::ServerEvent;
use claimchat_proto::message::{RoomId, UserId};

use crate::claims::ClaimDirectory;
use crate::error::ChatError;
use crate::outbound::ConnectionId;
use crate::server::ChatState;
use crate::store::MessageStore;

/// Relays a typing signal from `conn` to the other participant's connections.
///
/// # Errors
///
/// [`ChatError::NotJoined`] if `conn` has not joined the room.
pub fn relay<S: MessageStore, D: ClaimDirectory>(
    state: &ChatState<S, D>,
    conn: ConnectionId,
    user_id: &UserId,
    room_id: &RoomId,
) -> Result<usize, ChatError> {
    if !state.rooms.is_joined(room_id, conn) {
        return Err(ChatError::NotJoined(room_id.clone()));
    }
    let event = ServerEvent::Typing {
        room_id: room_id.clone(),
        user_id: user_id.clone(),
    };
    let relayed = state
        .rooms
        .broadcast_where(&state.outbound, room_id, &event, |target| {
            state.outbound.user_of(target).as_ref() != Some(user_id)
        });
    tracing::trace!(room_id = %room_id, user_id = %user_id, relayed, "typing relayed");
    Ok(relayed)
}
