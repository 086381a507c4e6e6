//! Delivery protocol: submit, acknowledge, delete and history.
//!
//! A submission is validated, persisted, answered to the initiating
//! connection with `MessageSent`, and only then broadcast to the room's
//! other connections as `MessageReceived`. A receiver's `AckDelivered` is
//! routed back to the sender's connections as `MessageDelivered`.
//!
//! The [`DeliveryLedger`] remembers recently accepted temp ids per
//! (room, sender) so a resubmission is answered with the original message
//! instead of persisting a duplicate. A temp id is reserved before the store
//! is called, so two connections racing with the same temp id persist it
//! once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use claimchat_proto::event::ServerEvent;
use claimchat_proto::message::{ChatMessage, MessageId, OutgoingMessage, RoomId, TempId, UserId};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::claims::{ClaimDirectory, Participants};
use crate::error::ChatError;
use crate::outbound::ConnectionId;
use crate::server::ChatState;
use crate::store::MessageStore;

#[derive(Debug)]
struct Accepted {
    temp_id: TempId,
    message: ChatMessage,
    at: Instant,
}

/// Ledger state of one (room, sender) pair.
#[derive(Debug, Default)]
struct SenderSlot {
    accepted: VecDeque<Accepted>,
    /// Temp ids being persisted right now. Waiters are woken when the
    /// reservation's sender half is dropped.
    in_flight: HashMap<TempId, watch::Receiver<()>>,
}

impl SenderSlot {
    fn is_idle(&self) -> bool {
        self.accepted.is_empty() && self.in_flight.is_empty()
    }
}

type SlotKey = (RoomId, UserId);

/// Outcome of [`DeliveryLedger::claim`].
pub enum Claim<'a> {
    /// The temp id was accepted within the window; answer with this message.
    Accepted(ChatMessage),
    /// Another submission of the temp id is persisting. Wait on the receiver
    /// until it closes, then claim again.
    InFlight(watch::Receiver<()>),
    /// The caller owns the temp id until the reservation completes or drops.
    Reserved(Reservation<'a>),
}

/// Exclusive right to persist one temp id.
///
/// Dropping it without [`complete`](Self::complete) releases the temp id,
/// so a failed persist can be retried.
pub struct Reservation<'a> {
    ledger: &'a DeliveryLedger,
    key: SlotKey,
    temp_id: TempId,
    _done: watch::Sender<()>,
}

impl Reservation<'_> {
    /// Records the persisted message under the reserved temp id.
    pub fn complete(self, message: &ChatMessage) {
        if let Some(mut slot) = self.ledger.slots.get_mut(&self.key) {
            slot.accepted.push_back(Accepted {
                temp_id: self.temp_id,
                message: message.clone(),
                at: Instant::now(),
            });
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(mut slot) = self.ledger.slots.get_mut(&self.key) {
            slot.in_flight.remove(&self.temp_id);
        }
        self.ledger.slots.remove_if(&self.key, |_, slot| slot.is_idle());
    }
}

/// Recently accepted messages, keyed by (room, sender).
pub struct DeliveryLedger {
    window: Duration,
    slots: DashMap<SlotKey, SenderSlot>,
}

impl DeliveryLedger {
    /// Creates a ledger that remembers temp ids for `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: DashMap::new(),
        }
    }

    /// How long accepted temp ids are remembered.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Looks up a temp id and reserves it if nobody has.
    ///
    /// The lookup and the reservation happen under the pair's entry lock.
    pub fn claim(&self, room_id: &RoomId, sender_id: &UserId, temp_id: TempId) -> Claim<'_> {
        let key = (room_id.clone(), sender_id.clone());
        let mut slot = self.slots.entry(key.clone()).or_default();
        prune(&mut slot.accepted, self.window);

        if let Some(entry) = slot.accepted.iter().find(|entry| entry.temp_id == temp_id) {
            return Claim::Accepted(entry.message.clone());
        }
        if let Some(pending) = slot.in_flight.get(&temp_id) {
            return Claim::InFlight(pending.clone());
        }
        let (done, pending) = watch::channel(());
        slot.in_flight.insert(temp_id, pending);
        drop(slot);
        Claim::Reserved(Reservation {
            ledger: self,
            key,
            temp_id,
            _done: done,
        })
    }

    /// Returns the message already accepted for this temp id, if any.
    #[must_use]
    pub fn lookup(&self, room_id: &RoomId, sender_id: &UserId, temp_id: TempId) -> Option<ChatMessage> {
        let mut slot = self.slots.get_mut(&(room_id.clone(), sender_id.clone()))?;
        prune(&mut slot.accepted, self.window);
        slot.accepted
            .iter()
            .find(|entry| entry.temp_id == temp_id)
            .map(|entry| entry.message.clone())
    }

    /// Forgets a message, so a later resubmission of its temp id is not
    /// answered with a deleted message.
    pub fn forget(&self, message: &ChatMessage) {
        let key = (message.room_id.clone(), message.sender_id.clone());
        if let Some(mut slot) = self.slots.get_mut(&key) {
            slot.accepted.retain(|entry| entry.message.id != message.id);
        }
        self.slots.remove_if(&key, |_, slot| slot.is_idle());
    }

    /// Drops expired entries everywhere and removes idle pairs.
    pub fn sweep(&self) {
        self.slots.retain(|_, slot| {
            prune(&mut slot.accepted, self.window);
            !slot.is_idle()
        });
    }

    /// Number of (room, sender) pairs currently tracked.
    #[must_use]
    pub fn tracked_pairs(&self) -> usize {
        self.slots.len()
    }
}

/// Drops entries older than the window. Entries are kept in arrival order.
fn prune(accepted: &mut VecDeque<Accepted>, window: Duration) {
    let now = Instant::now();
    while accepted
        .front()
        .is_some_and(|entry| now.duration_since(entry.at) > window)
    {
        accepted.pop_front();
    }
}

/// Accepts a message from `conn`, acting as `user_id`.
///
/// On success the initiator has been sent `MessageSent` and the room's other
/// connections `MessageReceived`, in that order. A resubmitted temp id is
/// answered with the original message and nothing is persisted or broadcast.
///
/// # Errors
///
/// Validation failures, a sender that is not the connection's user, an
/// unjoined room, a receiver outside the room, or a store failure. Nothing
/// is retried.
pub async fn submit<S: MessageStore, D: ClaimDirectory>(
    state: &ChatState<S, D>,
    conn: ConnectionId,
    user_id: &UserId,
    msg: OutgoingMessage,
) -> Result<ChatMessage, ChatError> {
    msg.validate()?;
    if msg.sender_id != *user_id {
        return Err(ChatError::SenderMismatch);
    }
    let participants = joined_participants(state, conn, &msg.room_id)?;
    if !participants.contains(&msg.receiver_id) {
        return Err(ChatError::NotParticipant(msg.room_id));
    }

    let reservation = loop {
        match state.ledger.claim(&msg.room_id, &msg.sender_id, msg.temp_id) {
            Claim::Accepted(original) => {
                tracing::debug!(
                    room_id = %msg.room_id,
                    temp_id = %msg.temp_id,
                    message_id = %original.id,
                    "duplicate submission answered from ledger"
                );
                state
                    .outbound
                    .send(conn, &ServerEvent::MessageSent(original.clone()));
                return Ok(original);
            }
            Claim::InFlight(mut pending) => {
                tracing::debug!(temp_id = %msg.temp_id, "waiting for in-flight submission");
                while pending.changed().await.is_ok() {}
            }
            Claim::Reserved(reservation) => break reservation,
        }
    };

    let stored = state.store.persist(&msg).await?;
    reservation.complete(&stored);
    tracing::info!(
        room_id = %stored.room_id,
        sender_id = %stored.sender_id,
        temp_id = %msg.temp_id,
        message_id = %stored.id,
        "message persisted"
    );

    state
        .outbound
        .send(conn, &ServerEvent::MessageSent(stored.clone()));
    state.rooms.broadcast(
        &state.outbound,
        &stored.room_id,
        &ServerEvent::MessageReceived(stored.clone()),
        Some(conn),
    );
    Ok(stored)
}

/// Runs [`submit`] on its own task and waits for it.
///
/// The submission outlives the caller: if the connection task goes away
/// mid-persist, the message is still stored, recorded and broadcast.
///
/// # Errors
///
/// Whatever [`submit`] returns, or [`ChatError::Interrupted`] if the task
/// itself failed.
pub async fn submit_detached<S: MessageStore, D: ClaimDirectory>(
    state: Arc<ChatState<S, D>>,
    conn: ConnectionId,
    user_id: UserId,
    msg: OutgoingMessage,
) -> Result<ChatMessage, ChatError> {
    tokio::spawn(async move { submit(&state, conn, &user_id, msg).await })
        .await
        .map_err(|e| ChatError::Interrupted(e.to_string()))?
}

/// Routes a receiver's acknowledgment to the sender's connections.
///
/// The sender is the room's other participant. Returns how many sender
/// connections were notified; zero if none is joined right now.
///
/// # Errors
///
/// [`ChatError::NotJoined`] if `conn` has not joined the room.
pub fn acknowledge<S: MessageStore, D: ClaimDirectory>(
    state: &ChatState<S, D>,
    conn: ConnectionId,
    user_id: &UserId,
    room_id: &RoomId,
    temp_id: TempId,
) -> Result<usize, ChatError> {
    let participants = joined_participants(state, conn, room_id)?;
    let Some(sender) = participants.other(user_id) else {
        return Err(ChatError::NotParticipant(room_id.clone()));
    };

    let event = ServerEvent::MessageDelivered {
        room_id: room_id.clone(),
        temp_id,
    };
    let notified = state
        .rooms
        .broadcast_where(&state.outbound, room_id, &event, |target| {
            state.outbound.user_of(target).as_ref() == Some(sender)
        });
    tracing::debug!(room_id = %room_id, temp_id = %temp_id, notified, "delivery acknowledged");
    Ok(notified)
}

/// Deletes a message on behalf of its sender.
///
/// Every connection joined to the message's room is told, and so is the
/// requesting connection even if it has not joined.
///
/// # Errors
///
/// [`ChatError::MessageNotFound`] for an unknown id, [`ChatError::Forbidden`]
/// if `user_id` did not send the message, or a store failure.
pub async fn delete<S: MessageStore, D: ClaimDirectory>(
    state: &ChatState<S, D>,
    conn: ConnectionId,
    user_id: &UserId,
    message_id: MessageId,
) -> Result<(), ChatError> {
    let message = state
        .store
        .find(message_id)
        .await?
        .ok_or(ChatError::MessageNotFound(message_id))?;
    if message.sender_id != *user_id {
        return Err(ChatError::Forbidden(message_id));
    }
    if !state.store.delete(message_id).await? {
        return Err(ChatError::MessageNotFound(message_id));
    }
    state.ledger.forget(&message);
    tracing::info!(room_id = %message.room_id, message_id = %message_id, "message deleted");

    let event = ServerEvent::MessageDeleted {
        room_id: message.room_id.clone(),
        message_id,
    };
    state
        .rooms
        .broadcast(&state.outbound, &message.room_id, &event, Some(conn));
    state.outbound.send(conn, &event);
    Ok(())
}

/// Sends the persisted history of a joined room to `conn`.
///
/// # Errors
///
/// [`ChatError::NotJoined`] if `conn` has not joined the room, or a store
/// failure.
pub async fn history<S: MessageStore, D: ClaimDirectory>(
    state: &ChatState<S, D>,
    conn: ConnectionId,
    room_id: &RoomId,
) -> Result<(), ChatError> {
    joined_participants(state, conn, room_id)?;
    let messages = state.store.list_by_room(room_id).await?;
    tracing::debug!(room_id = %room_id, count = messages.len(), "sending history");
    state.outbound.send(
        conn,
        &ServerEvent::History {
            room_id: room_id.clone(),
            messages,
        },
    );
    Ok(())
}

fn joined_participants<S: MessageStore, D: ClaimDirectory>(
    state: &ChatState<S, D>,
    conn: ConnectionId,
    room_id: &RoomId,
) -> Result<Participants, ChatError> {
    if !state.rooms.is_joined(room_id, conn) {
        return Err(ChatError::NotJoined(room_id.clone()));
    }
    state
        .rooms
        .participants(room_id)
        .ok_or_else(|| ChatError::NotJoined(room_id.clone()))
}
