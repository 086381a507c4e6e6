//! Client-side typing signals.
//!
//! Outgoing: [`TypingDebouncer`] turns a burst of keystrokes into a single
//! `Typing` emission once the user pauses for the quiet period.
//!
//! Incoming: [`TypingIndicator`] keeps a per-(room, user) expiry timer. Each
//! relayed signal aborts the pending timer and schedules a new one; when a
//! timer fires without a refresh, a [`TypingEvent::Stopped`] is emitted. The
//! wire has no "stopped typing" message, so expiry is the only way a flag
//! clears.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use claimchat_proto::message::{RoomId, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Trailing-edge debouncer for outgoing typing signals, one timer per room.
pub struct TypingDebouncer {
    quiet: Duration,
    pending: Mutex<HashMap<RoomId, JoinHandle<()>>>,
    tx: mpsc::UnboundedSender<RoomId>,
}

impl TypingDebouncer {
    /// Creates a debouncer and the channel its emissions arrive on.
    #[must_use]
    pub fn new(quiet: Duration) -> (Self, mpsc::UnboundedReceiver<RoomId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            quiet,
            pending: Mutex::new(HashMap::new()),
            tx,
        };
        (debouncer, rx)
    }

    /// Records a keystroke in `room_id`.
    ///
    /// The room is emitted once no further keystroke arrives for the quiet
    /// period. Must be called from within a tokio runtime.
    pub fn keystroke(&self, room_id: &RoomId) {
        let tx = self.tx.clone();
        let quiet = self.quiet;
        let room = room_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            let _ = tx.send(room);
        });
        if let Some(previous) = self.pending.lock().insert(room_id.clone(), handle) {
            previous.abort();
        }
    }

    /// Drops a pending emission for `room_id`, e.g. after the message was sent.
    pub fn cancel(&self, room_id: &RoomId) {
        if let Some(handle) = self.pending.lock().remove(room_id) {
            handle.abort();
        }
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        for (_, handle) in self.pending.lock().drain() {
            handle.abort();
        }
    }
}

/// Change in a remote user's typing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingEvent {
    /// The user started typing in the room.
    Started {
        /// Room the user is typing in.
        room_id: RoomId,
        /// The typing user.
        user_id: UserId,
    },
    /// The user's typing signal expired or was cleared.
    Stopped {
        /// Room the user was typing in.
        room_id: RoomId,
        /// The user who stopped.
        user_id: UserId,
    },
}

type TimerKey = (RoomId, UserId);

#[derive(Default)]
struct Timers {
    next_generation: u64,
    active: HashMap<TimerKey, (u64, JoinHandle<()>)>,
}

/// Receiver-side typing flags with per-(room, user) expiry.
pub struct TypingIndicator {
    expiry: Duration,
    timers: Arc<Mutex<Timers>>,
    tx: mpsc::UnboundedSender<TypingEvent>,
}

impl TypingIndicator {
    /// Creates an indicator and the channel its transitions arrive on.
    #[must_use]
    pub fn new(expiry: Duration) -> (Self, mpsc::UnboundedReceiver<TypingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let indicator = Self {
            expiry,
            timers: Arc::new(Mutex::new(Timers::default())),
            tx,
        };
        (indicator, rx)
    }

    /// Applies a relayed typing signal.
    ///
    /// Emits [`TypingEvent::Started`] if the user was not already typing and
    /// restarts the expiry timer either way. Must be called from within a
    /// tokio runtime.
    pub fn refresh(&self, room_id: &RoomId, user_id: &UserId) {
        let key = (room_id.clone(), user_id.clone());
        let mut timers = self.timers.lock();
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let handle = tokio::spawn(expire(
            Arc::clone(&self.timers),
            key.clone(),
            generation,
            self.expiry,
            self.tx.clone(),
        ));

        match timers.active.insert(key, (generation, handle)) {
            Some((_, previous)) => previous.abort(),
            None => {
                let _ = self.tx.send(TypingEvent::Started {
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                });
            }
        }
    }

    /// Whether `user_id` is currently flagged as typing in `room_id`.
    #[must_use]
    pub fn is_typing(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        self.timers
            .lock()
            .active
            .contains_key(&(room_id.clone(), user_id.clone()))
    }

    /// Users currently typing in `room_id`, sorted.
    #[must_use]
    pub fn typing_in(&self, room_id: &RoomId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .timers
            .lock()
            .active
            .keys()
            .filter(|(room, _)| room == room_id)
            .map(|(_, user)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Clears a typing flag early, e.g. when the user's message arrives.
    ///
    /// Returns `true` and emits [`TypingEvent::Stopped`] if the flag was set.
    pub fn clear(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        let removed = self
            .timers
            .lock()
            .active
            .remove(&(room_id.clone(), user_id.clone()));
        let Some((_, handle)) = removed else {
            return false;
        };
        handle.abort();
        let _ = self.tx.send(TypingEvent::Stopped {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
        });
        true
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.timers.lock().active.drain() {
            handle.abort();
        }
    }
}

/// Sleeps for `expiry`, then clears the flag unless a newer refresh replaced
/// this timer in the meantime.
async fn expire(
    timers: Arc<Mutex<Timers>>,
    key: TimerKey,
    generation: u64,
    expiry: Duration,
    tx: mpsc::UnboundedSender<TypingEvent>,
) {
    tokio::time::sleep(expiry).await;
    let mut guard = timers.lock();
    if guard
        .active
        .get(&key)
        .is_none_or(|(current, _)| *current != generation)
    {
        return;
    }
    guard.active.remove(&key);
    drop(guard);
    let (room_id, user_id) = key;
    tracing::trace!(room_id = %room_id, user_id = %user_id, "typing expired");
    let _ = tx.send(TypingEvent::Stopped { room_id, user_id });
}
