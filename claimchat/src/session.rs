//! A user's chat session on top of a [`ChatTransport`].
//!
//! The session owns the per-room [`ConversationView`]s, the known
//! participants and presence, and the typing flags of remote users. It turns
//! raw [`ServerEvent`]s into [`SessionEvent`]s for the UI, acknowledges
//! messages from the other participant as they arrive, and restores room
//! subscriptions after a reconnect.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use claimchat_proto::event::{ClientEvent, ErrorCode, ServerEvent};
use claimchat_proto::message::{
    ChatMessage, MessageId, MessageStatus, OutgoingMessage, RoomId, TempId, Timestamp, UserId,
};
use claimchat_proto::presence::PresenceStatus;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{ChatTransport, ClientError};
use crate::typing::{TypingEvent, TypingIndicator};
use crate::view::ConversationView;

/// Results forwarded by [`ChatSession::pump_events`].
pub type EventStream = mpsc::UnboundedReceiver<Result<SessionEvent, ClientError>>;

/// Something the UI should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A room subscription was confirmed.
    Joined {
        /// The joined room.
        room_id: RoomId,
        /// The room's participants.
        participants: Vec<UserId>,
        /// Participants online at join time.
        online: Vec<UserId>,
    },
    /// A room subscription ended.
    Left {
        /// The room that was left.
        room_id: RoomId,
    },
    /// Persisted history was merged into a room's view.
    HistoryLoaded {
        /// The room whose history arrived.
        room_id: RoomId,
        /// Entries that were not in the view before.
        added: usize,
    },
    /// A message not seen before was added to a view.
    MessageReceived(ChatMessage),
    /// One of the local user's messages changed status.
    StatusChanged {
        /// Room the message belongs to.
        room_id: RoomId,
        /// The message's provisional id.
        temp_id: TempId,
        /// The new status.
        status: MessageStatus,
    },
    /// A message was removed from a view.
    MessageDeleted {
        /// Room the message belonged to.
        room_id: RoomId,
        /// The removed message.
        message_id: MessageId,
    },
    /// A participant went online or offline.
    PresenceChanged {
        /// The user whose presence changed.
        user_id: UserId,
        /// The new status.
        status: PresenceStatus,
    },
    /// The server rejected a request.
    Failed {
        /// Error class.
        code: ErrorCode,
        /// Server-provided description.
        reason: String,
        /// Set when the rejected request was a message submission.
        temp_id: Option<TempId>,
    },
}

/// Hands out monotonically increasing temp ids.
#[derive(Debug)]
pub struct TempIdGenerator {
    next: AtomicU64,
}

impl TempIdGenerator {
    /// Starts at `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> TempId {
        TempId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TempIdGenerator {
    /// Seeds from the wall clock so a new session does not reuse the temp
    /// ids of a previous one.
    fn default() -> Self {
        Self::starting_at(Timestamp::now().as_millis())
    }
}

#[derive(Default)]
struct SessionState {
    views: HashMap<RoomId, ConversationView>,
    participants: HashMap<RoomId, Vec<UserId>>,
    online: HashSet<UserId>,
    joined: BTreeSet<RoomId>,
}

/// A user's chat session.
pub struct ChatSession<T: ChatTransport> {
    me: UserId,
    transport: RwLock<Arc<T>>,
    state: Mutex<SessionState>,
    temp_ids: TempIdGenerator,
    typing: TypingIndicator,
}

impl<T: ChatTransport> ChatSession<T> {
    /// Creates a session for `me` over an authenticated transport.
    ///
    /// Remote typing flags expire after `typing_expiry`; their transitions
    /// arrive on the returned receiver.
    #[must_use]
    pub fn new(
        me: UserId,
        transport: T,
        typing_expiry: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TypingEvent>) {
        let (typing, typing_rx) = TypingIndicator::new(typing_expiry);
        let session = Self {
            me,
            transport: RwLock::new(Arc::new(transport)),
            state: Mutex::new(SessionState::default()),
            temp_ids: TempIdGenerator::default(),
            typing,
        };
        (session, typing_rx)
    }

    /// Replaces the temp id generator.
    #[must_use]
    pub fn with_temp_ids(mut self, temp_ids: TempIdGenerator) -> Self {
        self.temp_ids = temp_ids;
        self
    }

    /// The local user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.me
    }

    /// The current transport.
    #[must_use]
    pub fn transport(&self) -> Arc<T> {
        Arc::clone(&self.transport.read())
    }

    /// Whether the current transport is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.read().is_connected()
    }

    async fn send(&self, event: &ClientEvent) -> Result<(), ClientError> {
        let transport = self.transport();
        transport.send(event).await
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Requests to join `room_id` and fetch its history.
    ///
    /// The room counts as joined once the server confirms with `Joined`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the transport fails.
    pub async fn join(&self, room_id: &RoomId) -> Result<(), ClientError> {
        self.send(&ClientEvent::JoinRoom {
            room_id: room_id.clone(),
        })
        .await?;
        self.send(&ClientEvent::FetchHistory {
            room_id: room_id.clone(),
        })
        .await
    }

    /// Requests to leave `room_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the transport fails.
    pub async fn leave(&self, room_id: &RoomId) -> Result<(), ClientError> {
        self.send(&ClientEvent::LeaveRoom {
            room_id: room_id.clone(),
        })
        .await
    }

    /// Sends `content` to the other participant of `room_id`.
    ///
    /// The message appears in the room's view immediately as `sending`. If
    /// the transport fails, it is marked failed and the error is returned.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotJoined`] if the room has not been joined.
    /// - [`ClientError::Invalid`] if the message fails validation.
    /// - [`ClientError::ConnectionClosed`] if the transport is gone.
    pub async fn send_message(
        &self,
        room_id: &RoomId,
        content: &str,
    ) -> Result<TempId, ClientError> {
        let temp_id = self.temp_ids.next_id();
        let msg = self.outgoing(room_id, content, temp_id)?;
        msg.validate()?;

        self.state
            .lock()
            .views
            .entry(room_id.clone())
            .or_insert_with(|| ConversationView::new(self.me.clone()))
            .insert_optimistic(&msg);

        self.submit(msg).await?;
        Ok(temp_id)
    }

    /// Resubmits a failed message with its original temp id.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotJoined`] if the room has not been joined or the
    ///   message is not a failed message of this session.
    /// - [`ClientError::ConnectionClosed`] if the transport is gone.
    pub async fn retry(&self, room_id: &RoomId, temp_id: TempId) -> Result<(), ClientError> {
        let content = self
            .state
            .lock()
            .views
            .get_mut(room_id)
            .and_then(|view| view.retry(temp_id))
            .ok_or_else(|| ClientError::NotJoined(room_id.clone()))?;
        let msg = self.outgoing(room_id, &content, temp_id)?;
        self.submit(msg).await
    }

    /// Requests deletion of one of the local user's messages.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the transport fails.
    pub async fn delete_message(&self, message_id: MessageId) -> Result<(), ClientError> {
        self.send(&ClientEvent::DeleteMessage { message_id }).await
    }

    /// Tells the room the local user is typing. Callers debounce.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotJoined`] if the room has not been joined.
    /// - [`ClientError::ConnectionClosed`] if the transport is gone.
    pub async fn notify_typing(&self, room_id: &RoomId) -> Result<(), ClientError> {
        if !self.state.lock().joined.contains(room_id) {
            return Err(ClientError::NotJoined(room_id.clone()));
        }
        self.send(&ClientEvent::Typing {
            room_id: room_id.clone(),
        })
        .await
    }

    /// Swaps in a freshly authenticated transport and restores the session.
    ///
    /// Every room joined before is joined again and its history refetched,
    /// then messages still `sending` are resubmitted with their temp ids.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the new transport fails.
    pub async fn reconnect(&self, transport: T) -> Result<(), ClientError> {
        *self.transport.write() = Arc::new(transport);

        let rooms: Vec<RoomId> = self.state.lock().joined.iter().cloned().collect();
        tracing::info!(rooms = rooms.len(), "rejoining rooms after reconnect");
        for room_id in &rooms {
            self.join(room_id).await?;
        }

        let pending: Vec<(RoomId, TempId, String)> = {
            let state = self.state.lock();
            rooms
                .iter()
                .filter_map(|room| state.views.get(room).map(|view| (room, view.pending())))
                .flat_map(|(room, pending)| {
                    pending
                        .into_iter()
                        .map(move |(temp_id, content)| (room.clone(), temp_id, content))
                })
                .collect()
        };
        for (room_id, temp_id, content) in pending {
            let msg = self.outgoing(&room_id, &content, temp_id)?;
            self.submit(msg).await?;
        }
        Ok(())
    }

    fn outgoing(
        &self,
        room_id: &RoomId,
        content: &str,
        temp_id: TempId,
    ) -> Result<OutgoingMessage, ClientError> {
        let state = self.state.lock();
        if !state.joined.contains(room_id) {
            return Err(ClientError::NotJoined(room_id.clone()));
        }
        let receiver_id = state
            .participants
            .get(room_id)
            .and_then(|participants| participants.iter().find(|p| **p != self.me))
            .cloned()
            .ok_or_else(|| ClientError::NotJoined(room_id.clone()))?;
        Ok(OutgoingMessage {
            room_id: room_id.clone(),
            sender_id: self.me.clone(),
            receiver_id,
            content: content.to_string(),
            temp_id,
        })
    }

    async fn submit(&self, msg: OutgoingMessage) -> Result<(), ClientError> {
        let room_id = msg.room_id.clone();
        let temp_id = msg.temp_id;
        if let Err(e) = self.send(&ClientEvent::SendMessage(msg)).await {
            tracing::warn!(room_id = %room_id, temp_id = %temp_id, err = %e, "send failed");
            if let Some(view) = self.state.lock().views.get_mut(&room_id) {
                view.apply_failed(temp_id, &e.to_string());
            }
            return Err(e);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Incoming events
    // -----------------------------------------------------------------------

    /// Waits for the next server event that matters to the UI and applies it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] once the transport is gone.
    pub async fn next_event(&self) -> Result<SessionEvent, ClientError> {
        loop {
            let transport = self.transport();
            let event = transport.recv().await?;
            if let Some(session_event) = self.handle_event(event).await? {
                return Ok(session_event);
            }
        }
    }

    /// Runs [`next_event`](Self::next_event) on its own task and forwards
    /// every result.
    ///
    /// `next_event` is not cancel-safe: it can be suspended after a view was
    /// updated but before the acknowledgment went out. Waiting on the
    /// returned stream inside `select!` loses neither. The task ends after
    /// forwarding the first error or when the stream is dropped.
    pub fn pump_events(self: &Arc<Self>) -> (JoinHandle<()>, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                let event = session.next_event().await;
                let failed = event.is_err();
                if tx.send(event).is_err() || failed {
                    break;
                }
            }
        });
        (task, rx)
    }

    /// Applies one server event to the session state.
    ///
    /// Broadcasts from the other participant are acknowledged right away.
    /// Returns `None` for events with no visible effect.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if sending an acknowledgment fails.
    pub async fn handle_event(
        &self,
        event: ServerEvent,
    ) -> Result<Option<SessionEvent>, ClientError> {
        let outcome = match event {
            ServerEvent::Authenticated { .. } => None,
            ServerEvent::Joined {
                room_id,
                participants,
                online,
            } => {
                let mut state = self.state.lock();
                state.joined.insert(room_id.clone());
                state
                    .participants
                    .insert(room_id.clone(), participants.clone());
                state.online.extend(online.iter().cloned());
                state
                    .views
                    .entry(room_id.clone())
                    .or_insert_with(|| ConversationView::new(self.me.clone()));
                tracing::info!(room_id = %room_id, "joined room");
                Some(SessionEvent::Joined {
                    room_id,
                    participants,
                    online,
                })
            }
            ServerEvent::Left { room_id } => {
                let mut state = self.state.lock();
                state.joined.remove(&room_id);
                state.views.remove(&room_id);
                state.participants.remove(&room_id);
                Some(SessionEvent::Left { room_id })
            }
            ServerEvent::History { room_id, messages } => {
                let added = self
                    .state
                    .lock()
                    .views
                    .entry(room_id.clone())
                    .or_insert_with(|| ConversationView::new(self.me.clone()))
                    .load_history(&messages);
                Some(SessionEvent::HistoryLoaded { room_id, added })
            }
            ServerEvent::MessageSent(msg) => {
                let changed = self
                    .state
                    .lock()
                    .views
                    .entry(msg.room_id.clone())
                    .or_insert_with(|| ConversationView::new(self.me.clone()))
                    .apply_sent(&msg);
                msg.temp_id
                    .filter(|_| changed)
                    .map(|temp_id| SessionEvent::StatusChanged {
                        room_id: msg.room_id.clone(),
                        temp_id,
                        status: MessageStatus::Sent,
                    })
            }
            ServerEvent::MessageReceived(msg) => return self.on_received(msg).await,
            ServerEvent::MessageDelivered { room_id, temp_id } => {
                let changed = self
                    .state
                    .lock()
                    .views
                    .get_mut(&room_id)
                    .is_some_and(|view| view.apply_delivered(temp_id));
                changed.then_some(SessionEvent::StatusChanged {
                    room_id,
                    temp_id,
                    status: MessageStatus::Delivered,
                })
            }
            ServerEvent::MessageDeleted {
                room_id,
                message_id,
            } => {
                let removed = self
                    .state
                    .lock()
                    .views
                    .get_mut(&room_id)
                    .is_some_and(|view| view.remove(message_id));
                removed.then_some(SessionEvent::MessageDeleted {
                    room_id,
                    message_id,
                })
            }
            ServerEvent::Typing { room_id, user_id } => {
                if user_id != self.me && self.state.lock().joined.contains(&room_id) {
                    self.typing.refresh(&room_id, &user_id);
                }
                None
            }
            ServerEvent::PresenceChanged { user_id, status } => {
                let mut state = self.state.lock();
                match status {
                    PresenceStatus::Online => state.online.insert(user_id.clone()),
                    PresenceStatus::Offline => state.online.remove(&user_id),
                };
                Some(SessionEvent::PresenceChanged { user_id, status })
            }
            ServerEvent::Error {
                code,
                reason,
                temp_id,
            } => {
                tracing::warn!(code = %code, reason = %reason, ?temp_id, "request rejected");
                if let Some(temp_id) = temp_id {
                    let mut state = self.state.lock();
                    for view in state.views.values_mut() {
                        if view.apply_failed(temp_id, &reason) {
                            break;
                        }
                    }
                }
                Some(SessionEvent::Failed {
                    code,
                    reason,
                    temp_id,
                })
            }
        };
        Ok(outcome)
    }

    async fn on_received(&self, msg: ChatMessage) -> Result<Option<SessionEvent>, ClientError> {
        let inserted = self
            .state
            .lock()
            .views
            .entry(msg.room_id.clone())
            .or_insert_with(|| ConversationView::new(self.me.clone()))
            .apply_received(&msg);

        if msg.sender_id != self.me {
            self.typing.clear(&msg.room_id, &msg.sender_id);
            if let Some(temp_id) = msg.temp_id {
                self.send(&ClientEvent::AckDelivered {
                    room_id: msg.room_id.clone(),
                    temp_id,
                })
                .await?;
            }
        }
        Ok(inserted.then_some(SessionEvent::MessageReceived(msg)))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// A snapshot of a room's conversation.
    #[must_use]
    pub fn view(&self, room_id: &RoomId) -> Option<ConversationView> {
        self.state.lock().views.get(room_id).cloned()
    }

    /// Status of one of the local user's messages.
    #[must_use]
    pub fn status_of(&self, room_id: &RoomId, temp_id: TempId) -> Option<MessageStatus> {
        self.state
            .lock()
            .views
            .get(room_id)
            .and_then(|view| view.status_of(temp_id).cloned())
    }

    /// Rooms the server has confirmed as joined.
    #[must_use]
    pub fn joined_rooms(&self) -> Vec<RoomId> {
        self.state.lock().joined.iter().cloned().collect()
    }

    /// Participants of a joined room.
    #[must_use]
    pub fn participants(&self, room_id: &RoomId) -> Option<Vec<UserId>> {
        self.state.lock().participants.get(room_id).cloned()
    }

    /// Whether `user_id` was last reported online.
    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.state.lock().online.contains(user_id)
    }

    /// Whether `user_id` is flagged as typing in `room_id`.
    #[must_use]
    pub fn is_typing(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        self.typing.is_typing(room_id, user_id)
    }

    /// Users currently typing in `room_id`.
    #[must_use]
    pub fn typing_in(&self, room_id: &RoomId) -> Vec<UserId> {
        self.typing.typing_in(room_id)
    }
}
