//! Client-side projection of one room's conversation.
//!
//! Entries are keyed by their provisional [`TempId`] until the server
//! assigns a [`MessageId`], then by the id. Replaying an event for a message
//! the view already holds updates the entry in place, so no two entries
//! ever share a temp id or an id.
//!
//! Entries are ordered by the store-assigned `created_at`; messages still
//! waiting for the server sort last, in submission order. The sender-side
//! status only moves forward: `sending -> sent -> delivered`.

use claimchat_proto::message::{
    ChatMessage, MessageId, MessageStatus, OutgoingMessage, TempId, Timestamp, UserId,
};

/// One message as displayed in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEntry {
    /// Canonical id, once the server has persisted the message.
    pub id: Option<MessageId>,
    /// Provisional id, if the message came through a live send.
    pub temp_id: Option<TempId>,
    /// Who sent the message.
    pub sender_id: UserId,
    /// Message text.
    pub content: String,
    /// Store-assigned creation time, once known.
    pub created_at: Option<Timestamp>,
    /// Delivery status; only tracked for the local user's own messages.
    pub status: Option<MessageStatus>,
}

impl ViewEntry {
    fn from_message(msg: &ChatMessage, status: Option<MessageStatus>) -> Self {
        Self {
            id: Some(msg.id),
            temp_id: msg.temp_id,
            sender_id: msg.sender_id.clone(),
            content: msg.content.clone(),
            created_at: Some(msg.created_at),
            status,
        }
    }

    /// Moves the status forward; never backwards.
    fn upgrade(&mut self, status: MessageStatus) -> bool {
        let current = self.status.as_ref().map_or(0, MessageStatus::rank);
        if self.status.is_none() || status.rank() > current {
            self.status = Some(status);
            return true;
        }
        false
    }
}

/// The ordered message list of one room, as seen by `me`.
#[derive(Debug, Clone)]
pub struct ConversationView {
    me: UserId,
    entries: Vec<ViewEntry>,
}

impl ConversationView {
    /// Creates an empty view for the local user.
    #[must_use]
    pub const fn new(me: UserId) -> Self {
        Self {
            me,
            entries: Vec::new(),
        }
    }

    /// Entries in display order.
    #[must_use]
    pub fn entries(&self) -> &[ViewEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the view holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an entry by canonical id.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&ViewEntry> {
        self.entries.iter().find(|e| e.id == Some(id))
    }

    /// Looks up one of the local user's entries by temp id.
    #[must_use]
    pub fn get_by_temp_id(&self, temp_id: TempId) -> Option<&ViewEntry> {
        self.entries
            .iter()
            .find(|e| e.temp_id == Some(temp_id) && e.sender_id == self.me)
    }

    /// Status of one of the local user's messages.
    #[must_use]
    pub fn status_of(&self, temp_id: TempId) -> Option<&MessageStatus> {
        self.get_by_temp_id(temp_id).and_then(|e| e.status.as_ref())
    }

    /// Adds a message the local user just submitted, in `sending`.
    ///
    /// Returns `false` if the temp id is already present.
    pub fn insert_optimistic(&mut self, msg: &OutgoingMessage) -> bool {
        if self.get_by_temp_id(msg.temp_id).is_some() {
            return false;
        }
        self.entries.push(ViewEntry {
            id: None,
            temp_id: Some(msg.temp_id),
            sender_id: msg.sender_id.clone(),
            content: msg.content.clone(),
            created_at: None,
            status: Some(MessageStatus::Sending),
        });
        true
    }

    /// Applies the server's confirmation of the local user's message.
    ///
    /// Returns `true` if the entry's status changed or a new entry was added.
    pub fn apply_sent(&mut self, msg: &ChatMessage) -> bool {
        let changed = self.merge(msg);
        let status_changed = self
            .position_of(msg)
            .is_some_and(|idx| self.entries[idx].upgrade(MessageStatus::Sent));
        self.sort();
        changed || status_changed
    }

    /// Applies a broadcast message.
    ///
    /// Returns `true` if the message was not in the view before.
    pub fn apply_received(&mut self, msg: &ChatMessage) -> bool {
        let inserted = self.merge(msg);
        if msg.sender_id == self.me
            && let Some(idx) = self.position_of(msg)
        {
            self.entries[idx].upgrade(MessageStatus::Sent);
        }
        self.sort();
        inserted
    }

    /// Marks one of the local user's messages as delivered.
    ///
    /// Returns `true` if the status changed.
    pub fn apply_delivered(&mut self, temp_id: TempId) -> bool {
        let me = self.me.clone();
        self.entries
            .iter_mut()
            .find(|e| e.temp_id == Some(temp_id) && e.sender_id == me)
            .is_some_and(|e| e.upgrade(MessageStatus::Delivered))
    }

    /// Marks a message that is still `sending` as failed.
    ///
    /// Returns `true` if the status changed. A message the server already
    /// confirmed cannot fail.
    pub fn apply_failed(&mut self, temp_id: TempId, reason: &str) -> bool {
        let me = self.me.clone();
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.temp_id == Some(temp_id) && e.sender_id == me)
        else {
            return false;
        };
        if entry.status != Some(MessageStatus::Sending) {
            return false;
        }
        entry.status = Some(MessageStatus::Failed(reason.to_string()));
        true
    }

    /// Puts a failed message back into `sending` for a resubmission with the
    /// same temp id. Returns its content, or `None` if it has not failed.
    pub fn retry(&mut self, temp_id: TempId) -> Option<String> {
        let me = self.me.clone();
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.temp_id == Some(temp_id) && e.sender_id == me)?;
        if !matches!(entry.status, Some(MessageStatus::Failed(_))) {
            return None;
        }
        entry.status = Some(MessageStatus::Sending);
        Some(entry.content.clone())
    }

    /// The local user's messages still waiting for the server, in
    /// submission order.
    #[must_use]
    pub fn pending(&self) -> Vec<(TempId, String)> {
        self.entries
            .iter()
            .filter(|e| e.sender_id == self.me && e.status == Some(MessageStatus::Sending))
            .filter_map(|e| Some((e.temp_id?, e.content.clone())))
            .collect()
    }

    /// Removes a deleted message. Returns `true` if it was present.
    pub fn remove(&mut self, id: MessageId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != Some(id));
        self.entries.len() != before
    }

    /// Merges a page of persisted history into the view.
    ///
    /// Messages already present are updated in place; the local user's
    /// messages are at least `sent`. Returns how many entries were added.
    pub fn load_history(&mut self, messages: &[ChatMessage]) -> usize {
        let mut added = 0;
        for msg in messages {
            if self.merge(msg) {
                added += 1;
            }
            if msg.sender_id == self.me
                && let Some(idx) = self.position_of(msg)
            {
                self.entries[idx].upgrade(MessageStatus::Sent);
            }
        }
        self.sort();
        added
    }

    /// Finds the entry for a persisted message: by id first, then by the
    /// sender's temp id on an entry that has no id yet.
    fn position_of(&self, msg: &ChatMessage) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.id == Some(msg.id))
            .or_else(|| {
                let temp_id = msg.temp_id?;
                self.entries.iter().position(|e| {
                    e.id.is_none() && e.temp_id == Some(temp_id) && e.sender_id == msg.sender_id
                })
            })
    }

    /// Updates the matching entry in place or appends a new one.
    ///
    /// Returns `true` if a new entry was appended.
    fn merge(&mut self, msg: &ChatMessage) -> bool {
        if let Some(idx) = self.position_of(msg) {
            let entry = &mut self.entries[idx];
            entry.id = Some(msg.id);
            entry.temp_id = entry.temp_id.or(msg.temp_id);
            entry.content.clone_from(&msg.content);
            entry.created_at = Some(msg.created_at);
            return false;
        }
        let status = (msg.sender_id == self.me).then_some(MessageStatus::Sent);
        self.entries.push(ViewEntry::from_message(msg, status));
        true
    }

    /// Stable sort by `created_at`, unpersisted entries last.
    fn sort(&mut self) {
        self.entries
            .sort_by_key(|e| (e.created_at.is_none(), e.created_at, e.id));
    }
}
