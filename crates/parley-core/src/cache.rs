//! Per-room message cache and merge engine.
//!
//! Merges REST history with pushed events. Delivery is at-least-once and a
//! reconnect can replay events already present from history, so every write
//! is keyed by message id: the cache holds each id once and always yields
//! messages in ascending id order, whatever order they arrived in.
//!
//! Pushed events carry only a sender id. Display fields come from a per-room
//! identity index filled from history and room participants; unknown senders
//! get a placeholder that is upgraded in place once an identity shows up.
//!
//! # Invariants
//!
//! - Message ids are unique within a room.
//! - Iteration order is ascending by message id.
//! - Every cached message's `room_id` equals the key it is stored under.

use std::collections::{BTreeMap, HashMap};

use parley_proto::{MessageId, RoomId, UserId, payloads::PushedMessage};
use tracing::{debug, trace};

use crate::model::{ChatMessage, Sender};

/// Result of applying a pushed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// New message stored
    Inserted,
    /// Id already present; event ignored
    Duplicate,
}

#[derive(Debug, Clone, Default)]
struct RoomCache {
    messages: BTreeMap<MessageId, ChatMessage>,
    senders: HashMap<UserId, Sender>,
}

impl RoomCache {
    fn remember(&mut self, sender: &Sender) -> bool {
        if sender.is_placeholder() {
            return false;
        }
        if self.senders.get(&sender.user_id) == Some(sender) {
            return false;
        }

        self.senders.insert(sender.user_id, sender.clone());
        let mut upgraded = 0usize;
        for msg in self.messages.values_mut() {
            if msg.sender.user_id == sender.user_id && msg.sender.is_placeholder() {
                msg.sender = sender.clone();
                upgraded += 1;
            }
        }
        if upgraded > 0 {
            trace!(user_id = sender.user_id, upgraded, "upgraded placeholder senders");
        }
        true
    }
}

/// In-memory message store keyed by room.
#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    rooms: HashMap<RoomId, RoomCache>,
}

impl MessageCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a REST history snapshot into `room_id`.
    ///
    /// Entries already cached but absent from the snapshot (pushed while the
    /// fetch was in flight) are kept. On id collision the snapshot copy wins.
    /// Returns the number of messages cached for the room afterwards.
    pub fn load_history(&mut self, room_id: RoomId, history: Vec<ChatMessage>) -> usize {
        let room = self.rooms.entry(room_id).or_default();
        let fetched = history.len();

        for mut msg in history {
            msg.room_id = room_id;
            room.remember(&msg.sender);
            room.messages.insert(msg.message_id, msg);
        }

        // Snapshot rows can themselves carry placeholders for senders known
        // from elsewhere in the same snapshot.
        let known = room.senders.clone();
        for msg in room.messages.values_mut() {
            if msg.sender.is_placeholder()
                && let Some(sender) = known.get(&msg.sender.user_id)
            {
                msg.sender = sender.clone();
            }
        }

        debug!(room_id, fetched, cached = room.messages.len(), "history merged");
        room.messages.len()
    }

    /// Apply one pushed event. Ignored if its id is already cached.
    pub fn apply_pushed(&mut self, event: &PushedMessage) -> PushOutcome {
        let room = self.rooms.entry(event.chat_room_id).or_default();
        if room.messages.contains_key(&event.message_id) {
            debug!(room_id = event.chat_room_id, message_id = event.message_id, "duplicate push");
            return PushOutcome::Duplicate;
        }

        let sender = room
            .senders
            .get(&event.sender_id)
            .cloned()
            .unwrap_or_else(|| Sender::placeholder(event.sender_id));

        room.messages.insert(event.message_id, ChatMessage {
            message_id: event.message_id,
            room_id: event.chat_room_id,
            sender,
            content: event.content.clone(),
            sent_time: event.sent_time.clone(),
            display_time: event.display_time.clone(),
        });
        PushOutcome::Inserted
    }

    /// Record a full identity for `room_id`, upgrading cached placeholders.
    ///
    /// Returns `true` if the index changed.
    pub fn remember_sender(&mut self, room_id: RoomId, sender: &Sender) -> bool {
        self.rooms.entry(room_id).or_default().remember(sender)
    }

    /// Known identity of `user_id` in `room_id`.
    pub fn sender(&self, room_id: RoomId, user_id: UserId) -> Option<&Sender> {
        self.rooms.get(&room_id)?.senders.get(&user_id)
    }

    /// Messages for `room_id` in ascending id order. Empty if unknown.
    pub fn messages(&self, room_id: RoomId) -> impl Iterator<Item = &ChatMessage> {
        self.rooms.get(&room_id).into_iter().flat_map(|room| room.messages.values())
    }

    /// Number of messages cached for `room_id`.
    pub fn len(&self, room_id: RoomId) -> usize {
        self.rooms.get(&room_id).map_or(0, |room| room.messages.len())
    }

    /// Check if `message_id` is cached for `room_id`.
    pub fn contains(&self, room_id: RoomId, message_id: MessageId) -> bool {
        self.rooms.get(&room_id).is_some_and(|room| room.messages.contains_key(&message_id))
    }

    /// Rooms with cached state.
    pub fn room_ids(&self) -> impl Iterator<Item = RoomId> + '_ {
        self.rooms.keys().copied()
    }

    /// Drop everything cached for `room_id`.
    pub fn evict(&mut self, room_id: RoomId) -> bool {
        let evicted = self.rooms.remove(&room_id).is_some();
        if evicted {
            debug!(room_id, "room evicted from message cache");
        }
        evicted
    }

    /// Drop every room for which `keep` returns `false`.
    pub fn retain_rooms(&mut self, mut keep: impl FnMut(RoomId) -> bool) {
        self.rooms.retain(|room_id, _| {
            let kept = keep(*room_id);
            if !kept {
                debug!(room_id, "room evicted from message cache");
            }
            kept
        });
    }
}
