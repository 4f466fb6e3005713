//! Room list synchronization.
//!
//! The list is rebuilt from periodic REST snapshots and patched in between by
//! pushed previews and optimistic local sends.
//!
//! # Invariants
//!
//! - Exactly one entry per room id.
//! - Entries are ordered by `last_message_at` descending; rooms without
//!   activity sort last. Ties keep their previous relative order, except that
//!   a room just touched by a preview or send goes in front of its ties.

use std::{ops::Sub, time::Duration};

use chrono::{DateTime, Utc};
use parley_proto::{RoomId, payloads::RoomPreview};
use tracing::debug;

use crate::{model::ChatRoom, time};

/// Interval between periodic room list refreshes.
pub const DEFAULT_ROOM_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

/// Result of applying a pushed preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewOutcome {
    /// Known room updated and moved up
    Updated,
    /// Room not in the list; caller should refetch the whole list
    Unknown,
}

/// State captured before an optimistic update, for rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    before: ChatRoom,
    index: usize,
    applied: ChatRoom,
}

impl RoomSnapshot {
    /// Room the snapshot belongs to.
    pub fn room_id(&self) -> RoomId {
        self.before.room_id
    }
}

/// Ordered, deduplicated room list.
#[derive(Debug, Clone, Default)]
pub struct RoomList {
    rooms: Vec<ChatRoom>,
}

impl RoomList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with a REST snapshot.
    ///
    /// Duplicate ids keep their first occurrence. Rooms missing from the
    /// snapshot are gone afterwards.
    pub fn replace(&mut self, rooms: Vec<ChatRoom>) {
        let mut seen = std::collections::HashSet::with_capacity(rooms.len());
        let mut rooms: Vec<_> = rooms.into_iter().filter(|room| seen.insert(room.room_id)).collect();
        rooms.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));

        debug!(count = rooms.len(), "room list replaced");
        self.rooms = rooms;
    }

    /// Apply a pushed preview.
    ///
    /// The active room's time label reads [`time::JUST_NOW`] instead of the
    /// server label. A preview without a parseable timestamp counts as
    /// activity at `now`. The room moves ahead of every room that is not
    /// strictly newer, so a late preview stays behind fresher activity.
    pub fn apply_preview(
        &mut self,
        preview: &RoomPreview,
        active: Option<RoomId>,
        now: DateTime<Utc>,
    ) -> PreviewOutcome {
        let Some(index) = self.position(preview.chat_room_id) else {
            debug!(room_id = preview.chat_room_id, "preview for unknown room");
            return PreviewOutcome::Unknown;
        };

        let mut room = self.rooms.remove(index);
        let is_active = active == Some(room.room_id);

        room.last_message.clone_from(&preview.last_message);
        room.last_message_time =
            if is_active { time::JUST_NOW.to_string() } else { preview.last_message_time.clone() };
        room.last_message_at =
            Some(preview.last_message_at.as_deref().and_then(time::parse_timestamp).unwrap_or(now));
        if is_active {
            room.unread_count = 0;
        }

        self.insert_touched(room);
        PreviewOutcome::Updated
    }

    /// Optimistically record a message the local user just sent.
    ///
    /// Returns the snapshot needed to undo it, or `None` if the room is not
    /// listed.
    pub fn apply_local_send(
        &mut self,
        room_id: RoomId,
        content: &str,
        now: DateTime<Utc>,
    ) -> Option<RoomSnapshot> {
        let index = self.position(room_id)?;
        let before = self.rooms.remove(index);

        let mut room = before.clone();
        room.last_message = content.to_string();
        room.last_message_time = time::JUST_NOW.to_string();
        room.last_message_at = Some(now);
        room.unread_count = 0;

        let applied = room.clone();
        self.insert_touched(room);
        Some(RoomSnapshot { before, index, applied })
    }

    /// Undo an optimistic update.
    ///
    /// Skipped (returns `false`) if the entry changed since, because a
    /// preview or refresh already carries newer truth.
    pub fn restore(&mut self, snapshot: RoomSnapshot) -> bool {
        let Some(index) = self.position(snapshot.room_id()) else {
            return false;
        };
        if self.rooms[index] != snapshot.applied {
            debug!(room_id = snapshot.room_id(), "rollback skipped, room changed since");
            return false;
        }

        self.rooms.remove(index);
        // Old position, clamped into the run of equal timestamps
        let before = snapshot.before;
        let lo = self.rooms.partition_point(|other| other.last_message_at > before.last_message_at);
        let hi = self.rooms.partition_point(|other| other.last_message_at >= before.last_message_at);
        self.rooms.insert(snapshot.index.clamp(lo, hi), before);
        true
    }

    /// Rooms whose name or any participant name contains `keyword`,
    /// case-insensitively. An empty keyword matches everything.
    pub fn search(&self, keyword: &str) -> Vec<&ChatRoom> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return self.rooms.iter().collect();
        }

        self.rooms
            .iter()
            .filter(|room| {
                room.name.to_lowercase().contains(&needle)
                    || room.participants.iter().any(|p| p.name.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Room by id.
    pub fn get(&self, room_id: RoomId) -> Option<&ChatRoom> {
        self.rooms.iter().find(|room| room.room_id == room_id)
    }

    /// Check if `room_id` is listed.
    pub fn contains(&self, room_id: RoomId) -> bool {
        self.position(room_id).is_some()
    }

    /// Rooms in display order.
    pub fn iter(&self) -> impl Iterator<Item = &ChatRoom> {
        self.rooms.iter()
    }

    /// Number of rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn position(&self, room_id: RoomId) -> Option<usize> {
        self.rooms.iter().position(|room| room.room_id == room_id)
    }

    /// Insert ahead of every room that is not strictly newer.
    fn insert_touched(&mut self, room: ChatRoom) {
        let at = self.rooms.partition_point(|other| other.last_message_at > room.last_message_at);
        self.rooms.insert(at, room);
    }
}

/// Periodic refresh timer that pauses while the view is unfocused.
#[derive(Debug, Clone)]
pub struct RefreshSchedule<I> {
    interval: Duration,
    last: Option<I>,
    focused: bool,
}

impl<I> RefreshSchedule<I>
where
    I: Copy + Sub<Output = Duration>,
{
    /// Create a focused schedule that fires on the first check.
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None, focused: true }
    }

    /// Check if a refresh is due at `now`; records it if so.
    pub fn due(&mut self, now: I) -> bool {
        if !self.focused {
            return false;
        }

        let due = self.last.is_none_or(|last| now - last >= self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }

    /// Record a focus change. Returns `true` if regaining focus made an
    /// overdue refresh fire immediately.
    pub fn set_focus(&mut self, focused: bool, now: I) -> bool {
        let was_focused = self.focused;
        self.focused = focused;
        focused && !was_focused && self.due(now)
    }

    /// Check if the view is focused.
    pub fn is_focused(&self) -> bool {
        self.focused
    }
}
