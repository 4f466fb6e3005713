//! Freshness guards for asynchronous results.
//!
//! Every REST request is issued with a ticket. When the response comes back
//! the ticket is checked against the current generation; a response that was
//! overtaken (the user switched rooms, or a newer refresh was issued) is
//! discarded instead of written into the cache.

use parley_proto::RoomId;

/// Monotonic counter bumped whenever earlier requests become stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Invalidate everything issued so far and return the new generation.
    pub fn bump(&mut self) -> Self {
        self.0 += 1;
        *self
    }

    /// Raw counter value.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Ticket for an in-flight history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryTicket {
    /// Room the fetch was issued for
    pub room_id: RoomId,
    /// Room generation at issue time
    pub generation: Generation,
}

/// Ticket for an in-flight room list fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomsTicket {
    /// List generation at issue time
    pub generation: Generation,
}

/// Issues and validates tickets.
#[derive(Debug, Clone, Default)]
pub struct Freshness {
    /// Bumped on every active-room change
    room: Generation,
    /// Bumped on every room list request
    rooms: Generation,
}

impl Freshness {
    /// Create a fresh tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// The active room changed: in-flight history fetches are now stale.
    pub fn room_switched(&mut self) {
        self.room.bump();
    }

    /// Ticket for a history fetch of `room_id` under the current generation.
    pub fn history_ticket(&self, room_id: RoomId) -> HistoryTicket {
        HistoryTicket { room_id, generation: self.room }
    }

    /// Check a history response. Fresh only if no room switch happened since
    /// the ticket was issued and the ticket's room is still `active`.
    pub fn history_is_fresh(&self, ticket: HistoryTicket, active: Option<RoomId>) -> bool {
        ticket.generation == self.room && active == Some(ticket.room_id)
    }

    /// Ticket for a new room list fetch. Supersedes every earlier one.
    pub fn rooms_ticket(&mut self) -> RoomsTicket {
        RoomsTicket { generation: self.rooms.bump() }
    }

    /// Check a room list response. Only the most recent request is fresh.
    pub fn rooms_is_fresh(&self, ticket: RoomsTicket) -> bool {
        ticket.generation == self.rooms
    }
}
