//! Frozen copies of client and broker state.
//!
//! Captured between steps so every check in a run sees the same state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parley_client::Client;
use parley_core::{ConnectionState, Environment};
use parley_proto::{MessageId, RoomId};

/// Every simulated client at one instant.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client state snapshots.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// No clients.
    pub fn empty() -> Self {
        Self::default()
    }

    /// One client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }

    /// Several clients, in capture order.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients }
    }
}

/// What one client shows the user, plus the broker's view of its socket.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Harness-assigned client id.
    pub id: u64,
    /// Connection state.
    pub state: ConnectionState,
    /// Room the user has open.
    pub active_room: Option<RoomId>,
    /// Room of the client's live subscription.
    pub live_room: Option<RoomId>,
    /// Room subscriptions the broker holds for the client's socket.
    pub broker_rooms: Vec<RoomId>,
    /// Cached message ids per room, in cache order.
    pub messages: BTreeMap<RoomId, Vec<MessageId>>,
    /// Room list in display order with each room's activity time.
    pub rooms: Vec<(RoomId, Option<DateTime<Utc>>)>,
}

impl ClientSnapshot {
    /// Capture `client`, given the broker's view of its subscriptions.
    pub fn capture<E: Environment>(id: u64, client: &Client<E>, broker_rooms: Vec<RoomId>) -> Self {
        let cache = client.cache();
        let messages = cache
            .room_ids()
            .map(|room_id| (room_id, cache.messages(room_id).map(|m| m.message_id).collect()))
            .collect();

        Self {
            id,
            state: client.connection_state(),
            active_room: client.active_room(),
            live_room: client.live_subscription().map(|live| live.room_id),
            broker_rooms,
            messages,
            rooms: client.rooms().iter().map(|r| (r.room_id, r.last_message_at)).collect(),
        }
    }
}
