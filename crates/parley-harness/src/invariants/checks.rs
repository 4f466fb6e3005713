//! Checks run by [`InvariantRegistry::standard`](super::InvariantRegistry::standard).

use std::collections::HashSet;

use parley_core::ConnectionState;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Cached messages are strictly ascending by id in every room.
///
/// Strictly ascending also means no id appears twice, so duplicate pushes
/// and history overlap never show up as repeated messages.
pub struct MessagesOrdered;

impl Invariant for MessagesOrdered {
    fn name(&self) -> &'static str {
        "messages_ordered"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (room_id, ids) in &client.messages {
                if let Some(pair) = ids.windows(2).find(|w| w[0] >= w[1]) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {} room {room_id}: id {} followed by {}",
                            client.id, pair[0], pair[1]
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The broker never holds more than one room subscription for a client.
pub struct SingleRoomSubscription;

impl Invariant for SingleRoomSubscription {
    fn name(&self) -> &'static str {
        "single_room_subscription"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.broker_rooms.len() > 1 {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: broker holds room subscriptions {:?}",
                        client.id, client.broker_rooms
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The live subscription belongs to the active room.
///
/// While connected the broker's view matches the client's exactly: the
/// active room is subscribed and nothing else is.
pub struct ActiveSubscriptionMatches;

impl Invariant for ActiveSubscriptionMatches {
    fn name(&self) -> &'static str {
        "active_subscription_matches"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if let Some(live) = client.live_room
                && client.active_room != Some(live)
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: live subscription for room {live}, active room {:?}",
                        client.id, client.active_room
                    ),
                });
            }

            if client.state == ConnectionState::Connected {
                let expected: Vec<_> = client.active_room.into_iter().collect();
                if client.broker_rooms != expected {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {}: active room {:?}, broker holds {:?}",
                            client.id, client.active_room, client.broker_rooms
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The room list holds each room once, most recent activity first.
///
/// Rooms without activity sort after every room with activity.
pub struct RoomListOrdered;

impl Invariant for RoomListOrdered {
    fn name(&self) -> &'static str {
        "room_list_ordered"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let mut seen = HashSet::new();
            if let Some((room_id, _)) = client.rooms.iter().find(|(id, _)| !seen.insert(*id)) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("client {}: room {room_id} listed twice", client.id),
                });
            }

            // Option orders None first, so descending order puts it last
            if let Some(pair) = client.rooms.windows(2).find(|w| w[0].1 < w[1].1) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: room {} ({:?}) listed before room {} ({:?})",
                        client.id, pair[0].0, pair[0].1, pair[1].0, pair[1].1
                    ),
                });
            }
        }
        Ok(())
    }
}
