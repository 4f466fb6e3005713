//! Room subscription management.
//!
//! [`SubscriptionManager`] maps "the room the user is looking at" to at most
//! one live broker subscription. [`StandingChannel`] covers the personal
//! queues that stay subscribed for the whole session regardless of room.
//!
//! Subscriptions do not survive a disconnect: the broker forgets them with
//! the session, so both types drop their live state in `on_disconnected` and
//! rebuild it in `on_connected`.
//!
//! # Invariants
//!
//! - At most one room subscription is live at any time.
//! - Switching rooms always emits the UNSUBSCRIBE for the old room before the
//!   SUBSCRIBE for the new one, in the same action batch.
//! - Once connected, the live subscription (if any) is bound to the most
//!   recently requested room.

use parley_proto::{Destination, Frame, RoomId};
use tracing::debug;

/// Subscribe/unsubscribe instruction for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Register `id` on `destination`
    Subscribe {
        /// Client-chosen subscription id
        id: String,
        /// Topic or queue
        destination: Destination,
    },
    /// Release `id`
    Unsubscribe {
        /// Subscription id to release
        id: String,
    },
}

impl SubscriptionAction {
    /// Frame that carries this action.
    pub fn to_frame(&self) -> Frame {
        match self {
            Self::Subscribe { id, destination } => Frame::subscribe(id, destination),
            Self::Unsubscribe { id } => Frame::unsubscribe(id),
        }
    }
}

/// A live room subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSubscription {
    /// Subscription id on the broker
    pub id: String,
    /// Room it is bound to
    pub room_id: RoomId,
}

/// Tracks the active room and its single live subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionManager {
    /// Room the user asked for
    desired: Option<RoomId>,
    live: Option<LiveSubscription>,
    connected: bool,
    /// Makes ids unique across re-subscriptions to the same room
    next_seq: u64,
}

impl SubscriptionManager {
    /// Create a manager with no active room.
    pub fn new() -> Self {
        Self::default()
    }

    /// Room the user asked for. `None` if no room is open.
    pub fn active_room(&self) -> Option<RoomId> {
        self.desired
    }

    /// Current live subscription, if any.
    pub fn live(&self) -> Option<&LiveSubscription> {
        self.live.as_ref()
    }

    /// Check if a live subscription matches `room_id`.
    pub fn is_subscribed(&self, room_id: RoomId) -> bool {
        self.live.as_ref().is_some_and(|live| live.room_id == room_id)
    }

    /// Room the given subscription id delivers for. `None` for ids that are
    /// not (or no longer) live.
    pub fn route(&self, subscription_id: &str) -> Option<RoomId> {
        self.live.as_ref().filter(|live| live.id == subscription_id).map(|live| live.room_id)
    }

    /// Change the active room.
    ///
    /// Releases the old subscription first, then subscribes to `room` if
    /// connected. While disconnected the room is only recorded. Asking for the
    /// room that is already live changes nothing.
    pub fn set_active_room(&mut self, room: Option<RoomId>) -> Vec<SubscriptionAction> {
        let already_live = room.is_some_and(|r| self.is_subscribed(r));
        if self.desired == room && (already_live || !self.connected || room.is_none()) {
            return Vec::new();
        }

        debug!(from = ?self.desired, to = ?room, connected = self.connected, "active room changed");
        self.desired = room;

        let mut actions = Vec::new();
        if let Some(old) = self.live.take() {
            actions.push(SubscriptionAction::Unsubscribe { id: old.id });
        }
        if self.connected
            && let Some(room_id) = room
        {
            actions.push(self.subscribe(room_id));
        }
        actions
    }

    /// Session established: subscribe to the recorded room.
    pub fn on_connected(&mut self) -> Vec<SubscriptionAction> {
        self.connected = true;
        self.live = None;

        match self.desired {
            Some(room_id) => vec![self.subscribe(room_id)],
            None => Vec::new(),
        }
    }

    /// Session lost: the broker dropped every subscription.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.live = None;
    }

    fn subscribe(&mut self, room_id: RoomId) -> SubscriptionAction {
        self.next_seq += 1;
        let id = format!("room-{room_id}-{}", self.next_seq);
        self.live = Some(LiveSubscription { id: id.clone(), room_id });
        SubscriptionAction::Subscribe { id, destination: Destination::RoomTopic(room_id) }
    }
}

/// A personal queue subscribed for the whole session.
#[derive(Debug, Clone)]
pub struct StandingChannel {
    id: &'static str,
    destination: Destination,
    enabled: bool,
    live: bool,
}

impl StandingChannel {
    /// Channel on `destination` using the fixed subscription `id`.
    pub fn new(id: &'static str, destination: Destination, enabled: bool) -> Self {
        Self { id, destination, enabled, live: false }
    }

    /// Subscription id.
    pub fn id(&self) -> &'static str {
        self.id
    }

    /// Check if the channel is currently subscribed.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Check if `subscription_id` belongs to this channel while live.
    pub fn owns(&self, subscription_id: &str) -> bool {
        self.live && self.id == subscription_id
    }

    /// Session established: (re)subscribe if enabled.
    pub fn on_connected(&mut self) -> Option<SubscriptionAction> {
        if !self.enabled {
            return None;
        }

        self.live = true;
        Some(SubscriptionAction::Subscribe { id: self.id.to_string(), destination: self.destination })
    }

    /// Session lost.
    pub fn on_disconnected(&mut self) {
        self.live = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribed_rooms(actions: &[SubscriptionAction]) -> Vec<RoomId> {
        actions
            .iter()
            .filter_map(|a| match a {
                SubscriptionAction::Subscribe { destination, .. } => destination.room_id(),
                SubscriptionAction::Unsubscribe { .. } => None,
            })
            .collect()
    }

    #[test]
    fn deferred_until_connected() {
        let mut subs = SubscriptionManager::new();

        assert!(subs.set_active_room(Some(7)).is_empty());
        assert!(subs.set_active_room(Some(9)).is_empty());
        assert!(!subs.is_subscribed(9));

        let actions = subs.on_connected();
        assert_eq!(subscribed_rooms(&actions), vec![9]);
        assert!(subs.is_subscribed(9));
        assert!(!subs.is_subscribed(7));
    }

    #[test]
    fn switch_unsubscribes_before_subscribing() {
        let mut subs = SubscriptionManager::new();
        subs.on_connected();
        subs.set_active_room(Some(7));
        let old_id = subs.live().unwrap().id.clone();

        let actions = subs.set_active_room(Some(9));
        assert!(matches!(&actions[0], SubscriptionAction::Unsubscribe { id } if *id == old_id));
        assert_eq!(subscribed_rooms(&actions), vec![9]);
        assert_eq!(subs.route(&old_id), None);
    }

    #[test]
    fn same_room_is_noop_when_live() {
        let mut subs = SubscriptionManager::new();
        subs.on_connected();
        subs.set_active_room(Some(7));

        assert!(subs.set_active_room(Some(7)).is_empty());
        assert!(subs.is_subscribed(7));
    }

    #[test]
    fn clearing_room_releases_subscription() {
        let mut subs = SubscriptionManager::new();
        subs.on_connected();
        subs.set_active_room(Some(7));

        let actions = subs.set_active_room(None);
        assert!(matches!(actions.as_slice(), [SubscriptionAction::Unsubscribe { .. }]));
        assert!(subs.live().is_none());
        assert!(subs.set_active_room(None).is_empty());
    }

    #[test]
    fn rebuilt_after_reconnect_with_fresh_id() {
        let mut subs = SubscriptionManager::new();
        subs.on_connected();
        subs.set_active_room(Some(7));
        let before = subs.live().unwrap().id.clone();

        subs.on_disconnected();
        assert!(!subs.is_subscribed(7));
        assert_eq!(subs.active_room(), Some(7));

        let actions = subs.on_connected();
        assert_eq!(subscribed_rooms(&actions), vec![7]);
        assert_ne!(subs.live().unwrap().id, before);
    }

    #[test]
    fn route_only_matches_live_id() {
        let mut subs = SubscriptionManager::new();
        subs.on_connected();
        subs.set_active_room(Some(3));
        let id = subs.live().unwrap().id.clone();

        assert_eq!(subs.route(&id), Some(3));
        assert_eq!(subs.route("room-3-999"), None);
    }

    #[test]
    fn standing_channel_follows_session() {
        let mut channel = StandingChannel::new("errors", Destination::ErrorQueue, true);
        assert!(!channel.owns("errors"));

        assert!(channel.on_connected().is_some());
        assert!(channel.owns("errors"));

        channel.on_disconnected();
        assert!(!channel.is_live());
    }

    #[test]
    fn disabled_standing_channel_never_subscribes() {
        let mut channel = StandingChannel::new("room-list", Destination::RoomListQueue, false);
        assert!(channel.on_connected().is_none());
        assert!(!channel.owns("room-list"));
    }
}
