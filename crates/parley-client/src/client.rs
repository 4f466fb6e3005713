//! Client state machine.
//!
//! The `Client` composes the core state machines into one engine: the
//! connection, the room subscription and standing channels, the message
//! cache, the room list and the freshness guards. Every event runs to
//! completion before the next one is accepted, so a room switch always
//! finishes its unsubscribe/subscribe pair before any later push is routed.

use std::collections::{HashMap, HashSet};

use parley_core::{
    ConnectionAction, ConnectionState, Environment, ErrorChannel, Freshness, HistoryTicket,
    LiveSubscription, MessageCache, PreviewOutcome, PushOutcome, RefreshSchedule, RoomList,
    RoomSnapshot, Sender, StandingChannel, SubscriptionAction, SubscriptionManager, Throttle,
    connection::Connection,
    error::SendRefusal,
    model::{ChatMessage, ChatRoom, Participant},
    send,
};
use parley_proto::{
    Command, Destination, Frame, RoomId, UserId,
    header::names,
    payloads::{self, PushedMessage, RoomPreview},
};
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    error::ClientError,
    event::{ClientAction, ClientEvent, Notification, SendToken},
};

/// Subscription id of the personal room-list queue.
pub const ROOM_UPDATES_SUBSCRIPTION_ID: &str = "room-updates";

/// Toast shown when a personal room cannot be opened.
const PERSONAL_ROOM_FAILED: &str = "Could not open the conversation.";

/// A publish waiting for the transport to report back.
#[derive(Debug)]
struct PendingSend {
    room_id: RoomId,
    /// Optimistic room list update to undo on failure
    snapshot: Option<RoomSnapshot>,
}

/// Chat client engine.
///
/// Sans-IO: [`Client::handle`] takes a [`ClientEvent`] and returns the
/// [`ClientAction`]s the caller must perform. The caller reports the outcome
/// of each action as another event.
pub struct Client<E: Environment> {
    env: E,
    config: ClientConfig,
    connection: Connection<E::Instant>,
    subscriptions: SubscriptionManager,
    errors: ErrorChannel,
    room_updates: StandingChannel,
    cache: MessageCache,
    rooms: RoomList,
    freshness: Freshness,
    refresh: RefreshSchedule<E::Instant>,
    read_sync: Throttle<E::Instant>,
    /// A room list fetch is outstanding. At most one is in flight at a time.
    rooms_in_flight: bool,
    /// Something asked for a fresh list while one was in flight
    rooms_refetch: bool,
    pending_sends: HashMap<SendToken, PendingSend>,
    /// Profile lookups in flight, per room
    pending_users: HashSet<(RoomId, UserId)>,
    next_token: u64,
}

impl<E: Environment> Client<E> {
    /// Create an idle client.
    pub fn new(env: E, config: ClientConfig) -> Self {
        let now = env.now();
        Self {
            connection: Connection::new(now, config.connection.clone()),
            subscriptions: SubscriptionManager::new(),
            errors: ErrorChannel::new(),
            room_updates: StandingChannel::new(
                ROOM_UPDATES_SUBSCRIPTION_ID,
                Destination::RoomListQueue,
                config.subscribe_room_updates,
            ),
            cache: MessageCache::new(),
            rooms: RoomList::new(),
            freshness: Freshness::new(),
            refresh: RefreshSchedule::new(config.room_refresh_interval),
            read_sync: Throttle::new(config.read_sync_interval),
            rooms_in_flight: false,
            rooms_refetch: false,
            pending_sends: HashMap::new(),
            pending_users: HashSet::new(),
            next_token: 0,
            config,
            env,
        }
    }

    /// Process an event and return the actions to perform.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connection` if the server sent a frame that is invalid
    ///   in the current session state. The frame is dropped; state is intact.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let actions = match event {
            ClientEvent::Connect { credential } => {
                let now = self.env.now();
                let actions = self.connection.connect(credential, now);
                self.apply_connection(actions)
            },
            ClientEvent::Disconnect => {
                let now = self.env.now();
                let actions = self.connection.disconnect(now);
                self.apply_connection(actions)
            },
            ClientEvent::TransportOpened => {
                let now = self.env.now();
                let actions = self.connection.transport_opened(now);
                self.apply_connection(actions)
            },
            ClientEvent::TransportClosed { reason } => {
                let now = self.env.now();
                let actions = self.connection.transport_closed(&reason, now);
                self.apply_connection(actions)
            },
            ClientEvent::FrameReceived(frame) => self.handle_frame(&frame)?,
            ClientEvent::HeartbeatReceived => {
                self.connection.record_heartbeat(self.env.now());
                Vec::new()
            },
            ClientEvent::Tick { now } => self.handle_tick(now),
            ClientEvent::SetActiveRoom { room_id } => self.set_active_room(room_id),
            ClientEvent::SendMessage { room_id, content } => self.handle_send(room_id, &content),
            ClientEvent::PublishCompleted { token } => {
                if self.pending_sends.remove(&token).is_none() {
                    debug!(?token, "completion for unknown publish");
                }
                Vec::new()
            },
            ClientEvent::PublishFailed { token, reason } => self.handle_publish_failed(token, reason),
            ClientEvent::HistoryLoaded { ticket, messages } => self.handle_history(ticket, messages),
            ClientEvent::HistoryFailed { ticket, reason } => {
                warn!(room_id = ticket.room_id, %reason, "history fetch failed, keeping cache");
                Vec::new()
            },
            ClientEvent::RoomsLoaded { ticket, rooms } => {
                if !self.freshness.rooms_is_fresh(ticket) {
                    debug!(generation = ticket.generation.value(), "discarding stale room list");
                    return Ok(Vec::new());
                }
                self.rooms_in_flight = false;
                let mut actions = self.handle_rooms(rooms);
                actions.extend(self.take_refetch());
                actions
            },
            ClientEvent::RoomsFailed { ticket, reason } => {
                if !self.freshness.rooms_is_fresh(ticket) {
                    return Ok(Vec::new());
                }
                self.rooms_in_flight = false;
                warn!(%reason, "room list refresh failed, keeping list");
                self.take_refetch().into_iter().collect()
            },
            ClientEvent::FocusChanged { focused } => {
                let now = self.env.now();
                let overdue = self.refresh.set_focus(focused, now);
                debug!(focused, overdue, "focus changed");
                if overdue && !self.rooms_in_flight {
                    self.request_rooms().into_iter().collect()
                } else {
                    Vec::new()
                }
            },
            ClientEvent::StartPersonalRoom { user_id } => {
                vec![ClientAction::StartPersonalRoom { user_id }]
            },
            ClientEvent::PersonalRoomReady { room_id } => {
                info!(room_id, "personal room ready");
                let mut actions = self.set_active_room(Some(room_id));
                actions.extend(self.request_rooms());
                actions
            },
            ClientEvent::PersonalRoomFailed { user_id, reason } => {
                warn!(user_id, %reason, "personal room provisioning failed");
                vec![ClientAction::Notify(Notification::Toast(PERSONAL_ROOM_FAILED.to_string()))]
            },
            ClientEvent::UserLoaded { room_id, participant } => {
                self.handle_user_loaded(room_id, participant)
            },
            ClientEvent::UserFailed { room_id, user_id, reason } => {
                self.pending_users.remove(&(room_id, user_id));
                warn!(room_id, user_id, %reason, "sender lookup failed, keeping placeholder");
                Vec::new()
            },
        };

        if actions.iter().any(|a| matches!(a, ClientAction::Send(_) | ClientAction::Publish { .. }))
        {
            self.connection.mark_sent(self.env.now());
        }

        Ok(actions)
    }

    /// Check whether a send of `content` to `room_id` would be accepted now.
    ///
    /// # Errors
    ///
    /// - The [`SendRefusal`] for the first failed precondition
    pub fn check_send(&self, room_id: RoomId, content: &str) -> Result<(), SendRefusal> {
        send::prepare(self.connection.state(), &self.subscriptions, room_id, content).map(|_| ())
    }

    /// Environment the client reads time from.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Connection state machine, for inspection.
    pub fn connection(&self) -> &Connection<E::Instant> {
        &self.connection
    }

    /// Room the user has open.
    pub fn active_room(&self) -> Option<RoomId> {
        self.subscriptions.active_room()
    }

    /// Live room subscription, if any.
    pub fn live_subscription(&self) -> Option<&LiveSubscription> {
        self.subscriptions.live()
    }

    /// Check if `room_id` has a live subscription. Sending requires it.
    pub fn is_subscribed(&self, room_id: RoomId) -> bool {
        self.subscriptions.is_subscribed(room_id)
    }

    /// Check if the personal error queue is subscribed.
    pub fn error_channel_live(&self) -> bool {
        self.errors.is_live()
    }

    /// Check if the personal room-list queue is subscribed.
    pub fn room_updates_live(&self) -> bool {
        self.room_updates.is_live()
    }

    /// Messages of `room_id` in ascending id order.
    pub fn messages(&self, room_id: RoomId) -> impl Iterator<Item = &ChatMessage> {
        self.cache.messages(room_id)
    }

    /// Message cache.
    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    /// Room list in display order.
    pub fn rooms(&self) -> &RoomList {
        &self.rooms
    }

    /// Number of publishes awaiting a transport result.
    pub fn pending_sends(&self) -> usize {
        self.pending_sends.len()
    }

    /// Translate connection actions, hooking session start and end.
    fn apply_connection(&mut self, actions: Vec<ConnectionAction>) -> Vec<ClientAction> {
        let mut out = Vec::with_capacity(actions.len());

        for action in actions {
            match action {
                ConnectionAction::Open => out.push(ClientAction::Open),
                ConnectionAction::SendFrame(frame) => out.push(ClientAction::Send(frame)),
                ConnectionAction::SendHeartbeat => out.push(ClientAction::SendHeartbeat),
                ConnectionAction::Close { reason } => out.push(ClientAction::Close { reason }),
                ConnectionAction::StateChanged { from, to } => {
                    out.push(ClientAction::Notify(Notification::StateChanged { from, to }));
                    if to == ConnectionState::Connected {
                        self.on_session_established(&mut out);
                    } else if from == ConnectionState::Connected {
                        self.on_session_lost();
                    }
                },
                ConnectionAction::Disconnected { reason } => {
                    out.push(ClientAction::Notify(Notification::Disconnected { reason }));
                },
                ConnectionAction::AuthFailed { reason } => {
                    out.push(ClientAction::Notify(Notification::AuthFailed { reason }));
                },
            }
        }

        out
    }

    /// Rebuild every subscription and catch up on what was missed.
    fn on_session_established(&mut self, out: &mut Vec<ClientAction>) {
        let mut subscriptions: Vec<SubscriptionAction> = Vec::new();
        subscriptions.extend(self.errors.on_connected());
        subscriptions.extend(self.room_updates.on_connected());
        subscriptions.extend(self.subscriptions.on_connected());

        debug!(count = subscriptions.len(), "rebuilding subscriptions");
        out.extend(subscriptions.iter().map(|s| ClientAction::Send(s.to_frame())));

        if let Some(room_id) = self.subscriptions.active_room() {
            out.push(self.fetch_history(room_id));
        }
        out.extend(self.request_rooms());
    }

    fn on_session_lost(&mut self) {
        self.errors.on_disconnected();
        self.room_updates.on_disconnected();
        self.subscriptions.on_disconnected();
    }

    fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<ClientAction>, ClientError> {
        let now = self.env.now();
        let actions = self.connection.handle_frame(frame, now)?;
        let mut out = self.apply_connection(actions);

        if frame.command == Command::Message && self.connection.is_connected() {
            self.route_message(frame, now, &mut out);
        }

        Ok(out)
    }

    /// Dispatch a MESSAGE frame by its subscription id.
    fn route_message(&mut self, frame: &Frame, now: E::Instant, out: &mut Vec<ClientAction>) {
        let Some(subscription) = frame.header(names::SUBSCRIPTION) else {
            debug!("dropping message without subscription header");
            return;
        };

        if self.errors.owns(subscription) {
            self.handle_server_error(frame, out);
        } else if self.room_updates.owns(subscription) {
            self.handle_preview(frame, out);
        } else if let Some(room_id) = self.subscriptions.route(subscription) {
            self.handle_pushed(room_id, frame, now, out);
        } else {
            debug!(subscription, "dropping message for stale subscription");
        }
    }

    fn handle_server_error(&mut self, frame: &Frame, out: &mut Vec<ClientAction>) {
        let notice = self.errors.handle_frame(frame);
        let active = self.subscriptions.active_room();
        let close = notice.closes_view()
            && active.is_some()
            && notice.event.room_id.is_none_or(|room_id| active == Some(room_id));

        out.push(ClientAction::Notify(Notification::ServerError(notice)));
        if close {
            info!(room_id = ?active, "server closed the active room");
            out.extend(self.set_active_room(None));
        }
    }

    fn handle_preview(&mut self, frame: &Frame, out: &mut Vec<ClientAction>) {
        let preview: RoomPreview = match payloads::decode_json(frame) {
            Ok(preview) => preview,
            Err(error) => {
                warn!(%error, "undecodable room preview");
                return;
            },
        };

        let active = self.subscriptions.active_room();
        match self.rooms.apply_preview(&preview, active, self.env.wall_clock()) {
            PreviewOutcome::Updated => out.push(ClientAction::Notify(Notification::RoomsChanged)),
            PreviewOutcome::Unknown => out.extend(self.request_rooms()),
        }
    }

    fn handle_pushed(
        &mut self,
        room_id: RoomId,
        frame: &Frame,
        now: E::Instant,
        out: &mut Vec<ClientAction>,
    ) {
        let event: PushedMessage = match payloads::decode_json(frame) {
            Ok(event) => event,
            Err(error) => {
                warn!(room_id, %error, "undecodable pushed message");
                return;
            },
        };
        if event.chat_room_id != room_id {
            warn!(
                room_id,
                payload_room = event.chat_room_id,
                "pushed message does not match its subscription"
            );
            return;
        }

        if self.cache.apply_pushed(&event) == PushOutcome::Duplicate {
            return;
        }
        out.push(ClientAction::Notify(Notification::MessagesChanged { room_id }));

        let sender_id = event.sender_id;
        if self.cache.sender(room_id, sender_id).is_none() {
            let participant = self
                .rooms
                .get(room_id)
                .and_then(|room| room.participants.iter().find(|p| p.user_id == sender_id))
                .cloned();
            let resolved = participant
                .is_some_and(|p| self.cache.remember_sender(room_id, &Sender::from(p)));

            if !resolved && self.pending_users.insert((room_id, sender_id)) {
                out.push(ClientAction::FetchUser { room_id, user_id: sender_id });
            }
        }

        // Re-fetching history marks the room read on the server
        if sender_id != self.config.user_id && self.read_sync.try_fire(now) {
            out.push(self.fetch_history(room_id));
        }
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        let actions = self.connection.tick(now);
        let mut out = self.apply_connection(actions);

        if !self.rooms_in_flight && self.refresh.due(now) {
            out.extend(self.request_rooms());
        }

        out
    }

    fn set_active_room(&mut self, room_id: Option<RoomId>) -> Vec<ClientAction> {
        let previous = self.subscriptions.active_room();
        let mut out: Vec<_> = self
            .subscriptions
            .set_active_room(room_id)
            .iter()
            .map(|s| ClientAction::Send(s.to_frame()))
            .collect();

        if previous == room_id {
            return out;
        }

        self.freshness.room_switched();
        info!(from = ?previous, to = ?room_id, "active room changed");
        out.push(ClientAction::Notify(Notification::ActiveRoomChanged { room_id }));

        if let Some(room_id) = room_id {
            out.push(self.fetch_history(room_id));
        }
        out
    }

    fn handle_send(&mut self, room_id: RoomId, content: &str) -> Vec<ClientAction> {
        let outbound =
            match send::prepare(self.connection.state(), &self.subscriptions, room_id, content) {
                Ok(outbound) => outbound,
                Err(refusal) => {
                    debug!(room_id, %refusal, "send refused");
                    return Vec::new();
                },
            };

        let snapshot = self.rooms.apply_local_send(room_id, &outbound.content, self.env.wall_clock());
        let listed = snapshot.is_some();

        self.next_token += 1;
        let token = SendToken(self.next_token);
        self.pending_sends.insert(token, PendingSend { room_id, snapshot });
        debug!(room_id, ?token, "publishing message");

        let mut out = vec![ClientAction::Publish { token, frame: outbound.frame }];
        if listed {
            out.push(ClientAction::Notify(Notification::RoomsChanged));
        }
        out
    }

    fn handle_publish_failed(&mut self, token: SendToken, reason: String) -> Vec<ClientAction> {
        let Some(pending) = self.pending_sends.remove(&token) else {
            debug!(?token, "failure for unknown publish");
            return Vec::new();
        };

        warn!(room_id = pending.room_id, %reason, "publish failed");
        let mut out = Vec::new();
        if let Some(snapshot) = pending.snapshot
            && self.rooms.restore(snapshot)
        {
            out.push(ClientAction::Notify(Notification::RoomsChanged));
        }
        out.push(ClientAction::Notify(Notification::SendFailed {
            room_id: pending.room_id,
            reason,
        }));
        out
    }

    fn handle_history(&mut self, ticket: HistoryTicket, messages: Vec<ChatMessage>) -> Vec<ClientAction> {
        let room_id = ticket.room_id;
        if !self.freshness.history_is_fresh(ticket, self.subscriptions.active_room()) {
            debug!(room_id, "discarding stale history");
            return Vec::new();
        }

        let cached = self.cache.load_history(room_id, messages);
        debug!(room_id, cached, "history loaded");

        // The fetch marked the room read; pull the new unread counts
        let mut out = vec![ClientAction::Notify(Notification::MessagesChanged { room_id })];
        out.extend(self.request_rooms());
        out
    }

    fn handle_rooms(&mut self, rooms: Vec<ChatRoom>) -> Vec<ClientAction> {
        let active = self.subscriptions.active_room();
        let cached: HashSet<RoomId> = self.cache.room_ids().collect();
        let mut upgraded = false;

        for room in &rooms {
            if !cached.contains(&room.room_id) && active != Some(room.room_id) {
                continue;
            }
            for participant in &room.participants {
                let sender = Sender::from(participant.clone());
                if self.cache.remember_sender(room.room_id, &sender) && active == Some(room.room_id)
                {
                    upgraded = true;
                }
            }
        }

        let listed: HashSet<RoomId> = rooms.iter().map(|room| room.room_id).collect();
        self.rooms.replace(rooms);
        self.cache.retain_rooms(|room_id| listed.contains(&room_id) || active == Some(room_id));

        let mut out = vec![ClientAction::Notify(Notification::RoomsChanged)];
        if upgraded && let Some(room_id) = active {
            out.push(ClientAction::Notify(Notification::MessagesChanged { room_id }));
        }
        out
    }

    fn handle_user_loaded(&mut self, room_id: RoomId, participant: Participant) -> Vec<ClientAction> {
        self.pending_users.remove(&(room_id, participant.user_id));

        if self.cache.remember_sender(room_id, &Sender::from(participant)) {
            vec![ClientAction::Notify(Notification::MessagesChanged { room_id })]
        } else {
            Vec::new()
        }
    }

    fn fetch_history(&self, room_id: RoomId) -> ClientAction {
        ClientAction::FetchHistory { ticket: self.freshness.history_ticket(room_id) }
    }

    /// Issue a room list fetch.
    ///
    /// While one is in flight the request is folded into a single follow-up
    /// issued when it lands or fails.
    fn request_rooms(&mut self) -> Option<ClientAction> {
        if self.rooms_in_flight {
            debug!("room list fetch in flight, refetching when it lands");
            self.rooms_refetch = true;
            return None;
        }
        self.rooms_in_flight = true;
        Some(ClientAction::FetchRooms { ticket: self.freshness.rooms_ticket() })
    }

    fn take_refetch(&mut self) -> Option<ClientAction> {
        if std::mem::take(&mut self.rooms_refetch) { self.request_rooms() } else { None }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use chrono::{DateTime, TimeZone, Utc};
    use parley_core::{RoomKind, RoomsTicket};

    use super::*;

    const ME: UserId = 1;

    #[derive(Clone)]
    struct TestEnv {
        base: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self { base: Instant::now(), offset: Arc::new(Mutex::new(Duration::ZERO)) }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }

        fn wall_clock(&self) -> DateTime<Utc> {
            let offset = *self.offset.lock().unwrap();
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
                + chrono::Duration::from_std(offset).unwrap()
        }
    }

    fn client() -> Client<TestEnv> {
        Client::new(TestEnv::new(), ClientConfig::new(ME))
    }

    fn connected_frame() -> Frame {
        Frame::new(Command::Connected).with_header("version", "1.2").with_header("heart-beat", "0,0")
    }

    fn connect(client: &mut Client<TestEnv>) -> Vec<ClientAction> {
        client.handle(ClientEvent::Connect { credential: None }).unwrap();
        client.handle(ClientEvent::TransportOpened).unwrap();
        client.handle(ClientEvent::FrameReceived(connected_frame())).unwrap()
    }

    fn push(subscription: &str, room: RoomId, id: u64, sender: UserId) -> Frame {
        let body = format!(
            r#"{{"messageId":{id},"chatRoomId":{room},"senderId":{sender},"content":"msg {id}"}}"#
        );
        Frame::new(Command::Message)
            .with_header("subscription", subscription)
            .with_header("destination", format!("/topic/chat/rooms/{room}"))
            .with_header("message-id", id.to_string())
            .with_body(body)
    }

    fn subscribed(actions: &[ClientAction]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                ClientAction::Send(f) if f.command == Command::Subscribe => {
                    f.header("destination").map(str::to_string)
                },
                _ => None,
            })
            .collect()
    }

    fn history_tickets(actions: &[ClientAction]) -> Vec<HistoryTicket> {
        actions
            .iter()
            .filter_map(|a| match a {
                ClientAction::FetchHistory { ticket } => Some(*ticket),
                _ => None,
            })
            .collect()
    }

    fn rooms_ticket(actions: &[ClientAction]) -> Option<RoomsTicket> {
        actions.iter().find_map(|a| match a {
            ClientAction::FetchRooms { ticket } => Some(*ticket),
            _ => None,
        })
    }

    fn room(room_id: RoomId, participants: Vec<Participant>) -> ChatRoom {
        ChatRoom {
            room_id,
            name: format!("room {room_id}"),
            kind: RoomKind::ProjectGroup,
            participants,
            last_message: String::new(),
            last_message_time: String::new(),
            last_message_at: None,
            unread_count: 0,
            related_task_id: None,
        }
    }

    fn live_id(client: &Client<TestEnv>) -> String {
        client.live_subscription().unwrap().id.clone()
    }

    #[test]
    fn session_subscribes_error_queue_and_fetches_rooms() {
        let mut client = client();
        let actions = connect(&mut client);

        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(subscribed(&actions), vec!["/user/queue/errors".to_string()]);
        assert!(rooms_ticket(&actions).is_some());
        assert!(client.error_channel_live());
        assert!(!client.room_updates_live());
    }

    #[test]
    fn room_requested_before_connect_subscribes_last_one_only() {
        let mut client = client();
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(9) }).unwrap();

        let actions = connect(&mut client);

        let rooms: Vec<_> =
            subscribed(&actions).into_iter().filter(|d| d.starts_with("/topic")).collect();
        assert_eq!(rooms, vec!["/topic/chat/rooms/9".to_string()]);
        assert_eq!(client.live_subscription().map(|l| l.room_id), Some(9));
        assert_eq!(history_tickets(&actions).len(), 1);
    }

    #[test]
    fn switching_rooms_unsubscribes_before_subscribing() {
        let mut client = client();
        connect(&mut client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let old = live_id(&client);

        let actions = client.handle(ClientEvent::SetActiveRoom { room_id: Some(9) }).unwrap();
        let commands: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                ClientAction::Send(f) => Some((f.command, f.header("id").map(str::to_string))),
                _ => None,
            })
            .collect();

        assert_eq!(commands[0], (Command::Unsubscribe, Some(old)));
        assert_eq!(commands[1].0, Command::Subscribe);
        assert!(actions.contains(&ClientAction::Notify(Notification::ActiveRoomChanged {
            room_id: Some(9)
        })));
    }

    #[test]
    fn pushed_message_lands_in_cache_once() {
        let mut client = client();
        connect(&mut client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let sub = live_id(&client);

        let first = client.handle(ClientEvent::FrameReceived(push(&sub, 7, 101, 5))).unwrap();
        let again = client.handle(ClientEvent::FrameReceived(push(&sub, 7, 101, 5))).unwrap();

        let cached: Vec<_> = client.messages(7).collect();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].message_id, 101);
        assert_eq!(cached[0].sender.user_id, 5);
        assert_eq!(cached[0].content, "msg 101");
        assert!(first.contains(&ClientAction::Notify(Notification::MessagesChanged { room_id: 7 })));
        assert!(again.is_empty());
    }

    #[test]
    fn message_on_stale_subscription_dropped() {
        let mut client = client();
        connect(&mut client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let old = live_id(&client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(9) }).unwrap();

        let actions = client.handle(ClientEvent::FrameReceived(push(&old, 7, 1, 5))).unwrap();

        assert!(actions.is_empty());
        assert_eq!(client.cache().len(7), 0);
        assert_eq!(client.cache().len(9), 0);
    }

    #[test]
    fn payload_for_other_room_dropped() {
        let mut client = client();
        connect(&mut client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let sub = live_id(&client);

        client.handle(ClientEvent::FrameReceived(push(&sub, 8, 1, 5))).unwrap();

        assert_eq!(client.cache().len(7), 0);
        assert_eq!(client.cache().len(8), 0);
    }

    #[test]
    fn stale_history_discarded() {
        let mut client = client();
        connect(&mut client);
        let to_a = client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let ticket_a = history_tickets(&to_a)[0];
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(9) }).unwrap();

        let late = vec![ChatMessage {
            message_id: 1,
            room_id: 7,
            sender: Sender::placeholder(5),
            content: "late".to_string(),
            sent_time: String::new(),
            display_time: String::new(),
        }];
        let actions =
            client.handle(ClientEvent::HistoryLoaded { ticket: ticket_a, messages: late }).unwrap();

        assert!(actions.is_empty());
        assert_eq!(client.cache().len(7), 0);
        assert_eq!(client.cache().len(9), 0);
    }

    #[test]
    fn fresh_history_merges_and_refreshes_rooms() {
        let mut client = client();
        let actions = connect(&mut client);
        let ticket = rooms_ticket(&actions).unwrap();
        client.handle(ClientEvent::RoomsLoaded { ticket, rooms: vec![room(7, vec![])] }).unwrap();
        let actions = client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let ticket = history_tickets(&actions)[0];

        let messages = vec![ChatMessage {
            message_id: 3,
            room_id: 0,
            sender: Sender { user_id: 5, name: "Kim".to_string(), profile_image_url: None },
            content: "hello".to_string(),
            sent_time: String::new(),
            display_time: String::new(),
        }];
        let actions = client.handle(ClientEvent::HistoryLoaded { ticket, messages }).unwrap();

        assert_eq!(client.cache().len(7), 1);
        assert_eq!(client.messages(7).next().unwrap().room_id, 7);
        assert!(rooms_ticket(&actions).is_some());
    }

    #[test]
    fn send_refused_when_not_subscribed() {
        let mut client = client();
        connect(&mut client);
        let before: Vec<_> = client.rooms().iter().cloned().collect();

        let actions = client
            .handle(ClientEvent::SendMessage { room_id: 7, content: "hello".to_string() })
            .unwrap();

        assert!(actions.is_empty());
        assert_eq!(client.rooms().iter().cloned().collect::<Vec<_>>(), before);
        assert_eq!(client.check_send(7, "hello"), Err(SendRefusal::NotSubscribed(7)));
    }

    #[test]
    fn send_publishes_and_updates_room_optimistically() {
        let mut client = client();
        let actions = connect(&mut client);
        let ticket = rooms_ticket(&actions).unwrap();
        client
            .handle(ClientEvent::RoomsLoaded { ticket, rooms: vec![room(3, vec![]), room(7, vec![])] })
            .unwrap();
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();

        let actions = client
            .handle(ClientEvent::SendMessage { room_id: 7, content: "hello".to_string() })
            .unwrap();

        let ClientAction::Publish { frame, .. } = &actions[0] else {
            panic!("expected publish, got {actions:?}");
        };
        assert_eq!(frame.header("destination"), Some("/app/chat/rooms/7"));

        let top = client.rooms().iter().next().unwrap();
        assert_eq!(top.room_id, 7);
        assert_eq!(top.last_message, "hello");
        assert_eq!(top.last_message_time, parley_core::time::JUST_NOW);
        assert_eq!(client.pending_sends(), 1);
    }

    #[test]
    fn failed_publish_rolls_back_room_list() {
        let mut client = client();
        let actions = connect(&mut client);
        let ticket = rooms_ticket(&actions).unwrap();
        client
            .handle(ClientEvent::RoomsLoaded { ticket, rooms: vec![room(3, vec![]), room(7, vec![])] })
            .unwrap();
        let before: Vec<_> = client.rooms().iter().cloned().collect();
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();

        let actions = client
            .handle(ClientEvent::SendMessage { room_id: 7, content: "hello".to_string() })
            .unwrap();
        let ClientAction::Publish { token, .. } = actions[0].clone() else {
            panic!("expected publish");
        };

        let actions = client
            .handle(ClientEvent::PublishFailed { token, reason: "socket closed".to_string() })
            .unwrap();

        assert_eq!(client.rooms().iter().cloned().collect::<Vec<_>>(), before);
        assert!(actions.contains(&ClientAction::Notify(Notification::SendFailed {
            room_id: 7,
            reason: "socket closed".to_string(),
        })));
        assert_eq!(client.pending_sends(), 0);
    }

    #[test]
    fn disconnect_notified_once_per_episode() {
        let mut client = client();
        connect(&mut client);

        let mut actions = client
            .handle(ClientEvent::FrameReceived(
                Frame::new(Command::Error).with_header("message", "broker restarting"),
            ))
            .unwrap();
        actions.extend(
            client.handle(ClientEvent::TransportClosed { reason: "eof".to_string() }).unwrap(),
        );

        let notified = actions
            .iter()
            .filter(|a| matches!(a, ClientAction::Notify(Notification::Disconnected { .. })))
            .count();
        assert_eq!(notified, 1);
        assert!(!client.error_channel_live());
        assert!(client.live_subscription().is_none());
    }

    #[test]
    fn reconnect_rebuilds_subscriptions() {
        let env = TestEnv::new();
        let mut client = Client::new(env.clone(), ClientConfig::new(ME));
        connect(&mut client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        client.handle(ClientEvent::TransportClosed { reason: "reset".to_string() }).unwrap();

        env.advance(Duration::from_secs(5));
        let actions = client.handle(ClientEvent::Tick { now: env.now() }).unwrap();
        assert!(actions.contains(&ClientAction::Open));

        client.handle(ClientEvent::TransportOpened).unwrap();
        let actions = client.handle(ClientEvent::FrameReceived(connected_frame())).unwrap();

        let mut destinations = subscribed(&actions);
        destinations.sort();
        assert_eq!(destinations, vec![
            "/topic/chat/rooms/7".to_string(),
            "/user/queue/errors".to_string()
        ]);
        assert_eq!(history_tickets(&actions).len(), 1);
    }

    #[test]
    fn auth_failure_surfaces_and_stops_retry() {
        let env = TestEnv::new();
        let mut client = Client::new(env.clone(), ClientConfig::new(ME));
        client.handle(ClientEvent::Connect { credential: None }).unwrap();
        client.handle(ClientEvent::TransportOpened).unwrap();

        let actions = client
            .handle(ClientEvent::FrameReceived(
                Frame::new(Command::Error).with_header("message", "401 Unauthorized"),
            ))
            .unwrap();
        assert!(
            actions.iter().any(|a| matches!(a, ClientAction::Notify(Notification::AuthFailed { .. })))
        );

        env.advance(Duration::from_secs(60));
        let actions = client.handle(ClientEvent::Tick { now: env.now() }).unwrap();
        assert!(!actions.contains(&ClientAction::Open));
    }

    #[test]
    fn server_error_with_close_leaves_room() {
        let mut client = client();
        connect(&mut client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();

        let frame = Frame::new(Command::Message)
            .with_header("subscription", "errors")
            .with_body(r#"{"code":"ROOM_CLOSED","message":"Room was deleted","roomId":7,"action":"close"}"#);
        let actions = client.handle(ClientEvent::FrameReceived(frame)).unwrap();

        assert!(actions.iter().any(|a| matches!(
            a,
            ClientAction::Notify(Notification::ServerError(n)) if n.toast == "Room was deleted"
        )));
        assert_eq!(client.active_room(), None);
        assert!(client.live_subscription().is_none());
    }

    #[test]
    fn toast_error_keeps_room_open() {
        let mut client = client();
        connect(&mut client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();

        let frame = Frame::new(Command::Message)
            .with_header("subscription", "errors")
            .with_body(r#"{"message":"Slow down"}"#);
        client.handle(ClientEvent::FrameReceived(frame)).unwrap();

        assert_eq!(client.active_room(), Some(7));
    }

    #[test]
    fn read_sync_throttled_and_skips_own_messages() {
        let env = TestEnv::new();
        let mut client = Client::new(env.clone(), ClientConfig::new(ME));
        connect(&mut client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let sub = live_id(&client);

        let own = client.handle(ClientEvent::FrameReceived(push(&sub, 7, 1, ME))).unwrap();
        assert!(history_tickets(&own).is_empty());

        let first = client.handle(ClientEvent::FrameReceived(push(&sub, 7, 2, 5))).unwrap();
        let second = client.handle(ClientEvent::FrameReceived(push(&sub, 7, 3, 5))).unwrap();
        assert_eq!(history_tickets(&first).len(), 1);
        assert!(history_tickets(&second).is_empty());

        env.advance(Duration::from_millis(800));
        let later = client.handle(ClientEvent::FrameReceived(push(&sub, 7, 4, 5))).unwrap();
        assert_eq!(history_tickets(&later).len(), 1);
    }

    #[test]
    fn unknown_sender_looked_up_once_and_upgraded() {
        let mut client = client();
        connect(&mut client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let sub = live_id(&client);

        let first = client.handle(ClientEvent::FrameReceived(push(&sub, 7, 1, 5))).unwrap();
        let second = client.handle(ClientEvent::FrameReceived(push(&sub, 7, 2, 5))).unwrap();
        let lookups = |actions: &[ClientAction]| {
            actions.iter().filter(|a| matches!(a, ClientAction::FetchUser { .. })).count()
        };
        assert_eq!(lookups(&first), 1);
        assert_eq!(lookups(&second), 0);

        let participant =
            Participant { user_id: 5, name: "Kim".to_string(), profile_image_url: None };
        let actions =
            client.handle(ClientEvent::UserLoaded { room_id: 7, participant }).unwrap();

        assert!(actions.contains(&ClientAction::Notify(Notification::MessagesChanged { room_id: 7 })));
        assert!(client.messages(7).all(|m| m.sender.name == "Kim"));
    }

    #[test]
    fn sender_resolved_from_room_participants() {
        let mut client = client();
        let actions = connect(&mut client);
        let ticket = rooms_ticket(&actions).unwrap();
        let kim = Participant { user_id: 5, name: "Kim".to_string(), profile_image_url: None };
        client.handle(ClientEvent::RoomsLoaded { ticket, rooms: vec![room(7, vec![kim])] }).unwrap();
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let sub = live_id(&client);

        let actions = client.handle(ClientEvent::FrameReceived(push(&sub, 7, 1, 5))).unwrap();

        assert!(!actions.iter().any(|a| matches!(a, ClientAction::FetchUser { .. })));
        assert_eq!(client.messages(7).next().unwrap().sender.name, "Kim");
    }

    #[test]
    fn room_list_requests_coalesce_while_one_is_in_flight() {
        let mut client = client();
        let actions = connect(&mut client);
        let first = rooms_ticket(&actions).unwrap();

        let actions = client.handle(ClientEvent::PersonalRoomReady { room_id: 4 }).unwrap();
        assert!(rooms_ticket(&actions).is_none());
        assert_eq!(client.active_room(), Some(4));

        let actions = client
            .handle(ClientEvent::RoomsLoaded { ticket: first, rooms: vec![room(3, vec![])] })
            .unwrap();
        assert!(client.rooms().contains(3));
        let follow_up = rooms_ticket(&actions).unwrap();

        let actions = client
            .handle(ClientEvent::RoomsLoaded { ticket: follow_up, rooms: vec![room(3, vec![]), room(4, vec![])] })
            .unwrap();
        assert!(client.rooms().contains(4));
        assert!(rooms_ticket(&actions).is_none());
    }

    #[test]
    fn duplicate_room_list_completion_ignored() {
        let mut client = client();
        let actions = connect(&mut client);
        let ticket = rooms_ticket(&actions).unwrap();
        client.handle(ClientEvent::RoomsLoaded { ticket, rooms: vec![room(3, vec![])] }).unwrap();

        let env = client.env().clone();
        env.advance(Duration::from_secs(3));
        let actions = client.handle(ClientEvent::Tick { now: env.now() }).unwrap();
        let newer = rooms_ticket(&actions).unwrap();

        let actions =
            client.handle(ClientEvent::RoomsLoaded { ticket, rooms: vec![room(9, vec![])] }).unwrap();
        assert!(actions.is_empty());
        assert!(client.rooms().contains(3));

        client.handle(ClientEvent::RoomsLoaded { ticket: newer, rooms: vec![room(9, vec![])] }).unwrap();
        assert!(client.rooms().contains(9));
    }

    #[test]
    fn room_list_keeps_refreshing_under_steady_chat() {
        let env = TestEnv::new();
        let mut client = Client::new(env.clone(), ClientConfig::new(ME));
        let actions = connect(&mut client);
        let ticket = rooms_ticket(&actions).unwrap();
        client
            .handle(ClientEvent::RoomsLoaded { ticket, rooms: vec![room(7, vec![]), room(8, vec![])] })
            .unwrap();

        let actions = client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let history = history_tickets(&actions)[0];
        let actions =
            client.handle(ClientEvent::HistoryLoaded { ticket: history, messages: Vec::new() }).unwrap();
        let mut pending = rooms_ticket(&actions).unwrap();
        let sub = live_id(&client);

        // Another user writes every 900 ms; each room list response lands
        // only after the next read-sync history load.
        for unread in 1..=20u32 {
            env.advance(Duration::from_millis(900));
            let actions =
                client.handle(ClientEvent::FrameReceived(push(&sub, 7, u64::from(unread), 5))).unwrap();
            let history = history_tickets(&actions)[0];
            let actions = client
                .handle(ClientEvent::HistoryLoaded { ticket: history, messages: Vec::new() })
                .unwrap();
            assert!(rooms_ticket(&actions).is_none());

            let mut busy = room(8, vec![]);
            busy.unread_count = unread;
            let actions = client
                .handle(ClientEvent::RoomsLoaded { ticket: pending, rooms: vec![room(7, vec![]), busy] })
                .unwrap();
            assert_eq!(client.rooms().get(8).map(|r| r.unread_count), Some(unread));
            pending = rooms_ticket(&actions).unwrap();
        }
    }

    #[test]
    fn refreshed_list_evicts_unlisted_rooms() {
        let mut client = client();
        let actions = connect(&mut client);
        let initial = rooms_ticket(&actions).unwrap();
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(7) }).unwrap();
        let sub = live_id(&client);
        client.handle(ClientEvent::FrameReceived(push(&sub, 7, 1, 5))).unwrap();
        let actions = client.handle(ClientEvent::SetActiveRoom { room_id: Some(9) }).unwrap();
        assert!(rooms_ticket(&actions).is_none());

        let env = client.env().clone();
        env.advance(Duration::from_secs(3));
        let actions = client.handle(ClientEvent::Tick { now: env.now() }).unwrap();
        // The session's initial fetch is still outstanding
        assert!(rooms_ticket(&actions).is_none());

        client.handle(ClientEvent::RoomsLoaded { ticket: initial, rooms: vec![room(9, vec![])] }).unwrap();

        assert_eq!(client.cache().len(7), 0);
        assert!(client.cache().room_ids().all(|r| r == 9));
    }

    #[test]
    fn periodic_refresh_pauses_while_unfocused() {
        let env = TestEnv::new();
        let mut client = Client::new(env.clone(), ClientConfig::new(ME));

        let actions = client.handle(ClientEvent::Tick { now: env.now() }).unwrap();
        let ticket = rooms_ticket(&actions).unwrap();
        client.handle(ClientEvent::RoomsLoaded { ticket, rooms: Vec::new() }).unwrap();

        client.handle(ClientEvent::FocusChanged { focused: false }).unwrap();
        env.advance(Duration::from_secs(10));
        let actions = client.handle(ClientEvent::Tick { now: env.now() }).unwrap();
        assert!(rooms_ticket(&actions).is_none());

        let actions = client.handle(ClientEvent::FocusChanged { focused: true }).unwrap();
        assert!(rooms_ticket(&actions).is_some());
    }

    #[test]
    fn personal_room_ready_opens_room() {
        let mut client = client();
        let actions = connect(&mut client);
        let ticket = rooms_ticket(&actions).unwrap();
        client.handle(ClientEvent::RoomsLoaded { ticket, rooms: Vec::new() }).unwrap();

        let actions = client.handle(ClientEvent::StartPersonalRoom { user_id: 5 }).unwrap();
        assert_eq!(actions, vec![ClientAction::StartPersonalRoom { user_id: 5 }]);

        let actions = client.handle(ClientEvent::PersonalRoomReady { room_id: 12 }).unwrap();
        assert_eq!(client.active_room(), Some(12));
        assert_eq!(subscribed(&actions), vec!["/topic/chat/rooms/12".to_string()]);
        assert!(rooms_ticket(&actions).is_some());
    }

    #[test]
    fn room_preview_reorders_list() {
        let mut config = ClientConfig::new(ME);
        config.subscribe_room_updates = true;
        let mut client = Client::new(TestEnv::new(), config);
        let actions = connect(&mut client);
        assert!(subscribed(&actions).contains(&"/user/queue/chat/rooms".to_string()));

        let ticket = rooms_ticket(&actions).unwrap();
        client
            .handle(ClientEvent::RoomsLoaded { ticket, rooms: vec![room(3, vec![]), room(7, vec![])] })
            .unwrap();

        let frame = Frame::new(Command::Message)
            .with_header("subscription", ROOM_UPDATES_SUBSCRIPTION_ID)
            .with_body(r#"{"chatRoomId":7,"lastMessage":"new","lastMessageTime":"12:01"}"#);
        let actions = client.handle(ClientEvent::FrameReceived(frame)).unwrap();

        assert_eq!(actions, vec![ClientAction::Notify(Notification::RoomsChanged)]);
        assert_eq!(client.rooms().iter().next().unwrap().room_id, 7);

        let unknown = Frame::new(Command::Message)
            .with_header("subscription", ROOM_UPDATES_SUBSCRIPTION_ID)
            .with_body(r#"{"chatRoomId":99,"lastMessage":"hi"}"#);
        let actions = client.handle(ClientEvent::FrameReceived(unknown)).unwrap();
        assert!(rooms_ticket(&actions).is_some());
    }
}
