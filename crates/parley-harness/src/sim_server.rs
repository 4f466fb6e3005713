//! In-memory chat server for simulation.
//!
//! `SimServer` plays both collaborators the client talks to: a STOMP broker
//! (connections, subscriptions, fan-out of room messages) and the REST API
//! (room lists, history, personal rooms, user profiles). Transport events for
//! each connection are queued on an unbounded channel that a driver drains.
//!
//! Besides normal behavior it exposes fault injection for tests: refused
//! sockets, rejected credentials, server-side drops, replayed and
//! out-of-order pushes, pushed error events and failing REST calls.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, TimeZone, Utc};
use parley_client::{RestError, TransportEvent};
use parley_core::{ChatMessage, ChatRoom, Participant, RoomKind, Sender};
use parley_proto::{
    Command, Destination, Frame, MessageId, RoomId, UserId,
    header::names,
    payloads::{ErrorEvent, PushedMessage, RoomPreview, SendBody},
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identifies one accepted socket.
pub type ConnId = u64;

/// Server shared between drivers, REST clients and the test.
pub type SharedSimServer = Arc<Mutex<SimServer>>;

/// Create an empty server behind a shared handle.
pub fn create_shared_server() -> SharedSimServer {
    Arc::new(Mutex::new(SimServer::new()))
}

/// Lock a shared server, ignoring poisoning from a panicked test thread.
pub fn lock(server: &SharedSimServer) -> MutexGuard<'_, SimServer> {
    server.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One accepted socket.
#[derive(Debug)]
struct SimConnection {
    outbox: mpsc::UnboundedSender<TransportEvent>,
    /// Set once CONNECTED was sent
    user_id: Option<UserId>,
    subscriptions: BTreeMap<String, Destination>,
    next_delivery: u64,
    heartbeats: u64,
}

impl SimConnection {
    fn deliver(&self, event: TransportEvent) {
        if self.outbox.send(event).is_err() {
            debug!("driver dropped its receiver");
        }
    }
}

#[derive(Debug, Clone)]
struct SimRoom {
    room: ChatRoom,
    history: BTreeMap<MessageId, ChatMessage>,
}

/// In-memory broker and REST backend.
#[derive(Debug)]
pub struct SimServer {
    connections: BTreeMap<ConnId, SimConnection>,
    next_conn: ConnId,
    rooms: BTreeMap<RoomId, SimRoom>,
    users: HashMap<UserId, Participant>,
    tokens: HashMap<String, UserId>,
    unread: HashMap<(RoomId, UserId), u32>,
    next_message_id: MessageId,
    next_room_id: RoomId,
    epoch: DateTime<Utc>,
    heart_beat: (u64, u64),
    reachable: bool,
    rest_failure: Option<RestError>,
    received: Vec<(ConnId, Frame)>,
}

impl Default for SimServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimServer {
    /// Server with no users, no rooms, heart-beats disabled.
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
            next_conn: 1,
            rooms: BTreeMap::new(),
            users: HashMap::new(),
            tokens: HashMap::new(),
            unread: HashMap::new(),
            next_message_id: 1,
            next_room_id: 1000,
            epoch: Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).single().unwrap_or_default(),
            heart_beat: (0, 0),
            reachable: true,
            rest_failure: None,
            received: Vec::new(),
        }
    }

    // Fixtures

    /// Register a user that authenticates with `token`.
    pub fn add_user(&mut self, user_id: UserId, name: &str, token: &str) {
        self.users.insert(user_id, Participant {
            user_id,
            name: name.to_string(),
            profile_image_url: None,
        });
        self.tokens.insert(token.to_string(), user_id);
    }

    /// Create a group room with the given members.
    pub fn add_room(&mut self, room_id: RoomId, name: &str, members: &[UserId]) {
        let participants = members.iter().filter_map(|id| self.users.get(id).cloned()).collect();
        self.rooms.insert(room_id, SimRoom {
            room: ChatRoom {
                room_id,
                name: name.to_string(),
                kind: RoomKind::ProjectGroup,
                participants,
                last_message: String::new(),
                last_message_time: String::new(),
                last_message_at: None,
                unread_count: 0,
                related_task_id: None,
            },
            history: BTreeMap::new(),
        });
    }

    /// Remove a room; members stop seeing it in their lists.
    pub fn remove_room(&mut self, room_id: RoomId) {
        self.rooms.remove(&room_id);
    }

    /// Heart-beat the broker offers in CONNECTED (`sx,sy` in milliseconds).
    pub fn set_heart_beat(&mut self, send_ms: u64, receive_ms: u64) {
        self.heart_beat = (send_ms, receive_ms);
    }

    /// Refuse (or accept again) new sockets.
    pub fn set_reachable(&mut self, reachable: bool) {
        self.reachable = reachable;
    }

    /// Make every REST call fail with `failure` until cleared with `None`.
    pub fn set_rest_failure(&mut self, failure: Option<RestError>) {
        self.rest_failure = failure;
    }

    /// Revoke `token`; the next CONNECT with it is rejected.
    pub fn revoke_token(&mut self, token: &str) {
        self.tokens.remove(token);
    }

    // Transport

    /// Accept a new socket.
    ///
    /// The receiver yields [`TransportEvent::Opened`] first.
    pub fn accept(&mut self) -> Result<(ConnId, mpsc::UnboundedReceiver<TransportEvent>), String> {
        if !self.reachable {
            return Err("connection refused".to_string());
        }

        let conn = self.next_conn;
        self.next_conn += 1;

        let (outbox, inbox) = mpsc::unbounded_channel();
        let connection = SimConnection {
            outbox,
            user_id: None,
            subscriptions: BTreeMap::new(),
            next_delivery: 0,
            heartbeats: 0,
        };
        connection.deliver(TransportEvent::Opened);
        self.connections.insert(conn, connection);

        debug!(conn, "socket accepted");
        Ok((conn, inbox))
    }

    /// Client closed its socket.
    pub fn close(&mut self, conn: ConnId) {
        if self.connections.remove(&conn).is_some() {
            debug!(conn, "socket closed by client");
        }
    }

    /// Drop a socket from the server side.
    pub fn drop_connection(&mut self, conn: ConnId, reason: &str) {
        if let Some(connection) = self.connections.remove(&conn) {
            connection.deliver(TransportEvent::Closed { reason: reason.to_string() });
            debug!(conn, reason, "socket dropped by server");
        }
    }

    /// Check if `conn` is open.
    pub fn is_open(&self, conn: ConnId) -> bool {
        self.connections.contains_key(&conn)
    }

    /// Check if `conn` completed the STOMP handshake.
    pub fn is_session(&self, conn: ConnId) -> bool {
        self.connections.get(&conn).is_some_and(|c| c.user_id.is_some())
    }

    /// Number of open sockets.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Client heart-beat EOL.
    pub fn heartbeat(&mut self, conn: ConnId) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.heartbeats += 1;
        }
    }

    /// Heart-beats received on `conn`.
    pub fn heartbeats(&self, conn: ConnId) -> u64 {
        self.connections.get(&conn).map_or(0, |c| c.heartbeats)
    }

    /// Process a frame written by the client.
    ///
    /// Returns `false` if `conn` is not open.
    pub fn receive(&mut self, conn: ConnId, frame: &Frame) -> bool {
        if !self.connections.contains_key(&conn) {
            return false;
        }
        self.received.push((conn, frame.clone()));

        match frame.command {
            Command::Connect | Command::Stomp => self.handle_connect(conn, frame),
            Command::Subscribe => self.handle_subscribe(conn, frame),
            Command::Unsubscribe => {
                if let (Some(connection), Some(id)) =
                    (self.connections.get_mut(&conn), frame.header(names::ID))
                {
                    connection.subscriptions.remove(id);
                }
            },
            Command::Send => self.handle_send(conn, frame),
            Command::Disconnect => {
                if let (Some(connection), Some(receipt)) =
                    (self.connections.get(&conn), frame.header(names::RECEIPT))
                {
                    connection.deliver(TransportEvent::Frame(
                        Frame::new(Command::Receipt).with_header(names::RECEIPT_ID, receipt),
                    ));
                }
            },
            command => warn!(conn, %command, "unexpected client command"),
        }
        true
    }

    /// Frames received so far, in order.
    pub fn received(&self) -> &[(ConnId, Frame)] {
        &self.received
    }

    /// Subscriptions registered on `conn`.
    pub fn subscriptions(&self, conn: ConnId) -> Vec<(String, Destination)> {
        self.connections
            .get(&conn)
            .map(|c| c.subscriptions.iter().map(|(id, d)| (id.clone(), *d)).collect())
            .unwrap_or_default()
    }

    /// Rooms `conn` is subscribed to, one entry per subscription.
    pub fn room_subscriptions(&self, conn: ConnId) -> Vec<RoomId> {
        self.subscriptions(conn)
            .into_iter()
            .filter_map(|(_, destination)| match destination {
                Destination::RoomTopic(room_id) => Some(room_id),
                _ => None,
            })
            .collect()
    }

    fn handle_connect(&mut self, conn: ConnId, frame: &Frame) {
        let user = frame
            .header(names::AUTHORIZATION)
            .and_then(|value| value.strip_prefix("Bearer "))
            .and_then(|token| self.tokens.get(token).copied());
        let heart_beat = format!("{},{}", self.heart_beat.0, self.heart_beat.1);

        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        match user {
            Some(user_id) => {
                connection.user_id = Some(user_id);
                connection.deliver(TransportEvent::Frame(
                    Frame::new(Command::Connected)
                        .with_header(names::VERSION, "1.2")
                        .with_header(names::HEART_BEAT, heart_beat),
                ));
            },
            None => {
                connection.deliver(TransportEvent::Frame(
                    Frame::new(Command::Error).with_header(names::MESSAGE, "401 Unauthorized"),
                ));
                self.drop_connection(conn, "authentication rejected");
            },
        }
    }

    fn handle_subscribe(&mut self, conn: ConnId, frame: &Frame) {
        let (Some(id), Some(destination)) = (frame.header(names::ID), frame.header(names::DESTINATION))
        else {
            warn!(conn, "SUBSCRIBE without id or destination");
            return;
        };
        let Ok(destination) = destination.parse::<Destination>() else {
            warn!(conn, destination, "SUBSCRIBE to unknown destination");
            return;
        };
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.subscriptions.insert(id.to_string(), destination);
        }
    }

    fn handle_send(&mut self, conn: ConnId, frame: &Frame) {
        let Some(sender) = self.connections.get(&conn).and_then(|c| c.user_id) else {
            warn!(conn, "SEND before CONNECTED");
            return;
        };
        let Some(Ok(Destination::RoomSend(room_id))) =
            frame.header(names::DESTINATION).map(str::parse::<Destination>)
        else {
            warn!(conn, "SEND to unknown destination");
            return;
        };
        let body: SendBody = match parley_proto::payloads::decode_json(frame) {
            Ok(body) => body,
            Err(error) => {
                warn!(conn, %error, "undecodable SEND body");
                return;
            },
        };

        self.post(room_id, sender, &body.content);
    }

    // Pushes

    /// Store a new message from `sender` and fan it out.
    ///
    /// Returns the assigned id, or `None` if the room does not exist.
    pub fn post(&mut self, room_id: RoomId, sender: UserId, content: &str) -> Option<MessageId> {
        let message_id = self.next_message_id;
        self.inject_message(room_id, message_id, sender, content).then_some(message_id)
    }

    /// Store and fan out a message with a caller-chosen id.
    ///
    /// Lets tests deliver ids out of order. Returns `false` if the room does
    /// not exist.
    pub fn inject_message(
        &mut self,
        room_id: RoomId,
        message_id: MessageId,
        sender: UserId,
        content: &str,
    ) -> bool {
        let at = self.epoch + chrono::Duration::seconds(message_id as i64);
        let author = self.sender(sender);
        let Some(room) = self.rooms.get_mut(&room_id) else {
            warn!(room_id, "message for unknown room");
            return false;
        };

        self.next_message_id = self.next_message_id.max(message_id + 1);
        room.history.insert(message_id, ChatMessage {
            message_id,
            room_id,
            sender: author,
            content: content.to_string(),
            sent_time: at.to_rfc3339(),
            display_time: at.format("%H:%M").to_string(),
        });
        room.room.last_message = content.to_string();
        room.room.last_message_time = at.format("%H:%M").to_string();
        room.room.last_message_at = Some(at);

        let members: Vec<UserId> = room.room.participants.iter().map(|p| p.user_id).collect();
        for member in members.iter().filter(|&&m| m != sender) {
            *self.unread.entry((room_id, *member)).or_default() += 1;
        }

        let pushed = PushedMessage {
            message_id,
            chat_room_id: room_id,
            sender_id: sender,
            content: content.to_string(),
            sent_time: at.to_rfc3339(),
            display_time: at.format("%H:%M").to_string(),
        };
        self.fan_out(&Destination::RoomTopic(room_id), &pushed, |_| true);

        let preview = RoomPreview {
            chat_room_id: room_id,
            last_message: content.to_string(),
            last_message_time: at.format("%H:%M").to_string(),
            last_message_at: Some(at.to_rfc3339()),
        };
        self.fan_out(&Destination::RoomListQueue, &preview, |user| members.contains(&user));
        true
    }

    /// Push every stored message of `room_id` again, as a broker replay
    /// after reconnect would.
    pub fn replay(&mut self, room_id: RoomId) {
        let Some(room) = self.rooms.get(&room_id) else {
            return;
        };
        let pushes: Vec<_> = room
            .history
            .values()
            .map(|m| PushedMessage {
                message_id: m.message_id,
                chat_room_id: room_id,
                sender_id: m.sender.user_id,
                content: m.content.clone(),
                sent_time: m.sent_time.clone(),
                display_time: m.display_time.clone(),
            })
            .collect();

        for pushed in &pushes {
            self.fan_out(&Destination::RoomTopic(room_id), pushed, |_| true);
        }
    }

    /// Push an error event to every session of `user_id`.
    pub fn push_error(&mut self, user_id: UserId, event: &ErrorEvent) {
        self.fan_out(&Destination::ErrorQueue, event, |user| user == user_id);
    }

    /// Deliver `payload` to every subscription on `destination` whose session
    /// user passes `audience`.
    fn fan_out<T: Serialize>(
        &mut self,
        destination: &Destination,
        payload: &T,
        audience: impl Fn(UserId) -> bool,
    ) {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "unencodable payload");
                return;
            },
        };

        for (conn, connection) in &mut self.connections {
            let Some(user) = connection.user_id else {
                continue;
            };
            if !audience(user) {
                continue;
            }

            let ids: Vec<String> = connection
                .subscriptions
                .iter()
                .filter(|(_, d)| *d == destination)
                .map(|(id, _)| id.clone())
                .collect();
            for id in ids {
                connection.next_delivery += 1;
                let frame = Frame::new(Command::Message)
                    .with_header(names::SUBSCRIPTION, id)
                    .with_header(names::DESTINATION, destination.to_string())
                    .with_header(names::MESSAGE_ID, format!("{conn}-{}", connection.next_delivery))
                    .with_header(names::CONTENT_TYPE, "application/json")
                    .with_body(body.clone());
                connection.deliver(TransportEvent::Frame(frame));
            }
        }
    }

    fn sender(&self, user_id: UserId) -> Sender {
        self.users.get(&user_id).cloned().map_or_else(|| Sender::placeholder(user_id), Sender::from)
    }

    // REST

    /// Room list as `user_id` sees it.
    pub fn rest_rooms(&self, user_id: UserId) -> Result<Vec<ChatRoom>, RestError> {
        self.check_rest()?;
        Ok(self
            .rooms
            .values()
            .filter(|r| r.room.participants.iter().any(|p| p.user_id == user_id))
            .map(|r| {
                let mut room = r.room.clone();
                room.unread_count =
                    self.unread.get(&(room.room_id, user_id)).copied().unwrap_or_default();
                room
            })
            .collect())
    }

    /// History of `room_id`; marks it read for `user_id`.
    pub fn rest_history(
        &mut self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<Vec<ChatMessage>, RestError> {
        self.check_rest()?;
        let room = self.rooms.get(&room_id).ok_or_else(|| not_found("room"))?;
        let history = room.history.values().cloned().collect();
        self.unread.remove(&(room_id, user_id));
        Ok(history)
    }

    /// Find or create the personal room between `user_id` and `other`.
    pub fn rest_personal_room(
        &mut self,
        user_id: UserId,
        other: UserId,
    ) -> Result<RoomId, RestError> {
        self.check_rest()?;
        if !self.users.contains_key(&other) {
            return Err(not_found("user"));
        }

        let existing = self.rooms.values().find(|r| {
            r.room.kind == RoomKind::Personal
                && r.room.participants.len() == 2
                && [user_id, other].iter().all(|u| r.room.participants.iter().any(|p| p.user_id == *u))
        });
        if let Some(room) = existing {
            return Ok(room.room.room_id);
        }

        let room_id = self.next_room_id;
        self.next_room_id += 1;
        let name = self.users.get(&other).map(|p| p.name.clone()).unwrap_or_default();
        self.add_room(room_id, &name, &[user_id, other]);
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.room.kind = RoomKind::Personal;
        }
        Ok(room_id)
    }

    /// Profile of `user_id`.
    pub fn rest_user(&self, user_id: UserId) -> Result<Participant, RestError> {
        self.check_rest()?;
        self.users.get(&user_id).cloned().ok_or_else(|| not_found("user"))
    }

    /// Unread count of `room_id` for `user_id`.
    pub fn unread(&self, room_id: RoomId, user_id: UserId) -> u32 {
        self.unread.get(&(room_id, user_id)).copied().unwrap_or_default()
    }

    fn check_rest(&self) -> Result<(), RestError> {
        match &self.rest_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

fn not_found(what: &str) -> RestError {
    RestError::Api { status: 404, message: format!("{what} not found") }
}
