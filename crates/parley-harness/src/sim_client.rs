//! Synchronous client pump for scenario tests.
//!
//! `SimClient` wires a [`Client`] straight to a [`SimServer`](crate::SimServer)
//! without any async runtime. Transport actions are applied to the server
//! immediately and the server's replies are fed back until the system is
//! quiescent. REST calls are queued so a test can complete them in any order,
//! or completed automatically.

use std::{collections::VecDeque, time::Duration};

use parley_client::{
    Client, ClientAction, ClientConfig, ClientError, ClientEvent, Notification, TransportEvent,
};
use parley_core::{Credential, Environment};
use parley_proto::{RoomId, UserId};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot},
    sim_env::{SimEnv, SimInstant},
    sim_server::{ConnId, SharedSimServer, lock},
};

/// Event type the simulated client consumes.
pub type SimEvent = ClientEvent<SimInstant>;

/// A client driven step by step against the simulated server.
pub struct SimClient {
    client: Client<SimEnv>,
    env: SimEnv,
    server: SharedSimServer,
    conn: Option<ConnId>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    pending_rest: VecDeque<ClientAction>,
    auto_rest: bool,
    fail_publishes: bool,
    notifications: Vec<Notification>,
    errors: Vec<ClientError>,
    invariants: Option<InvariantRegistry>,
}

impl SimClient {
    /// Client for `user_id` with default configuration.
    ///
    /// REST calls complete automatically and the standard invariants are
    /// checked whenever the system settles.
    pub fn new(server: SharedSimServer, env: SimEnv, user_id: UserId) -> Self {
        Self::with_config(server, env, ClientConfig::new(user_id))
    }

    /// Client with an explicit configuration.
    pub fn with_config(server: SharedSimServer, env: SimEnv, config: ClientConfig) -> Self {
        Self {
            client: Client::new(env.clone(), config),
            env,
            server,
            conn: None,
            events: None,
            pending_rest: VecDeque::new(),
            auto_rest: true,
            fail_publishes: false,
            notifications: Vec::new(),
            errors: Vec::new(),
            invariants: Some(InvariantRegistry::standard()),
        }
    }

    /// Queue REST calls until the test completes them.
    #[must_use]
    pub fn manual_rest(mut self) -> Self {
        self.auto_rest = false;
        self
    }

    /// Skip invariant checks.
    #[must_use]
    pub fn without_invariants(mut self) -> Self {
        self.invariants = None;
        self
    }

    /// Make publishes fail at the transport until turned off again.
    pub fn set_fail_publishes(&mut self, fail: bool) {
        self.fail_publishes = fail;
    }

    // Operations

    /// Connect with `token`.
    pub fn connect(&mut self, token: &str) -> Vec<ClientAction> {
        self.handle(ClientEvent::Connect { credential: Some(Credential::bearer(token)) })
    }

    /// Disconnect gracefully.
    pub fn disconnect(&mut self) -> Vec<ClientAction> {
        self.handle(ClientEvent::Disconnect)
    }

    /// Open `room_id`, or close the current room.
    pub fn set_active_room(&mut self, room_id: Option<RoomId>) -> Vec<ClientAction> {
        self.handle(ClientEvent::SetActiveRoom { room_id })
    }

    /// Send `content` to `room_id`.
    pub fn send(&mut self, room_id: RoomId, content: &str) -> Vec<ClientAction> {
        self.handle(ClientEvent::SendMessage { room_id, content: content.to_string() })
    }

    /// Report a focus change.
    pub fn set_focus(&mut self, focused: bool) -> Vec<ClientAction> {
        self.handle(ClientEvent::FocusChanged { focused })
    }

    /// Open the personal room with `user_id`.
    pub fn start_personal_room(&mut self, user_id: UserId) -> Vec<ClientAction> {
        self.handle(ClientEvent::StartPersonalRoom { user_id })
    }

    /// Tick at the current virtual time.
    pub fn tick(&mut self) -> Vec<ClientAction> {
        let now = self.env.now();
        self.handle(ClientEvent::Tick { now })
    }

    /// Advance the virtual clock by `by`, then tick.
    pub fn advance(&mut self, by: Duration) -> Vec<ClientAction> {
        self.env.advance(by);
        self.tick()
    }

    /// Advance the clock in `step` increments for `total`, ticking each time.
    pub fn run_for(&mut self, total: Duration, step: Duration) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let step = step.min(total - elapsed);
            actions.extend(self.advance(step));
            elapsed += step;
        }
        actions
    }

    /// Feed anything the server queued for this client.
    pub fn pump(&mut self) -> Vec<ClientAction> {
        self.run(VecDeque::new())
    }

    /// Drop the socket from the server side and let the client notice.
    pub fn drop_connection(&mut self, reason: &str) -> Vec<ClientAction> {
        if let Some(conn) = self.conn {
            lock(&self.server).drop_connection(conn, reason);
        }
        self.pump()
    }

    /// Process `event` and everything it sets off.
    pub fn handle(&mut self, event: SimEvent) -> Vec<ClientAction> {
        self.run(VecDeque::from([event]))
    }

    // REST control

    /// REST calls waiting for completion, oldest first.
    pub fn pending_rest(&self) -> &VecDeque<ClientAction> {
        &self.pending_rest
    }

    /// Take the queued REST calls without completing them.
    pub fn take_pending_rest(&mut self) -> Vec<ClientAction> {
        self.pending_rest.drain(..).collect()
    }

    /// Answer `action` from the server now and process the result.
    pub fn complete(&mut self, action: &ClientAction) -> Vec<ClientAction> {
        match self.rest_outcome(action) {
            Some(event) => self.handle(event),
            None => Vec::new(),
        }
    }

    /// Complete the oldest queued REST call.
    pub fn complete_next_rest(&mut self) -> Vec<ClientAction> {
        match self.pending_rest.pop_front() {
            Some(action) => self.complete(&action),
            None => Vec::new(),
        }
    }

    /// Complete queued REST calls, including ones they trigger, until none
    /// remain.
    pub fn complete_rest(&mut self) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        while let Some(action) = self.pending_rest.pop_front() {
            actions.extend(self.complete(&action));
        }
        actions
    }

    // Inspection

    /// The wrapped client.
    pub fn client(&self) -> &Client<SimEnv> {
        &self.client
    }

    /// Shared clock.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Socket currently held, if any.
    pub fn conn(&self) -> Option<ConnId> {
        self.conn
    }

    /// Notifications delivered so far.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Take the delivered notifications.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Errors the client returned.
    pub fn errors(&self) -> &[ClientError] {
        &self.errors
    }

    /// Message contents of `room_id` in display order.
    pub fn contents(&self, room_id: RoomId) -> Vec<String> {
        self.client.messages(room_id).map(|m| m.content.clone()).collect()
    }

    /// Room ids in list order.
    pub fn room_order(&self) -> Vec<RoomId> {
        self.client.rooms().iter().map(|r| r.room_id).collect()
    }

    /// Observable state, including the broker's view of this client.
    pub fn snapshot(&self, id: u64) -> ClientSnapshot {
        let broker_rooms =
            self.conn.map(|conn| lock(&self.server).room_subscriptions(conn)).unwrap_or_default();
        ClientSnapshot::capture(id, &self.client, broker_rooms)
    }

    fn run(&mut self, mut queue: VecDeque<SimEvent>) -> Vec<ClientAction> {
        let mut performed = Vec::new();

        loop {
            self.drain_transport(&mut queue);
            if let Some(event) = queue.pop_front() {
                match self.client.handle(event) {
                    Ok(actions) => {
                        for action in actions {
                            self.execute(&action, &mut queue);
                            performed.push(action);
                        }
                    },
                    Err(error) => {
                        debug!(%error, "client rejected event");
                        self.errors.push(error);
                    },
                }
                continue;
            }

            if self.auto_rest
                && let Some(action) = self.pending_rest.pop_front()
            {
                if let Some(event) = self.rest_outcome(&action) {
                    queue.push_back(event);
                }
                continue;
            }
            break;
        }

        if let Some(registry) = &self.invariants {
            registry.assert_all(&SystemSnapshot::single(self.snapshot(0)), "after settling");
        }
        performed
    }

    fn drain_transport(&mut self, queue: &mut VecDeque<SimEvent>) {
        if let Some(events) = self.events.as_mut() {
            while let Ok(event) = events.try_recv() {
                queue.push_back(event.into());
            }
        }
    }

    fn execute(&mut self, action: &ClientAction, queue: &mut VecDeque<SimEvent>) {
        match action {
            ClientAction::Open => {
                self.close_socket();
                let accepted = lock(&self.server).accept();
                match accepted {
                    Ok((conn, events)) => {
                        self.conn = Some(conn);
                        self.events = Some(events);
                    },
                    Err(reason) => queue.push_back(ClientEvent::TransportClosed { reason }),
                }
            },
            ClientAction::Send(frame) => {
                if let Some(conn) = self.conn {
                    lock(&self.server).receive(conn, frame);
                }
            },
            ClientAction::SendHeartbeat => {
                if let Some(conn) = self.conn {
                    lock(&self.server).heartbeat(conn);
                }
            },
            ClientAction::Close { .. } => self.close_socket(),
            ClientAction::Publish { token, frame } => {
                let delivered = !self.fail_publishes
                    && self.conn.is_some_and(|conn| lock(&self.server).receive(conn, frame));
                queue.push_back(if delivered {
                    ClientEvent::PublishCompleted { token: *token }
                } else {
                    ClientEvent::PublishFailed { token: *token, reason: "write failed".to_string() }
                });
            },
            ClientAction::FetchHistory { .. }
            | ClientAction::FetchRooms { .. }
            | ClientAction::StartPersonalRoom { .. }
            | ClientAction::FetchUser { .. } => self.pending_rest.push_back(action.clone()),
            ClientAction::Notify(notification) => self.notifications.push(notification.clone()),
        }
    }

    fn close_socket(&mut self) {
        if let Some(conn) = self.conn.take() {
            lock(&self.server).close(conn);
        }
        self.events = None;
    }

    /// Server's answer to a REST action, as the event the runtime would post.
    fn rest_outcome(&self, action: &ClientAction) -> Option<SimEvent> {
        let user = self.client.config().user_id;
        let mut server = lock(&self.server);

        let event = match action {
            ClientAction::FetchHistory { ticket } => match server.rest_history(user, ticket.room_id) {
                Ok(messages) => ClientEvent::HistoryLoaded { ticket: *ticket, messages },
                Err(error) => ClientEvent::HistoryFailed { ticket: *ticket, reason: error.to_string() },
            },
            ClientAction::FetchRooms { ticket } => match server.rest_rooms(user) {
                Ok(rooms) => ClientEvent::RoomsLoaded { ticket: *ticket, rooms },
                Err(error) => ClientEvent::RoomsFailed { ticket: *ticket, reason: error.to_string() },
            },
            ClientAction::StartPersonalRoom { user_id } => {
                match server.rest_personal_room(user, *user_id) {
                    Ok(room_id) => ClientEvent::PersonalRoomReady { room_id },
                    Err(error) => {
                        ClientEvent::PersonalRoomFailed { user_id: *user_id, reason: error.to_string() }
                    },
                }
            },
            ClientAction::FetchUser { room_id, user_id } => match server.rest_user(*user_id) {
                Ok(participant) => ClientEvent::UserLoaded { room_id: *room_id, participant },
                Err(error) => ClientEvent::UserFailed {
                    room_id: *room_id,
                    user_id: *user_id,
                    reason: error.to_string(),
                },
            },
            _ => return None,
        };
        Some(event)
    }
}
