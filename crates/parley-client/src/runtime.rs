//! Single-consumer runtime for the client.
//!
//! The Runtime drives the client event loop, coordinating between:
//! - [`Client`]: the Sans-IO engine
//! - [`Driver`]: the push transport
//! - [`RestApi`]: request/response calls, run as spawned tasks
//! - [`Observer`]: the UI layer
//!
//! Four sources feed one loop: user commands, transport events, REST
//! completions and a periodic tick. Each event, and every follow-up event its
//! actions produce, is handled to completion before the next one is taken.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    time::Duration,
};

use parley_core::{Credential, Environment};
use parley_proto::{RoomId, UserId};
use tokio::{
    sync::{mpsc, oneshot},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    client::Client,
    config::ClientConfig,
    driver::Driver,
    error::{RuntimeError, SendError},
    event::{ClientAction, ClientEvent, SendToken},
    observer::Observer,
    rest::RestApi,
};

/// Reply slot for a send.
type SendReply = oneshot::Sender<Result<(), SendError>>;

/// Commands accepted by the runtime.
#[derive(Debug)]
pub enum Command {
    /// Start a session
    Connect {
        /// Bearer credential
        credential: Option<Credential>,
    },
    /// End the session and stop reconnecting
    Disconnect,
    /// Open a room, or close the current one
    SetActiveRoom {
        /// Room to show
        room_id: Option<RoomId>,
    },
    /// Send a message
    Send {
        /// Target room
        room_id: RoomId,
        /// Text as typed
        content: String,
        /// Receives the publish outcome
        reply: SendReply,
    },
    /// The chat view gained or lost focus
    FocusChanged {
        /// New focus state
        focused: bool,
    },
    /// Open the personal room with `user_id`
    StartPersonalRoom {
        /// Other party
        user_id: UserId,
    },
    /// Disconnect and exit the loop
    Shutdown,
}

/// Cloneable handle for submitting commands to a running [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl RuntimeHandle {
    /// Start a session.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime has exited
    pub fn connect(&self, credential: Option<Credential>) -> Result<(), RuntimeError> {
        self.submit(Command::Connect { credential })
    }

    /// End the session.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime has exited
    pub fn disconnect(&self) -> Result<(), RuntimeError> {
        self.submit(Command::Disconnect)
    }

    /// Open `room_id`, or close the current room with `None`.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime has exited
    pub fn set_active_room(&self, room_id: Option<RoomId>) -> Result<(), RuntimeError> {
        self.submit(Command::SetActiveRoom { room_id })
    }

    /// Report a focus change.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime has exited
    pub fn focus_changed(&self, focused: bool) -> Result<(), RuntimeError> {
        self.submit(Command::FocusChanged { focused })
    }

    /// Open the personal room with `user_id`.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime has exited
    pub fn start_personal_room(&self, user_id: UserId) -> Result<(), RuntimeError> {
        self.submit(Command::StartPersonalRoom { user_id })
    }

    /// Disconnect and stop the runtime.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime has already exited
    pub fn shutdown(&self) -> Result<(), RuntimeError> {
        self.submit(Command::Shutdown)
    }

    /// Send `content` to `room_id` and wait until the transport wrote it.
    ///
    /// # Errors
    ///
    /// - `SendError::Refused` if a precondition failed; nothing was sent
    /// - `SendError::Transport` if the write failed; the optimistic room list
    ///   update has been rolled back
    /// - `SendError::Stopped` if the runtime exited
    pub async fn send(&self, room_id: RoomId, content: impl Into<String>) -> Result<(), SendError> {
        let (reply, outcome) = oneshot::channel();
        self.submit(Command::Send { room_id, content: content.into(), reply })?;
        outcome.await.map_err(|_| SendError::Stopped)?
    }

    fn submit(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands.send(command).map_err(|_| RuntimeError::Stopped)
    }
}

/// Event loop that owns a [`Client`] and executes its actions.
///
/// # Type Parameters
///
/// - `E`: time source
/// - `D`: push transport driver
/// - `R`: REST collaborator
/// - `O`: notification observer
pub struct Runtime<E, D, R, O>
where
    E: Environment,
    D: Driver,
    R: RestApi,
    O: Observer<E>,
{
    client: Client<E>,
    driver: D,
    rest: R,
    observer: O,
    tick_interval: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    completions_tx: mpsc::UnboundedSender<ClientEvent<E::Instant>>,
    completions: mpsc::UnboundedReceiver<ClientEvent<E::Instant>>,
    replies: HashMap<SendToken, SendReply>,
}

impl<E, D, R, O> Runtime<E, D, R, O>
where
    E: Environment,
    D: Driver,
    R: RestApi,
    O: Observer<E>,
{
    /// Create a runtime and the handle that commands it.
    pub fn new(env: E, config: ClientConfig, driver: D, rest: R, observer: O) -> (Self, RuntimeHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let tick_interval = config.tick_interval;

        let runtime = Self {
            client: Client::new(env, config),
            driver,
            rest,
            observer,
            tick_interval,
            commands,
            completions_tx,
            completions,
            replies: HashMap::new(),
        };
        (runtime, RuntimeHandle { commands: commands_tx })
    }

    /// The engine, for inspection.
    pub fn client(&self) -> &Client<E> {
        &self.client
    }

    /// Run the event loop until shutdown.
    ///
    /// Exits on [`Command::Shutdown`], when every handle is dropped, or when
    /// the driver reports it can produce no more events. The session is torn
    /// down exactly once on the way out.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("runtime started");
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => {
                        self.handle_command(command).await;
                        continue;
                    },
                },
                transport = self.driver.recv() => match transport {
                    Some(event) => ClientEvent::from(event),
                    None => {
                        warn!("driver exhausted, stopping runtime");
                        break;
                    },
                },
                Some(event) = self.completions.recv() => event,
                _ = ticker.tick() => ClientEvent::Tick { now: self.client.env().now() },
            };
            self.dispatch(event).await;
        }

        self.dispatch(ClientEvent::Disconnect).await;
        for (token, reply) in self.replies.drain() {
            debug!(?token, "runtime stopping with publish in flight");
            let _ = reply.send(Err(SendError::Stopped));
        }
        info!("runtime stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let event = match command {
            Command::Connect { credential } => ClientEvent::Connect { credential },
            Command::Disconnect => ClientEvent::Disconnect,
            Command::SetActiveRoom { room_id } => ClientEvent::SetActiveRoom { room_id },
            Command::FocusChanged { focused } => ClientEvent::FocusChanged { focused },
            Command::StartPersonalRoom { user_id } => ClientEvent::StartPersonalRoom { user_id },
            Command::Send { room_id, content, reply } => {
                return self.handle_send(room_id, content, reply).await;
            },
            Command::Shutdown => return,
        };
        self.dispatch(event).await;
    }

    async fn handle_send(&mut self, room_id: RoomId, content: String, reply: SendReply) {
        if let Err(refusal) = self.client.check_send(room_id, &content) {
            debug!(room_id, %refusal, "send refused");
            let _ = reply.send(Err(SendError::Refused(refusal)));
            return;
        }

        let actions = match self.client.handle(ClientEvent::SendMessage { room_id, content }) {
            Ok(actions) => actions,
            Err(error) => {
                warn!(%error, "send rejected");
                let _ = reply.send(Err(SendError::Transport(error.to_string())));
                return;
            },
        };

        let token = actions.iter().find_map(|action| match action {
            ClientAction::Publish { token, .. } => Some(*token),
            _ => None,
        });
        match token {
            Some(token) => {
                self.replies.insert(token, reply);
            },
            None => {
                let _ = reply.send(Err(SendError::Transport("nothing published".to_string())));
            },
        }

        self.perform(actions).await;
    }

    async fn dispatch(&mut self, event: ClientEvent<E::Instant>) {
        match self.client.handle(event) {
            Ok(actions) => self.perform(actions).await,
            Err(error) => warn!(%error, "event rejected"),
        }
    }

    /// Execute actions, feeding follow-up events back until none remain.
    async fn perform(&mut self, actions: Vec<ClientAction>) {
        let mut followups = VecDeque::new();
        let mut batch = actions;

        loop {
            for action in batch {
                self.execute(action, &mut followups).await;
            }

            let Some(event) = followups.pop_front() else {
                break;
            };
            batch = match self.client.handle(event) {
                Ok(actions) => actions,
                Err(error) => {
                    warn!(%error, "follow-up event rejected");
                    Vec::new()
                },
            };
        }
    }

    async fn execute(
        &mut self,
        action: ClientAction,
        followups: &mut VecDeque<ClientEvent<E::Instant>>,
    ) {
        match action {
            ClientAction::Open => self.driver.open(),
            ClientAction::Send(frame) => {
                if let Err(error) = self.driver.send_frame(&frame).await {
                    warn!(%error, command = %frame.command, "frame write failed");
                }
            },
            ClientAction::SendHeartbeat => {
                if let Err(error) = self.driver.send_heartbeat().await {
                    warn!(%error, "heart-beat write failed");
                }
            },
            ClientAction::Close { reason } => self.driver.close(&reason),
            ClientAction::Publish { token, frame } => {
                let outcome = self.driver.send_frame(&frame).await.map_err(|e| e.to_string());
                if let Some(reply) = self.replies.remove(&token) {
                    let _ = reply.send(outcome.clone().map_err(SendError::Transport));
                }
                followups.push_back(match outcome {
                    Ok(()) => ClientEvent::PublishCompleted { token },
                    Err(reason) => ClientEvent::PublishFailed { token, reason },
                });
            },
            ClientAction::FetchHistory { ticket } => {
                self.spawn_rest(move |rest| async move {
                    match rest.fetch_history(ticket.room_id).await {
                        Ok(messages) => ClientEvent::HistoryLoaded { ticket, messages },
                        Err(error) => {
                            ClientEvent::HistoryFailed { ticket, reason: error.to_string() }
                        },
                    }
                });
            },
            ClientAction::FetchRooms { ticket } => {
                self.spawn_rest(move |rest| async move {
                    match rest.fetch_rooms().await {
                        Ok(rooms) => ClientEvent::RoomsLoaded { ticket, rooms },
                        Err(error) => ClientEvent::RoomsFailed { ticket, reason: error.to_string() },
                    }
                });
            },
            ClientAction::StartPersonalRoom { user_id } => {
                self.spawn_rest(move |rest| async move {
                    match rest.start_personal_room(user_id).await {
                        Ok(room_id) => ClientEvent::PersonalRoomReady { room_id },
                        Err(error) => {
                            ClientEvent::PersonalRoomFailed { user_id, reason: error.to_string() }
                        },
                    }
                });
            },
            ClientAction::FetchUser { room_id, user_id } => {
                self.spawn_rest(move |rest| async move {
                    match rest.fetch_user(user_id).await {
                        Ok(participant) => ClientEvent::UserLoaded { room_id, participant },
                        Err(error) => {
                            ClientEvent::UserFailed { room_id, user_id, reason: error.to_string() }
                        },
                    }
                });
            },
            ClientAction::Notify(notification) => {
                self.observer.notify(&self.client, &notification);
            },
        }
    }

    /// Run a REST call on its own task and post the result back to the loop.
    fn spawn_rest<F, Fut>(&self, request: F)
    where
        F: FnOnce(R) -> Fut + Send + 'static,
        Fut: Future<Output = ClientEvent<E::Instant>> + Send + 'static,
    {
        let rest = self.rest.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let event = request(rest).await;
            if completions.send(event).is_err() {
                debug!("runtime gone, dropping REST result");
            }
        });
    }
}
