//! Transport connection state machine.
//!
//! Owns the STOMP session lifecycle: handshake, heart-beats, timeouts, fixed
//! delay reconnect and teardown. Uses the action pattern: methods take time as
//! input and return actions for the driver to execute. The state machine never
//! touches a socket.
//!
//! # State Machine
//!
//! ```text
//!            connect                CONNECTED
//! ┌──────┐ ─────────> ┌────────────┐ ─────────> ┌───────────┐
//! │ Idle │            │ Connecting │            │ Connected │
//! └──────┘ <───┐      └────────────┘            └───────────┘
//!     ^        │        ^    │ timeout/close      │      │
//!     │        │  retry │    v                    │      │ ERROR
//!     │        │  ┌──────────────┐   socket loss  │      v
//!     │        │  │ Disconnected │ <──────────────┘  ┌─────────┐
//!     │        │  └──────────────┘                   │ Errored │
//!     │        └──── disconnect (any state) ───────  └─────────┘
//! ```
//!
//! `Errored` retries like `Disconnected` unless the error was an
//! authentication failure, which parks the machine until a new `connect`.
//!
//! # Invariants
//!
//! - `connect` while `Connecting` or `Connected` is a no-op.
//! - `disconnect` on `Idle` is a no-op.
//! - [`ConnectionAction::Disconnected`] fires at most once between two
//!   successful handshakes, no matter how many loss signals arrive.

use std::{
    fmt,
    ops::Sub,
    time::{Duration, Instant},
};

use parley_proto::{Command, Frame, header::names};
use tracing::{debug, info, warn};

use crate::error::ConnectionError;

/// Fixed delay between a lost session and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Interval at which the client offers to send heart-beats.
pub const DEFAULT_HEARTBEAT_OUTGOING: Duration = Duration::from_secs(4);

/// Interval at which the client asks the server to send heart-beats.
pub const DEFAULT_HEARTBEAT_INCOMING: Duration = Duration::from_secs(4);

/// Time allowed from opening the socket to receiving CONNECTED.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Receipt id attached to the client's DISCONNECT frame.
pub const DISCONNECT_RECEIPT: &str = "disconnect";

/// Silence tolerated on an incoming heart-beat channel, as a multiple of the
/// negotiated interval.
const HEARTBEAT_TOLERANCE: u32 = 2;

/// ERROR `message` fragments that mark a credential rejection.
const AUTH_FAILURE_MARKERS: [&str; 4] = ["401", "unauthorized", "invalid token", "expired"];

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and none wanted
    Idle,
    /// Socket opening or CONNECT sent, waiting for CONNECTED
    Connecting,
    /// Session established
    Connected,
    /// Session lost; reconnect pending
    Disconnected,
    /// Server rejected the session; reconnect pending unless fatal
    Errored,
}

/// Bearer credential presented in the CONNECT frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    /// Wrap a bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    /// Raw token.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("token", &"<redacted>").finish()
    }
}

/// Actions returned by the connection state machine.
///
/// The driver executes transport actions (`Open`, `SendFrame`,
/// `SendHeartbeat`, `Close`); the remaining variants are notifications for
/// observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new socket to the server
    Open,

    /// Encode and send this frame
    SendFrame(Frame),

    /// Send a bare EOL heart-beat
    SendHeartbeat,

    /// Close the socket
    Close {
        /// Reason for closing the connection
        reason: String,
    },

    /// State transition happened
    StateChanged {
        /// Previous state
        from: ConnectionState,
        /// New state
        to: ConnectionState,
    },

    /// The session ended. Fires once per disconnect cycle.
    Disconnected {
        /// What ended the session
        reason: String,
    },

    /// The credential was rejected; no retry will follow
    AuthFailed {
        /// Server-supplied reason
        reason: String,
    },
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Value of the CONNECT `host` header
    pub host: String,
    /// Fixed delay before reconnecting
    pub reconnect_delay: Duration,
    /// Heart-beat interval we offer to send. Zero disables.
    pub heartbeat_outgoing: Duration,
    /// Heart-beat interval we ask the server for. Zero disables.
    pub heartbeat_incoming: Duration,
    /// Handshake timeout
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "/".to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            heartbeat_outgoing: DEFAULT_HEARTBEAT_OUTGOING,
            heartbeat_incoming: DEFAULT_HEARTBEAT_INCOMING,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Connection state machine
///
/// The single owner of [`ConnectionState`]; every transition goes through
/// this type and is reported as [`ConnectionAction::StateChanged`].
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct Connection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: ConnectionState,
    config: ConnectionConfig,
    credential: Option<Credential>,
    /// Driver reported the socket open and has not reported it closed
    socket_open: bool,
    /// Cleared by `disconnect` and by fatal errors
    auto_reconnect: bool,
    /// Start of the current Connecting or Disconnected/Errored phase
    phase_started: I,
    last_received: I,
    last_sent: I,
    /// Negotiated heart-beat intervals. `None` if disabled.
    outgoing: Option<Duration>,
    incoming: Option<Duration>,
    /// One-shot guard for [`ConnectionAction::Disconnected`]
    disconnect_notified: bool,
    last_error: Option<ConnectionError>,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new connection in [`ConnectionState::Idle`]
    pub fn new(now: I, config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            config,
            credential: None,
            socket_open: false,
            auto_reconnect: false,
            phase_started: now,
            last_received: now,
            last_sent: now,
            outgoing: None,
            incoming: None,
            disconnect_notified: false,
            last_error: None,
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the session is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Error that ended the last session. `None` after a clean handshake.
    #[must_use]
    pub fn last_error(&self) -> Option<&ConnectionError> {
        self.last_error.as_ref()
    }

    /// Negotiated outgoing heart-beat interval. `None` if disabled or not
    /// connected.
    #[must_use]
    pub fn outgoing_heartbeat(&self) -> Option<Duration> {
        self.outgoing
    }

    /// Negotiated incoming heart-beat interval. `None` if disabled or not
    /// connected.
    #[must_use]
    pub fn incoming_heartbeat(&self) -> Option<Duration> {
        self.incoming
    }

    /// Start connecting with `credential`.
    ///
    /// No-op while `Connecting` or `Connected`. From any other state, stores
    /// the credential, enables automatic reconnect and asks the driver to
    /// open a socket.
    pub fn connect(&mut self, credential: Option<Credential>, now: I) -> Vec<ConnectionAction> {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            debug!(state = ?self.state, "connect ignored, already active");
            return Vec::new();
        }

        self.credential = credential;
        self.auto_reconnect = true;
        self.last_error = None;

        let mut actions = Vec::new();
        self.begin_connecting(now, &mut actions);
        actions
    }

    /// The driver finished opening the socket.
    ///
    /// Sends CONNECT if an attempt is in progress; otherwise the socket is
    /// stale (the attempt was abandoned) and is closed again.
    pub fn transport_opened(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting if !self.socket_open => {
                self.socket_open = true;
                self.last_received = now;
                self.last_sent = now;

                let heart_beat = (
                    self.config.heartbeat_outgoing.as_millis() as u64,
                    self.config.heartbeat_incoming.as_millis() as u64,
                );
                let token = self.credential.as_ref().map(Credential::token);
                let frame = Frame::connect(&self.config.host, token, heart_beat);

                vec![ConnectionAction::SendFrame(frame)]
            },
            ConnectionState::Connecting | ConnectionState::Connected => {
                warn!(state = ?self.state, "duplicate transport open ignored");
                Vec::new()
            },
            ConnectionState::Idle | ConnectionState::Disconnected | ConnectionState::Errored => {
                debug!(state = ?self.state, "closing stale transport");
                vec![ConnectionAction::Close { reason: "stale transport".to_string() }]
            },
        }
    }

    /// Process a session-level frame from the server.
    ///
    /// MESSAGE frames are accepted while connected but routed elsewhere; this
    /// only refreshes the liveness clock for them.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::UnexpectedFrame` if the command is invalid for the
    ///   current state
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.last_received = now;

        match (self.state, frame.command) {
            // Late frames from a socket we already gave up on
            (
                ConnectionState::Idle | ConnectionState::Disconnected | ConnectionState::Errored,
                command,
            ) => {
                debug!(state = ?self.state, %command, "dropping frame from inactive session");
                Ok(Vec::new())
            },

            (ConnectionState::Connecting, Command::Connected) if self.socket_open => {
                self.negotiate_heartbeat(frame.header(names::HEART_BEAT));
                self.disconnect_notified = false;
                self.last_error = None;

                let mut actions = Vec::new();
                self.transition(ConnectionState::Connected, &mut actions);
                info!(
                    outgoing = ?self.outgoing,
                    incoming = ?self.incoming,
                    "session established"
                );
                Ok(actions)
            },

            (ConnectionState::Connecting | ConnectionState::Connected, Command::Error) => {
                let message = frame.header(names::MESSAGE).unwrap_or("server error").to_string();
                let error = if is_auth_failure(&message) {
                    ConnectionError::AuthFailed(message)
                } else {
                    ConnectionError::Server(message)
                };
                Ok(self.lose(error, now, true))
            },

            (ConnectionState::Connected, Command::Message | Command::Receipt) => Ok(Vec::new()),

            (state, command) => Err(ConnectionError::UnexpectedFrame { state, command }),
        }
    }

    /// The server sent a heart-beat EOL.
    pub fn record_heartbeat(&mut self, now: I) {
        self.last_received = now;
    }

    /// The driver wrote a frame to the socket.
    pub fn mark_sent(&mut self, now: I) {
        self.last_sent = now;
    }

    /// The driver observed the socket close.
    ///
    /// Ends an active session. After an ERROR frame or an explicit
    /// disconnect the session is already over and this is a no-op.
    pub fn transport_closed(&mut self, reason: &str, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.socket_open = false;
                self.lose(ConnectionError::Transport(reason.to_string()), now, false)
            },
            ConnectionState::Idle | ConnectionState::Disconnected | ConnectionState::Errored => {
                self.socket_open = false;
                debug!(state = ?self.state, reason, "transport close after session end");
                Vec::new()
            },
        }
    }

    /// Tear down the connection and stop reconnecting.
    ///
    /// Safe to call repeatedly; only the first call in a cycle emits actions.
    pub fn disconnect(&mut self, _now: I) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Idle {
            return Vec::new();
        }

        self.auto_reconnect = false;

        let mut actions = Vec::new();
        if self.socket_open {
            if self.state == ConnectionState::Connected {
                actions.push(ConnectionAction::SendFrame(Frame::disconnect(DISCONNECT_RECEIPT)));
            }
            actions.push(ConnectionAction::Close { reason: "client disconnect".to_string() });
            self.socket_open = false;
        }

        self.outgoing = None;
        self.incoming = None;
        self.transition(ConnectionState::Idle, &mut actions);
        self.notify_disconnect("client disconnect", &mut actions);
        actions
    }

    /// Process periodic maintenance (timeouts, heart-beats, reconnects).
    ///
    /// Call this periodically; the heart-beat interval bounds how coarse the
    /// period may be.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        match self.state {
            ConnectionState::Connecting => {
                let elapsed = now - self.phase_started;
                if elapsed > self.config.connect_timeout {
                    return self.lose(ConnectionError::ConnectTimeout { elapsed }, now, true);
                }
            },
            ConnectionState::Connected => {
                if let Some(incoming) = self.incoming {
                    let silence = now - self.last_received;
                    if silence > incoming * HEARTBEAT_TOLERANCE {
                        return self.lose(
                            ConnectionError::HeartbeatTimeout { elapsed: silence },
                            now,
                            true,
                        );
                    }
                }

                if let Some(outgoing) = self.outgoing
                    && now - self.last_sent >= outgoing
                {
                    self.last_sent = now;
                    actions.push(ConnectionAction::SendHeartbeat);
                }
            },
            ConnectionState::Disconnected | ConnectionState::Errored if self.auto_reconnect => {
                if now - self.phase_started >= self.config.reconnect_delay {
                    info!(state = ?self.state, "reconnecting");
                    self.begin_connecting(now, &mut actions);
                }
            },
            ConnectionState::Idle | ConnectionState::Disconnected | ConnectionState::Errored => {},
        }

        actions
    }

    fn begin_connecting(&mut self, now: I, actions: &mut Vec<ConnectionAction>) {
        self.socket_open = false;
        self.phase_started = now;
        self.transition(ConnectionState::Connecting, actions);
        actions.push(ConnectionAction::Open);
    }

    /// End the current session because of `error`.
    fn lose(&mut self, error: ConnectionError, now: I, close_socket: bool) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        let reason = error.to_string();

        if close_socket && self.socket_open {
            actions.push(ConnectionAction::Close { reason: reason.clone() });
        }
        self.socket_open = false;
        self.outgoing = None;
        self.incoming = None;
        self.phase_started = now;

        let next = match error {
            ConnectionError::AuthFailed(_) | ConnectionError::Server(_) => ConnectionState::Errored,
            _ => ConnectionState::Disconnected,
        };
        self.transition(next, &mut actions);
        self.notify_disconnect(&reason, &mut actions);

        if error.is_transient() {
            warn!(%error, retry_in = ?self.config.reconnect_delay, "session lost");
        } else {
            tracing::error!(%error, "session rejected, not retrying");
            self.auto_reconnect = false;
            if let ConnectionError::AuthFailed(reason) = &error {
                actions.push(ConnectionAction::AuthFailed { reason: reason.clone() });
            }
        }

        self.last_error = Some(error);
        actions
    }

    fn transition(&mut self, to: ConnectionState, actions: &mut Vec<ConnectionAction>) {
        let from = self.state;
        if from == to {
            return;
        }

        debug!(?from, ?to, "connection state changed");
        self.state = to;
        actions.push(ConnectionAction::StateChanged { from, to });
    }

    fn notify_disconnect(&mut self, reason: &str, actions: &mut Vec<ConnectionAction>) {
        if self.disconnect_notified {
            debug!(reason, "disconnect already notified");
            return;
        }

        self.disconnect_notified = true;
        actions.push(ConnectionAction::Disconnected { reason: reason.to_string() });
    }

    /// Apply STOMP heart-beat negotiation against the server's offer.
    fn negotiate_heartbeat(&mut self, server: Option<&str>) {
        let (sx, sy) = server.and_then(parse_heart_beat).unwrap_or((0, 0));
        let cx = self.config.heartbeat_outgoing.as_millis() as u64;
        let cy = self.config.heartbeat_incoming.as_millis() as u64;

        self.outgoing = (cx != 0 && sy != 0).then(|| Duration::from_millis(cx.max(sy)));
        self.incoming = (cy != 0 && sx != 0).then(|| Duration::from_millis(cy.max(sx)));
    }
}

fn parse_heart_beat(value: &str) -> Option<(u64, u64)> {
    let (x, y) = value.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

fn is_auth_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    AUTH_FAILURE_MARKERS.iter().any(|marker| lower.contains(marker))
}
