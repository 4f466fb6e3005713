//! Fuzz target for the Connection state machine
//!
//! # Strategy
//!
//! - Arbitrary interleavings of user commands, transport signals, server
//!   frames and clock advances
//! - Server frames cover handshakes with any heart-beat offer, auth and
//!   transient ERRORs, and frames that are invalid in the current state
//!
//! # Invariants
//!
//! - Every StateChanged starts from the state the machine was in
//! - At most one Disconnected notification per session episode
//! - Open is only requested together with a move to Connecting
//! - After an auth failure nothing reconnects until `connect` is called again

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_core::{Connection, ConnectionAction, ConnectionConfig, ConnectionState, Credential};
use parley_proto::{Command, Frame};

#[derive(Debug, Clone, Arbitrary)]
enum ConnectionOp {
    Connect { with_token: bool },
    Disconnect,
    TransportOpened,
    TransportClosed,
    Frame(ServerFrame),
    Heartbeat,
    Advance { millis: u16 },
}

#[derive(Debug, Clone, Arbitrary)]
enum ServerFrame {
    Connected { send_ms: u16, receive_ms: u16 },
    AuthError,
    TransientError,
    Message,
    Receipt,
    /// Client-only command arriving from the server
    Bogus,
}

impl ServerFrame {
    fn to_frame(&self) -> Frame {
        match self {
            Self::Connected { send_ms, receive_ms } => Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", format!("{send_ms},{receive_ms}")),
            Self::AuthError => Frame::new(Command::Error).with_header("message", "401 Unauthorized"),
            Self::TransientError => Frame::new(Command::Error).with_header("message", "broker restarting"),
            Self::Message => Frame::new(Command::Message).with_header("subscription", "room-7-1"),
            Self::Receipt => Frame::new(Command::Receipt).with_header("receipt-id", "bye"),
            Self::Bogus => Frame::new(Command::Subscribe),
        }
    }
}

fuzz_target!(|ops: Vec<ConnectionOp>| {
    let start = Instant::now();
    let mut now = start;
    let mut conn = Connection::new(now, ConnectionConfig::default());

    let mut state = ConnectionState::Idle;
    let mut notified = false;
    let mut auth_failed = false;

    for op in ops {
        let user_connect = matches!(op, ConnectionOp::Connect { .. });
        let actions = match op {
            ConnectionOp::Connect { with_token } => {
                let credential = with_token.then(|| Credential::bearer("token"));
                conn.connect(credential, now)
            },
            ConnectionOp::Disconnect => conn.disconnect(now),
            ConnectionOp::TransportOpened => conn.transport_opened(now),
            ConnectionOp::TransportClosed => conn.transport_closed("fuzz", now),
            ConnectionOp::Frame(frame) => conn.handle_frame(&frame.to_frame(), now).unwrap_or_default(),
            ConnectionOp::Heartbeat => {
                conn.record_heartbeat(now);
                Vec::new()
            },
            ConnectionOp::Advance { millis } => {
                now += Duration::from_millis(u64::from(millis));
                conn.tick(now)
            },
        };

        if user_connect && !actions.is_empty() {
            auth_failed = false;
        }

        let mut entered_connecting = false;
        for action in &actions {
            match action {
                ConnectionAction::StateChanged { from, to } => {
                    assert_eq!(*from, state, "transition from a state we were not in");
                    assert_ne!(from, to);
                    state = *to;
                    if *to == ConnectionState::Connected {
                        notified = false;
                    }
                    if *to == ConnectionState::Connecting {
                        entered_connecting = true;
                    }
                },
                ConnectionAction::Disconnected { .. } => {
                    assert!(!notified, "disconnect notified twice in one episode");
                    notified = true;
                },
                ConnectionAction::AuthFailed { .. } => auth_failed = true,
                ConnectionAction::Open => {
                    assert!(entered_connecting, "Open without entering Connecting");
                    assert!(!auth_failed || user_connect, "reconnect after auth failure");
                },
                ConnectionAction::SendFrame(_)
                | ConnectionAction::SendHeartbeat
                | ConnectionAction::Close { .. } => {},
            }
        }

        assert_eq!(conn.state(), state);
    }
});
