//! Error types for the core state machines.
//!
//! Connection errors are split by recovery: transient ones are retried after
//! the fixed reconnect delay, fatal ones (authentication) require the caller
//! to obtain a new credential.

use std::time::Duration;

use parley_proto::{Command, ProtocolError, RoomId};
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors raised by the connection state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not valid in the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Server sent a frame that makes no sense in the current state
    #[error("unexpected {command} frame in state {state:?}")]
    UnexpectedFrame {
        /// Current state when frame was received
        state: ConnectionState,
        /// Command of the unexpected frame
        command: Command,
    },

    /// CONNECTED not received within the connect timeout
    #[error("connect timeout after {elapsed:?}")]
    ConnectTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// No frame or heart-beat from the server within the tolerance window
    #[error("server heart-beat missed after {elapsed:?}")]
    HeartbeatTimeout {
        /// Silence observed
        elapsed: Duration,
    },

    /// Server rejected the credential
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Server sent an ERROR frame unrelated to authentication
    #[error("server error: {0}")]
    Server(String),

    /// Socket closed underneath the session
    #[error("transport closed: {0}")]
    Transport(String),

    /// Malformed frame from the server
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ConnectionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Only authentication failures and local misuse are fatal; everything
    /// the network or server can do to a live session is retried.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::AuthFailed(_) | Self::InvalidState { .. })
    }
}

/// Why a send was refused before reaching the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendRefusal {
    /// Connection is not in `Connected`
    #[error("not connected (state {0:?})")]
    NotConnected(ConnectionState),

    /// No live subscription for the target room
    #[error("room {0} is not subscribed")]
    NotSubscribed(RoomId),

    /// Content is empty after trimming
    #[error("message is empty")]
    EmptyContent,

    /// Content could not be framed (too large for one frame)
    #[error("message cannot be sent: {0}")]
    Encode(ProtocolError),
}
