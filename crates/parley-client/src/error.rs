//! Client error types.

use parley_core::{ConnectionError, SendRefusal};
use thiserror::Error;

/// Errors from [`crate::Client::handle`].
///
/// None of these corrupt client state; the runtime logs them and carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The connection state machine rejected an event
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}

/// Errors from the REST collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestError {
    /// Request did not complete (DNS, TLS, socket, timeout)
    #[error("http error: {0}")]
    Http(String),

    /// Server answered with a failure status
    #[error("api error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Server-supplied message
        message: String,
    },

    /// Response body did not match the expected shape
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors from the runtime and its handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime loop has exited
    #[error("runtime stopped")]
    Stopped,
}

/// Why a send did not reach the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// A precondition failed; nothing was published
    #[error("send refused: {0}")]
    Refused(#[from] SendRefusal),

    /// The transport failed to publish; the optimistic update was rolled back
    #[error("publish failed: {0}")]
    Transport(String),

    /// The runtime loop has exited
    #[error("runtime stopped")]
    Stopped,
}

impl From<RuntimeError> for SendError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Stopped => Self::Stopped,
        }
    }
}
