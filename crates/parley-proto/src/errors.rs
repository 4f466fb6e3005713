//! Protocol error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding frames and payloads.
///
/// Every malformed input maps to one of these variants; the decoder never
/// panics on untrusted bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Command line is not a known STOMP command
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// Input ended before the frame terminator
    #[error("frame truncated")]
    Truncated,

    /// Header line without a `:` separator or with invalid UTF-8
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// Header contains an escape sequence STOMP 1.2 does not define
    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),

    /// `content-length` is not a decimal integer or disagrees with the body
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    /// Frame body exceeds [`crate::MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Body size in bytes
        size: usize,
        /// Maximum permitted body size
        max: usize,
    },

    /// More than one frame where exactly one was expected
    #[error("trailing data after frame")]
    TrailingData,

    /// Frame body is not valid UTF-8
    #[error("frame body is not valid UTF-8")]
    InvalidUtf8,

    /// Required header is absent
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// Destination string does not name a known topic or queue
    #[error("invalid destination: {0:?}")]
    InvalidDestination(String),

    /// JSON body failed to (de)serialize
    #[error("invalid JSON payload: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
