//! Parley wire protocol.
//!
//! The push transport speaks STOMP 1.2, one frame per WebSocket message. This
//! crate owns everything that crosses that boundary:
//!
//! - [`Frame`] and [`Command`]: the text frame codec, including heart-beat EOLs
//! - [`Headers`]: ordered, escaped header lists
//! - [`Destination`]: the topics and queues the client subscribes or sends to
//! - [`payloads`]: the JSON bodies carried by MESSAGE and SEND frames
//!
//! Nothing here holds state or performs I/O.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod destination;
pub mod errors;
pub mod frame;
pub mod header;
pub mod payloads;

pub use destination::Destination;
pub use errors::ProtocolError;
pub use frame::{Command, Frame, MAX_FRAME_SIZE};
pub use header::Headers;

/// Server-assigned chat room identifier.
pub type RoomId = u64;

/// Server-assigned message identifier. Authoritative ordering key within a
/// room.
pub type MessageId = u64;

/// Server-assigned user identifier.
pub type UserId = u64;
