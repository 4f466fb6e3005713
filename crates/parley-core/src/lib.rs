//! Parley synchronization core.
//!
//! Pure state machines for the real-time chat engine. Nothing here performs
//! I/O: every method takes the current time as input and returns what should
//! happen next, so the whole engine runs unchanged under a virtual clock.
//!
//! # Components
//!
//! - [`connection`]: STOMP session lifecycle, heart-beats, fixed-delay retry
//! - [`subscription`]: one live subscription for the active room, plus
//!   standing personal queues
//! - [`error_channel`]: server-pushed error events
//! - [`cache`]: per-room, id-ordered, deduplicated message store
//! - [`room_list`]: recency-ordered room list and its refresh schedule
//! - [`send`]: outbound send preconditions
//! - [`freshness`]: generation tickets that discard overtaken REST results

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cache;
pub mod connection;
pub mod env;
pub mod error;
pub mod error_channel;
pub mod freshness;
pub mod model;
pub mod room_list;
pub mod send;
pub mod subscription;
pub mod throttle;
pub mod time;

pub use cache::{MessageCache, PushOutcome};
pub use connection::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, Credential,
};
pub use env::Environment;
pub use error::{ConnectionError, SendRefusal};
pub use error_channel::{ErrorChannel, ErrorNotice};
pub use freshness::{Freshness, Generation, HistoryTicket, RoomsTicket};
pub use model::{ChatMessage, ChatRoom, Participant, RoomKind, Sender};
pub use room_list::{PreviewOutcome, RefreshSchedule, RoomList, RoomSnapshot};
pub use send::OutboundMessage;
pub use subscription::{LiveSubscription, StandingChannel, SubscriptionAction, SubscriptionManager};
pub use throttle::Throttle;
