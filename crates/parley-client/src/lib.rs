//! Client
//!
//! Event-driven chat client for the parley protocol. Composes the state
//! machines from [`parley_core`] into one engine and runs it on a single
//! consumer loop.
//!
//! # Architecture
//!
//! [`Client`] follows the same Sans-IO pattern as [`parley_core`]: it receives
//! [`ClientEvent`]s, runs them to completion, and returns [`ClientAction`]s
//! for the caller to execute. [`Runtime`] is that caller: it owns a
//! [`Driver`] for the push transport and a [`RestApi`] for request/response
//! calls, and feeds every outcome back into the client as another event.
//!
//! # Components
//!
//! - [`Client`]: the engine (connection, subscriptions, cache, room list)
//! - [`Runtime`] / [`RuntimeHandle`]: event loop and its command handle
//! - [`Driver`]: push transport abstraction
//! - [`RestApi`]: REST collaborator abstraction
//! - [`Observer`]: receives [`Notification`]s with read access to the client
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::WsDriver`]: STOMP over WebSocket
//! - [`http::HttpRestApi`]: REST collaborator over HTTPS

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod config;
mod driver;
mod error;
mod event;
mod observer;
mod rest;
mod runtime;
mod system_env;

#[cfg(feature = "transport")]
pub mod http;
#[cfg(feature = "transport")]
pub mod transport;

pub use client::{Client, ROOM_UPDATES_SUBSCRIPTION_ID};
pub use config::{ClientConfig, DEFAULT_TICK_INTERVAL};
pub use driver::{Driver, TransportEvent};
pub use error::{ClientError, RestError, RuntimeError, SendError};
pub use event::{ClientAction, ClientEvent, Notification, SendToken};
pub use observer::Observer;
pub use parley_core::{Credential, Environment};
pub use parley_proto::{MessageId, RoomId, UserId};
pub use rest::RestApi;
pub use runtime::{Command, Runtime, RuntimeHandle};
pub use system_env::SystemEnv;
