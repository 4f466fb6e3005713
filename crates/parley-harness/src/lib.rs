//! Deterministic simulation harness for parley chat engine testing.
//!
//! A virtual clock ([`SimEnv`]) and an in-memory broker and REST backend
//! ([`SimServer`]) stand in for the real world, so every timeout, reconnect
//! and race between pushes and fetches replays identically.
//!
//! Two ways to drive a client:
//!
//! - [`SimClient`]: synchronous pump around the Sans-IO client. Tests control
//!   exactly when time passes and in which order REST calls complete.
//! - [`SimDriver`] and [`SimRest`]: plug the simulated server into the real
//!   [`parley_client::Runtime`] to exercise the async orchestration.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. [`SimClient`] checks [`InvariantRegistry::standard()`]
//! every time the system settles.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_client;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_rest;
pub mod sim_server;

pub use invariants::{
    ActiveSubscriptionMatches, ClientSnapshot, Invariant, InvariantRegistry, InvariantResult,
    MessagesOrdered, RoomListOrdered, SingleRoomSubscription, SystemSnapshot, Violation,
};
pub use sim_client::{SimClient, SimEvent};
pub use sim_driver::{SimDriver, SimDriverError};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_rest::SimRest;
pub use sim_server::{ConnId, SharedSimServer, SimServer, create_shared_server, lock};
