//! Environment abstraction for deterministic testing.
//!
//! Decouples the state machines from system clocks. Production code reads the
//! OS clocks; the simulation harness supplies a virtual clock it advances by
//! hand.

use std::{fmt::Debug, ops::Sub, time::Duration};

use chrono::{DateTime, Utc};

/// Abstract environment providing monotonic and wall-clock time.
///
/// # Invariants
///
/// - `now()` never goes backwards
/// - `wall_clock()` advances in step with `now()` in simulation
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type.
    ///
    /// Production uses `std::time::Instant`; simulation uses a virtual instant
    /// that only moves when the test advances it.
    type Instant: Copy + Ord + Debug + Send + Sync + Sub<Output = Duration> + 'static;

    /// Current monotonic time. Drives timeouts, heart-beats, throttles.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time. Drives room ordering and time labels.
    fn wall_clock(&self) -> DateTime<Utc>;
}
