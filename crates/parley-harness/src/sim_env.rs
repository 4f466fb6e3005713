//! Virtual-time environment.
//!
//! `SimEnv` only moves when the test calls [`SimEnv::advance`], so timeouts,
//! heart-beats, retries and throttles fire at exactly the same points on
//! every run.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    ops::{Add, Sub},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use parley_core::Environment;

/// Point on the virtual clock, measured from the start of the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since the simulation started.
    pub fn elapsed(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

/// Environment with a shared, manually advanced clock.
///
/// Clones share the clock, so the test and the client see the same time.
#[derive(Debug, Clone)]
pub struct SimEnv {
    elapsed: Arc<Mutex<Duration>>,
    epoch: DateTime<Utc>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Start the clock at 2025-01-01T09:00:00Z.
    pub fn new() -> Self {
        let epoch = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).single().unwrap_or_default();
        Self::starting_at(epoch)
    }

    /// Start the clock at `epoch` wall-clock time.
    pub fn starting_at(epoch: DateTime<Utc>) -> Self {
        Self { elapsed: Arc::new(Mutex::new(Duration::ZERO)), epoch }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += by;
    }

    fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed())
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.elapsed()).map_or(self.epoch, |d| self.epoch + d)
    }
}
