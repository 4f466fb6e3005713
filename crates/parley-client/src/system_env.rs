//! Production Environment implementation using the system clocks.
//!
//! `SystemEnv` reads `std::time::Instant` for timeouts and heart-beats and
//! `chrono::Utc::now()` for room ordering. Both advance on their own, so
//! production behavior is not reproducible; use the harness environment for
//! deterministic tests.

use std::time::Instant;

use chrono::{DateTime, Utc};
use parley_core::Environment;

/// Production environment using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
