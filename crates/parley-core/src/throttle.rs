//! Leading-edge throttle.

use std::{ops::Sub, time::Duration};

/// Minimum spacing between read-state refreshes.
pub const DEFAULT_READ_SYNC_INTERVAL: Duration = Duration::from_millis(800);

/// Lets at most one request through per interval.
///
/// The first request fires immediately; requests within `interval` of the
/// last one that fired are dropped.
#[derive(Debug, Clone)]
pub struct Throttle<I> {
    interval: Duration,
    last_fired: Option<I>,
}

impl<I> Throttle<I>
where
    I: Copy + Sub<Output = Duration>,
{
    /// Create a throttle with the given spacing.
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_fired: None }
    }

    /// Request a firing at `now`. Returns `true` if the caller should act.
    pub fn try_fire(&mut self, now: I) -> bool {
        let ready = self.last_fired.is_none_or(|last| now - last >= self.interval);
        if ready {
            self.last_fired = Some(now);
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn burst_collapses_to_one() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(DEFAULT_READ_SYNC_INTERVAL);

        assert!(throttle.try_fire(t0));
        for ms in [1, 100, 500, 799] {
            assert!(!throttle.try_fire(t0 + Duration::from_millis(ms)));
        }
        assert!(throttle.try_fire(t0 + Duration::from_millis(800)));
        assert!(!throttle.try_fire(t0 + Duration::from_millis(900)));
    }
}
