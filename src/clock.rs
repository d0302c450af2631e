//! Time abstraction for deterministic testing.
//!
//! Epistemic foundation:
//! - K_i: Every pacing and backoff decision reduces to "now()" and "wait until T"
//! - B_i: The host runs under tokio (sleep is cooperative, never blocking)
//! - I^B: Wall-clock boundaries (budget buckets) are unknowable in tests → fake clock

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of monotonic time, wall-clock time, and suspension.
///
/// All components take an `Arc<dyn Clock>` so tests can substitute
/// [`ManualClock`] and make pacing, breaker cooldowns, and budget bucket
/// rollovers fully deterministic.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Monotonic now, for pacing intervals and cooldowns.
    fn now(&self) -> Instant;

    /// Wall-clock now, for budget bucket boundaries.
    fn wall(&self) -> DateTime<Utc>;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock for tests.
///
/// Time is an offset from a fixed epoch. `sleep` advances the offset by the
/// requested duration and yields once, so a single logical timeline plays out
/// instantly. Intended for tests where at most one task sleeps at a time;
/// concurrent sleepers would each advance the shared offset.
#[derive(Debug)]
pub struct ManualClock {
    epoch: Instant,
    wall_epoch: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock anchored at the current wall time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Create a clock anchored at a specific wall time (for bucket tests).
    pub fn starting_at(wall_epoch: DateTime<Utc>) -> Self {
        Self {
            epoch: Instant::now(),
            wall_epoch,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Advance time without suspending anyone.
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += duration;
    }

    /// Total simulated time elapsed since the epoch.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.epoch + self.elapsed()
    }

    fn wall(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_epoch + elapsed
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_sleep_advances_time() {
        let clock = ManualClock::new();
        let before = clock.now();
        clock.sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.now() - before, Duration::from_millis(250));
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn manual_clock_advance_moves_wall_time() {
        let epoch = "2026-01-15T12:00:00Z".parse().unwrap();
        let clock = ManualClock::starting_at(epoch);
        clock.advance(Duration::from_secs(86_400));
        assert_eq!(clock.wall().to_rfc3339(), "2026-01-16T12:00:00+00:00");
    }
}
