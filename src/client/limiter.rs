//! Paced dispatch through a serialized admission point.
//!
//! Epistemic foundation:
//! - K_i: Exact pacing needs one owner per governed scope; independent
//!   sleepers race and overshoot the ceiling
//! - B_i: Callers may abandon a queued wait (deadline, cancellation)
//! - I^B: When a queued request will actually dispatch is unknowable from
//!   outside the coordinator
//!
//! Each governed scope (global, or one per target) gets a coordinator task
//! fed by an unbounded mpsc channel. Admission is first-come-first-served in
//! channel order. The delay computation and the `last_dispatch` update happen
//! only inside the coordinator, so two callers can never both observe a zero
//! delay.

use crate::clock::Clock;
use crate::models::{ConfigError, RateConfig, RateScope};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

const GLOBAL_SCOPE: &str = "::global";

/// Outcome of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Dispatch permitted; the caller may invoke the target now.
    Granted,
    /// The earliest dispatch slot lies beyond the caller's deadline. No
    /// dispatch slot was consumed.
    MissedDeadline,
    /// The scope's coordinator is gone (runtime shutdown). Not a pacing
    /// verdict; callers surface this as an internal error.
    Unavailable,
}

struct Ticket {
    reply: oneshot::Sender<Admission>,
    deadline_at: Option<Instant>,
}

/// Rate limiter enforcing at most `requests_per_second` dispatches per
/// governed scope.
///
/// Cannot fail after construction; a misconfigured rate (≤ 0) is rejected
/// when the limiter is built.
pub struct RateLimiter {
    interval: Duration,
    per_target: bool,
    clock: Arc<dyn Clock>,
    lanes: DashMap<String, mpsc::UnboundedSender<Ticket>>,
    total_dispatched: Arc<AtomicU64>,
    total_refused: Arc<AtomicU64>,
    total_wait_ms: Arc<AtomicU64>,
}

impl RateLimiter {
    /// Create a rate limiter from configuration.
    pub fn new(config: &RateConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let rate = config.requests_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "rate.requests_per_second must be a positive finite number, got {rate}"
            )));
        }

        Ok(Self {
            interval: Duration::from_secs_f64(1.0 / rate),
            per_target: config.scope == RateScope::PerTarget,
            clock,
            lanes: DashMap::new(),
            total_dispatched: Arc::new(AtomicU64::new(0)),
            total_refused: Arc::new(AtomicU64::new(0)),
            total_wait_ms: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Minimum spacing between dispatches in one scope.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Suspend until dispatch to `target_id`'s scope is permitted.
    ///
    /// With a deadline, admission is refused up front when the earliest
    /// possible dispatch would already overrun it; the queue position is
    /// given up without consuming a dispatch slot. Dropping the returned
    /// future while queued likewise leaves no trace in the pacing state.
    pub async fn schedule(
        &self,
        target_id: &str,
        deadline_at: Option<Instant>,
    ) -> Admission {
        let scope = if self.per_target { target_id } else { GLOBAL_SCOPE };
        let (reply, rx) = oneshot::channel();
        let ticket = Ticket { reply, deadline_at };

        let sent = self.lane(scope).send(ticket);
        if sent.is_err() {
            // Coordinator task died (runtime shutdown). Evict the dead lane
            // so the next call re-spawns one; never dispatch unpaced.
            self.lanes.remove(scope);
            debug!(scope = scope, "Admission lane closed, refusing dispatch");
            return Admission::Unavailable;
        }

        match rx.await {
            Ok(admission) => admission,
            Err(_) => Admission::Unavailable,
        }
    }

    fn lane(&self, scope: &str) -> mpsc::UnboundedSender<Ticket> {
        self.lanes
            .entry(scope.to_string())
            .or_insert_with(|| {
                spawn_lane(
                    scope.to_string(),
                    self.interval,
                    Arc::clone(&self.clock),
                    Arc::clone(&self.total_dispatched),
                    Arc::clone(&self.total_refused),
                    Arc::clone(&self.total_wait_ms),
                )
            })
            .clone()
    }

    /// Snapshot of limiter statistics.
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_dispatched: self.total_dispatched.load(Ordering::Relaxed),
            total_refused: self.total_refused.load(Ordering::Relaxed),
            total_wait_ms: self.total_wait_ms.load(Ordering::Relaxed),
            scopes: self.lanes.len(),
        }
    }
}

/// Coordinator loop for one governed scope.
///
/// Invariant: `last_dispatch` is read and written only here, so admission is
/// a single critical section and FCFS in channel order.
fn spawn_lane(
    scope: String,
    interval: Duration,
    clock: Arc<dyn Clock>,
    dispatched: Arc<AtomicU64>,
    refused: Arc<AtomicU64>,
    wait_ms: Arc<AtomicU64>,
) -> mpsc::UnboundedSender<Ticket> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Ticket>();

    tokio::spawn(async move {
        let mut last_dispatch: Option<Instant> = None;

        while let Some(ticket) = rx.recv().await {
            // Caller abandoned the wait while queued: skip, no side effects.
            if ticket.reply.is_closed() {
                continue;
            }

            let now = clock.now();
            let earliest = last_dispatch.map_or(now, |t| t + interval);

            if let Some(deadline) = ticket.deadline_at {
                if earliest > deadline {
                    refused.fetch_add(1, Ordering::Relaxed);
                    trace!(scope = %scope, "Earliest dispatch overruns deadline, refusing");
                    let _ = ticket.reply.send(Admission::MissedDeadline);
                    continue;
                }
            }

            let wait = earliest.saturating_duration_since(now);
            if !wait.is_zero() {
                debug!(
                    scope = %scope,
                    wait_ms = wait.as_millis() as u64,
                    "Pacing dispatch"
                );
                wait_ms.fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
                clock.sleep(wait).await;
            }

            // Re-check after the wait: an abandoned ticket must not consume
            // the dispatch slot.
            if ticket.reply.is_closed() {
                continue;
            }

            last_dispatch = Some(clock.now());
            dispatched.fetch_add(1, Ordering::Relaxed);
            let _ = ticket.reply.send(Admission::Granted);
        }
    });

    tx
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_dispatched: u64,
    pub total_refused: u64,
    pub total_wait_ms: u64,
    pub scopes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(rate: f64, scope: RateScope, clock: Arc<ManualClock>) -> RateLimiter {
        let config = RateConfig {
            requests_per_second: rate,
            scope,
        };
        RateLimiter::new(&config, clock).unwrap()
    }

    #[test]
    fn rejects_nonpositive_rate() {
        let clock = Arc::new(ManualClock::new());
        let config = RateConfig {
            requests_per_second: 0.0,
            scope: RateScope::Global,
        };
        assert!(RateLimiter::new(&config, clock).is_err());
    }

    #[tokio::test]
    async fn five_requests_at_rate_two_space_out_evenly() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(2.0, RateScope::Global, Arc::clone(&clock));

        let mut dispatch_times = Vec::new();
        for _ in 0..5 {
            assert_eq!(limiter.schedule("a", None).await, Admission::Granted);
            dispatch_times.push(clock.elapsed());
        }

        let expected: Vec<Duration> = [0, 500, 1000, 1500, 2000]
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();
        assert_eq!(dispatch_times, expected);
    }

    #[tokio::test]
    async fn dispatches_never_closer_than_interval() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(5.0, RateScope::Global, Arc::clone(&clock));

        let mut previous: Option<Duration> = None;
        for _ in 0..20 {
            limiter.schedule("a", None).await;
            let at = clock.elapsed();
            if let Some(prev) = previous {
                assert!(at - prev >= limiter.interval());
            }
            previous = Some(at);
        }
        // First dispatch is immediate, the other 19 each wait one interval.
        assert_eq!(previous, Some(Duration::from_millis(3800)));
    }

    #[tokio::test]
    async fn per_target_scopes_pace_independently() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(1.0, RateScope::PerTarget, Arc::clone(&clock));

        limiter.schedule("a", None).await;
        limiter.schedule("b", None).await;
        // Different scopes: second dispatch needed no wait.
        assert_eq!(clock.elapsed(), Duration::ZERO);

        limiter.schedule("a", None).await;
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn admission_refused_when_slot_overruns_deadline() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(1.0, RateScope::Global, Arc::clone(&clock));

        assert_eq!(limiter.schedule("a", None).await, Admission::Granted);

        // Next slot is at t=1s; a 300ms deadline cannot make it.
        let deadline = clock.now() + Duration::from_millis(300);
        assert_eq!(
            limiter.schedule("a", Some(deadline)).await,
            Admission::MissedDeadline
        );
        // Refusal consumed no slot and no time.
        assert_eq!(clock.elapsed(), Duration::ZERO);

        // An undeadlined caller still gets the t=1s slot.
        assert_eq!(limiter.schedule("a", None).await, Admission::Granted);
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn abandoned_ticket_consumes_no_slot() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(1.0, RateScope::Global, Arc::clone(&clock));

        assert_eq!(limiter.schedule("a", None).await, Admission::Granted);

        // Queue a ticket, then drop the waiting future before the
        // coordinator picks it up. The zero timeout polls `schedule` exactly
        // once (enough to enqueue) and then drops it.
        let abandoned =
            tokio::time::timeout(Duration::ZERO, limiter.schedule("a", None)).await;
        assert!(abandoned.is_err());

        // The next caller gets the t=1s slot the abandoned ticket would have
        // taken, and the skip left no trace in the stats.
        assert_eq!(limiter.schedule("a", None).await, Admission::Granted);
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
        let stats = limiter.stats();
        assert_eq!(stats.total_dispatched, 2);
        assert_eq!(stats.total_refused, 0);
    }

    #[tokio::test]
    async fn dead_lane_surfaces_as_unavailable() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(1.0, RateScope::Global, Arc::clone(&clock));

        // Plant a lane whose coordinator is already gone.
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        limiter.lanes.insert(GLOBAL_SCOPE.to_string(), tx);

        assert_eq!(limiter.schedule("a", None).await, Admission::Unavailable);
        // The dead lane was evicted; the next call re-spawns a coordinator.
        assert_eq!(limiter.schedule("a", None).await, Admission::Granted);
    }

    #[tokio::test]
    async fn stats_track_dispatches_and_refusals() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(1.0, RateScope::Global, Arc::clone(&clock));

        limiter.schedule("a", None).await;
        let deadline = clock.now() + Duration::from_millis(1);
        limiter.schedule("a", Some(deadline)).await;

        let stats = limiter.stats();
        assert_eq!(stats.total_dispatched, 1);
        assert_eq!(stats.total_refused, 1);
        assert_eq!(stats.scopes, 1);
    }
}
