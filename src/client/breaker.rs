//! Per-target circuit breaker.
//!
//! Epistemic foundation:
//! - K_i: A target failing N times in a row will likely fail the N+1th
//! - B_i: A failing target recovers eventually → probe after a cooldown
//! - I^B: Recovery time is unknowable → one half-open trial at a time
//!
//! Lifecycle per target: CLOSED → OPEN → HALF_OPEN → {CLOSED | OPEN}. The
//! OPEN → HALF_OPEN transition is lazy: it happens when `allow` is queried
//! after the reset timeout, not on a timer.

use crate::clock::Clock;
use crate::models::BreakerConfig;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// State of one target's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Healthy, requests allowed.
    Closed,
    /// Tripped, requests rejected until the reset timeout elapses.
    Open,
    /// Cooldown expired, a single trial request is in flight or permitted.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct TargetCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    /// In HALF_OPEN, whether the single permitted trial is outstanding.
    trial_in_flight: bool,
}

impl Default for TargetCircuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            trial_in_flight: false,
        }
    }
}

/// Read-only view of one target's circuit, for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

/// Failure-tripped gate, one circuit per target.
///
/// `allow` and `record_outcome` are atomic with respect to each other for a
/// given target (read-modify-write under the map's per-shard lock); circuits
/// of different targets share no state.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    clock: Arc<dyn Clock>,
    circuits: DashMap<String, TargetCircuit>,
}

impl CircuitBreaker {
    /// Create a breaker from configuration.
    pub fn new(config: &BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout: config.reset_timeout(),
            clock,
            circuits: DashMap::new(),
        }
    }

    /// Whether a call to `target_id` is permitted right now.
    ///
    /// Returning `false` means the caller must skip to the next chain member
    /// without touching the rate limiter or the target. A `true` from a
    /// half-open circuit reserves the single trial slot; the caller must
    /// follow up with [`record_outcome`](Self::record_outcome) or
    /// [`release`](Self::release).
    pub fn allow(&self, target_id: &str) -> bool {
        let mut circuit = self.circuits.entry(target_id.to_string()).or_default();
        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = circuit.last_failure_at.is_none_or(|at| {
                    self.clock.now().saturating_duration_since(at) > self.reset_timeout
                });
                if cooled {
                    debug!(target = target_id, "Circuit half-open, permitting trial");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if circuit.trial_in_flight {
                    false
                } else {
                    circuit.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record the outcome of a permitted call.
    pub fn record_outcome(&self, target_id: &str, success: bool) {
        let mut circuit = self.circuits.entry(target_id.to_string()).or_default();
        circuit.trial_in_flight = false;

        if success {
            if circuit.state != CircuitState::Closed {
                debug!(target = target_id, "Circuit closed after successful trial");
            }
            circuit.state = CircuitState::Closed;
            circuit.consecutive_failures = 0;
            circuit.last_failure_at = None;
            return;
        }

        circuit.consecutive_failures += 1;
        circuit.last_failure_at = Some(self.clock.now());

        let tripped = circuit.state == CircuitState::HalfOpen
            || circuit.consecutive_failures >= self.failure_threshold;
        if tripped && circuit.state != CircuitState::Open {
            warn!(
                target = target_id,
                consecutive_failures = circuit.consecutive_failures,
                reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                "Circuit opened"
            );
        }
        if tripped {
            circuit.state = CircuitState::Open;
        }
    }

    /// Give back a trial slot granted by `allow` when the call was never
    /// made (e.g. the deadline expired between admission and dispatch).
    pub fn release(&self, target_id: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(target_id) {
            circuit.trial_in_flight = false;
        }
    }

    /// Read-only view of one target's circuit.
    pub fn snapshot(&self, target_id: &str) -> CircuitSnapshot {
        self.circuits
            .get(target_id)
            .map(|c| CircuitSnapshot {
                state: c.state,
                consecutive_failures: c.consecutive_failures,
            })
            .unwrap_or(CircuitSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            })
    }

    /// Snapshots for every target seen so far.
    pub fn snapshot_all(&self) -> Vec<(String, CircuitSnapshot)> {
        self.circuits
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    CircuitSnapshot {
                        state: entry.state,
                        consecutive_failures: entry.consecutive_failures,
                    },
                )
            })
            .collect()
    }
}
