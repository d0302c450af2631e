//! Retry classification and jittered exponential backoff.
//!
//! Epistemic foundation:
//! - K_i: 4xx client errors (other than 408/429) will fail identically on retry
//! - B_i: Timeouts and 5xx are transient and worth retrying
//! - I^B: Synchronized retries across callers form storms → ±10% jitter

use crate::models::{RetryConfig, TargetError};
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Classifies target errors and computes backoff delays.
///
/// Retries are scoped per target: exhaustion here means the router moves to
/// the next chain member, never that the whole chain is abandoned.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_retries: u32,
    retryable_status_codes: HashSet<u16>,
}

impl RetryPolicy {
    /// Create a policy from configuration.
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_retries: config.max_retries,
            retryable_status_codes: config.retryable_status_codes.iter().copied().collect(),
        }
    }

    /// Maximum retries per target (the first attempt is not a retry).
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether `error` is worth retrying against the same target.
    ///
    /// An explicit invoker hint wins; then transport timeouts; then the
    /// configured status set. Everything else (400, 401, 403, 404, 409, …)
    /// is terminal for that target and causes immediate fallthrough.
    pub fn is_retryable(&self, error: &TargetError) -> bool {
        if let Some(hint) = error.retryable_hint {
            return hint;
        }
        if error.timed_out {
            return true;
        }
        error
            .status
            .is_some_and(|status| self.retryable_status_codes.contains(&status))
    }

    /// Jittered delay before retry number `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Deterministic variant for tests: same computation, injected rng.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if base.is_zero() {
            return base;
        }
        let factor: f64 = rng.gen_range(0.9..=1.1);
        base.mul_f64(factor)
    }

    /// Unjittered delay: `min(initial * multiplier^attempt, max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        // powi saturates to +inf for large exponents; min() brings it back.
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}
