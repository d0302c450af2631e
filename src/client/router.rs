//! Fallback router: the orchestrator tying limiter, breaker, retry, and
//! cost tracking together.
//!
//! Epistemic foundation:
//! - K_i: The chain order is the caller's policy; the router never reorders
//! - B_i: Some target in the chain will answer (falsified → AllTargetsExhausted)
//! - I^B: Which one, and after how many retries, is unknowable up front
//!
//! For each target, in caller order: consult the breaker (an open circuit
//! skips the target with no limiter or cost side effects), pace through the
//! limiter, invoke, and on failure either retry in place (transient, retries
//! remaining) or advance the chain. The envelope deadline bounds the entire
//! walk: any suspension that would overrun it aborts with DeadlineExceeded.

use crate::client::breaker::CircuitBreaker;
use crate::client::cost::{BudgetStatus, CostTracker};
use crate::client::invoker::{Invocation, InvocationLimits, TargetInvoker};
use crate::client::limiter::{Admission, RateLimiter};
use crate::client::retry::RetryPolicy;
use crate::clock::{Clock, SystemClock};
use crate::models::{
    AttemptOutcome, AttemptRecord, Chain, ClientConfig, ExecutionResult, PronoiaError,
    RequestEnvelope, Result, Target,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Resilient request router over an ordered fallback chain.
///
/// Supports many concurrent `execute` calls; pacing is exact because all
/// dispatches for a governed scope funnel through the limiter's coordinator,
/// and breaker/ledger state is updated under per-target and per-bucket locks
/// respectively.
pub struct FallbackRouter<I: TargetInvoker> {
    invoker: Arc<I>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    costs: CostTracker,
    clock: Arc<dyn Clock>,
}

impl<I: TargetInvoker> FallbackRouter<I> {
    /// Build a router with the system clock.
    pub fn new(config: &ClientConfig, invoker: Arc<I>) -> Result<Self> {
        Self::with_clock(config, invoker, Arc::new(SystemClock))
    }

    /// Build a router with an explicit clock (deterministic in tests).
    pub fn with_clock(
        config: &ClientConfig,
        invoker: Arc<I>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            limiter: RateLimiter::new(&config.rate, Arc::clone(&clock))?,
            breaker: CircuitBreaker::new(&config.breaker, Arc::clone(&clock)),
            retry: RetryPolicy::new(&config.retry),
            costs: CostTracker::new(&config.budget, Arc::clone(&clock)),
            invoker,
            clock,
        })
    }

    /// Read-only breaker accessor (for dashboards).
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Read-only cost accessor (for dashboards).
    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    /// Read-only limiter accessor (for dashboards).
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Execute one logical request against the chain.
    ///
    /// Returns a success with attribution, or exactly one of `Validation`,
    /// `BudgetExceeded`, `DeadlineExceeded`, `AllTargetsExhausted`. Raw
    /// target errors never escape; they live in the attempt history.
    /// (`Internal` can additionally surface during runtime shutdown, when
    /// the limiter's coordinator tasks are gone.)
    pub async fn execute(
        &self,
        envelope: RequestEnvelope,
        chain: &Chain,
    ) -> Result<ExecutionResult> {
        envelope.validate()?;

        match self.costs.check_budget() {
            BudgetStatus::Exceeded => {
                let spent = self.costs.total();
                let limit = self.costs.limit_usd().unwrap_or(0.0);
                warn!(
                    spent_usd = spent,
                    limit_usd = limit,
                    "Budget exceeded, refusing execution"
                );
                return Err(PronoiaError::BudgetExceeded {
                    spent,
                    limit,
                    bucket: self.costs.bucket(),
                });
            }
            BudgetStatus::Warning => {
                warn!(
                    spent_usd = self.costs.total(),
                    limit_usd = self.costs.limit_usd().unwrap_or(0.0),
                    "Budget warning threshold crossed"
                );
            }
            BudgetStatus::Ok => {}
        }

        let request_id = Uuid::new_v4();
        let started = self.clock.now();
        let deadline_at = envelope.constraints.deadline.map(|d| started + d);
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        debug!(
            request_id = %request_id,
            chain_len = chain.len(),
            idempotency_key = envelope.idempotency_key.as_deref().unwrap_or(""),
            "Walking fallback chain"
        );

        for target in chain.targets() {
            if !self.breaker.allow(&target.id) {
                debug!(
                    request_id = %request_id,
                    target = %target.id,
                    "Circuit open, skipping target"
                );
                attempts.push(AttemptRecord {
                    target_id: target.id.clone(),
                    attempt: 0,
                    delay: Duration::ZERO,
                    outcome: AttemptOutcome::CircuitOpen,
                });
                continue;
            }

            match self
                .walk_target(request_id, &envelope, target, started, deadline_at, &mut attempts)
                .await?
            {
                Some(invocation) => {
                    let cost_usd = self.costs.record(target, &invocation.usage);
                    let total_latency = self.clock.now().saturating_duration_since(started);
                    info!(
                        request_id = %request_id,
                        target = %target.id,
                        attempts = attempts.len(),
                        latency_ms = total_latency.as_millis() as u64,
                        cost_usd = cost_usd,
                        "Request succeeded"
                    );
                    return Ok(ExecutionResult {
                        request_id,
                        target_id: target.id.clone(),
                        attempts,
                        total_latency,
                        usage: invocation.usage,
                        cost_usd,
                        result: invocation.result,
                    });
                }
                None => continue,
            }
        }

        warn!(
            request_id = %request_id,
            attempts = attempts.len(),
            "All fallback targets exhausted"
        );
        Err(PronoiaError::AllTargetsExhausted { attempts })
    }

    /// Retry loop for one target.
    ///
    /// `Ok(Some(_))` is success, `Ok(None)` means advance the chain, and the
    /// only `Err` is DeadlineExceeded, which aborts the whole walk.
    async fn walk_target(
        &self,
        request_id: Uuid,
        envelope: &RequestEnvelope,
        target: &Target,
        started: Instant,
        deadline_at: Option<Instant>,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Result<Option<Invocation>> {
        let mut attempt: u32 = 0;
        let mut delay_before = Duration::ZERO;

        loop {
            match self.limiter.schedule(&target.id, deadline_at).await {
                Admission::Granted => {}
                Admission::MissedDeadline => {
                    // Never invoked: a half-open trial slot must be handed back.
                    self.breaker.release(&target.id);
                    return Err(self.deadline_error(started));
                }
                Admission::Unavailable => {
                    self.breaker.release(&target.id);
                    return Err(PronoiaError::Internal(
                        "rate limiter coordinator unavailable".to_string(),
                    ));
                }
            }

            if self.deadline_passed(deadline_at) {
                self.breaker.release(&target.id);
                return Err(self.deadline_error(started));
            }

            let limits = InvocationLimits {
                remaining: deadline_at.map(|at| at.saturating_duration_since(self.clock.now())),
                max_units: envelope.constraints.max_units,
            };
            let outcome = self
                .invoker
                .invoke(target, &envelope.payload, limits)
                .await;

            // The call itself may have outlived the chain deadline. The
            // breaker and the ledger still see what actually happened; only
            // the result is discarded.
            let late = self.deadline_passed(deadline_at);

            match outcome {
                Ok(invocation) => {
                    self.breaker.record_outcome(&target.id, true);
                    attempts.push(AttemptRecord {
                        target_id: target.id.clone(),
                        attempt,
                        delay: delay_before,
                        outcome: AttemptOutcome::Success,
                    });
                    if late {
                        self.costs.record(target, &invocation.usage);
                        return Err(self.deadline_error(started));
                    }
                    return Ok(Some(invocation));
                }
                Err(error) => {
                    self.breaker.record_outcome(&target.id, false);
                    let retryable = self.retry.is_retryable(&error);
                    debug!(
                        request_id = %request_id,
                        target = %target.id,
                        attempt = attempt,
                        status = error.status.unwrap_or(0),
                        retryable = retryable,
                        "Target attempt failed"
                    );
                    attempts.push(AttemptRecord {
                        target_id: target.id.clone(),
                        attempt,
                        delay: delay_before,
                        outcome: if retryable {
                            AttemptOutcome::Transient(error)
                        } else {
                            AttemptOutcome::Permanent(error)
                        },
                    });

                    if late {
                        return Err(self.deadline_error(started));
                    }
                    if !retryable {
                        debug!(
                            request_id = %request_id,
                            target = %target.id,
                            "Permanent error, advancing chain"
                        );
                        return Ok(None);
                    }
                    if attempt >= self.retry.max_retries() {
                        debug!(
                            request_id = %request_id,
                            target = %target.id,
                            attempts = attempt + 1,
                            "Retries exhausted, advancing chain"
                        );
                        return Ok(None);
                    }

                    let delay = self.retry.next_delay(attempt);
                    if let Some(at) = deadline_at {
                        if self.clock.now() + delay > at {
                            // The backoff provably overruns the deadline.
                            return Err(self.deadline_error(started));
                        }
                    }
                    debug!(
                        request_id = %request_id,
                        target = %target.id,
                        backoff_ms = delay.as_millis() as u64,
                        "Backing off before retry"
                    );
                    self.clock.sleep(delay).await;
                    delay_before = delay;
                    attempt += 1;
                }
            }
        }
    }

    fn deadline_passed(&self, deadline_at: Option<Instant>) -> bool {
        deadline_at.is_some_and(|at| self.clock.now() > at)
    }

    fn deadline_error(&self, started: Instant) -> PronoiaError {
        PronoiaError::DeadlineExceeded {
            elapsed_ms: self
                .clock
                .now()
                .saturating_duration_since(started)
                .as_millis() as u64,
        }
    }
}
