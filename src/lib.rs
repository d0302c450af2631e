//! pronoia - Resilient outbound request client with budgeted fallback routing.
//!
//! ## Architecture
//!
//! A logical request carries an opaque payload and an ordered fallback chain
//! of targets. For each target the [`FallbackRouter`]:
//!
//! - consults a per-target [`CircuitBreaker`] (an open circuit skips the
//!   target entirely),
//! - paces dispatch through a [`RateLimiter`] with one serialized admission
//!   point per governed scope,
//! - invokes the host-supplied [`TargetInvoker`],
//! - retries transient failures with jittered exponential backoff
//!   ([`RetryPolicy`]), and
//! - records spend against a per-bucket budget ([`CostTracker`]).
//!
//! The caller always gets either a success with attribution (target, attempt
//! history, cost) or exactly one of four fatal errors; raw provider errors
//! that were retried or routed around never escape.
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters ([`ClientConfig`])
//! - I^B (Bounded): Network/API uncertainties (retry, backoff, breakers)

pub mod client;
pub mod clock;
pub mod models;

// Re-exports for convenience
pub use client::{
    BudgetStatus, CircuitBreaker, CircuitSnapshot, CircuitState, CostTracker, FallbackRouter,
    Invocation, InvocationLimits, RateLimiter, RetryPolicy, TargetInvoker,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use models::{
    AttemptOutcome, AttemptRecord, BudgetBucket, Chain, ClientConfig, ConfigError,
    ExecutionResult, PricingTable, PronoiaError, RequestEnvelope, Result, Target, TargetError,
    Usage,
};
