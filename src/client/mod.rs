//! The resilient client: pacing, circuit breaking, retry, cost tracking,
//! and the fallback router that orchestrates them.

pub mod breaker;
pub mod cost;
pub mod invoker;
pub mod limiter;
pub mod retry;
pub mod router;

pub use breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use cost::{BudgetStatus, CostTracker};
pub use invoker::{Invocation, InvocationLimits, TargetInvoker};
pub use limiter::{Admission, RateLimiter, RateLimiterStats};
pub use retry::RetryPolicy;
pub use router::FallbackRouter;
