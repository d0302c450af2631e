//! The outward-facing capability: invoking one target.
//!
//! The core makes exactly one call outward, through this trait. What a target
//! actually does (HTTP to a provider, a local model, a test script) is the
//! host's concern; the core only sees usage units and an opaque result.

use crate::models::{Target, TargetError, Usage};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Result of one successful target invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Opaque result, returned to the caller unmodified.
    pub result: Value,
    /// Usage units consumed, priced by the target's unit costs.
    pub usage: Usage,
}

impl Invocation {
    /// Construct an invocation result.
    pub fn new(result: Value, usage: Usage) -> Self {
        Self { result, usage }
    }
}

/// Per-call bounds handed to the invoker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvocationLimits {
    /// Time remaining for the whole chain walk at dispatch.
    pub remaining: Option<Duration>,
    /// Caller's cap on usage units, from the envelope's constraints.
    pub max_units: Option<u64>,
}

/// Host-supplied capability that performs the actual target call.
///
/// `limits.remaining` is the time left for the whole chain walk at dispatch;
/// an invoker that supports cancellation should bound its call by it. If it
/// cannot, the router discards any result that arrives after the deadline.
/// `limits.max_units` cannot be enforced by the core, which never looks
/// inside the payload; the invoker maps it onto the provider request (for an
/// LLM target, a max-tokens field).
#[async_trait]
pub trait TargetInvoker: Send + Sync {
    /// Invoke `target` with the envelope's payload.
    async fn invoke(
        &self,
        target: &Target,
        payload: &Value,
        limits: InvocationLimits,
    ) -> Result<Invocation, TargetError>;
}
