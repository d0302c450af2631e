//! Request data model: targets, chains, envelopes, and execution results.
//!
//! Epistemic foundation:
//! - K_i: A chain is ordered by the caller; the core never reorders it
//! - K_i: Pricing is an injected, read-only lookup, never a module singleton
//! - B_i: Any target in the chain may fail; the result attributes the one that won

use super::error::{PronoiaError, Result, TargetError};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// One callable endpoint/model with its own pricing.
///
/// Immutable once registered. Unit costs are USD per usage unit (for LLM
/// targets, per token).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Target {
    /// Stable identifier, e.g. "deepseek/deepseek-r1".
    pub id: String,

    /// USD per prompt unit.
    #[serde(default)]
    pub prompt_unit_cost: f64,

    /// USD per completion unit.
    #[serde(default)]
    pub completion_unit_cost: f64,
}

impl Target {
    /// Create a target with explicit unit costs.
    pub fn new(id: impl Into<String>, prompt_unit_cost: f64, completion_unit_cost: f64) -> Self {
        Self {
            id: id.into(),
            prompt_unit_cost,
            completion_unit_cost,
        }
    }

    /// A target with zero cost (on-prem, local).
    pub fn free(id: impl Into<String>) -> Self {
        Self::new(id, 0.0, 0.0)
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PronoiaError::Validation(
                "target id must not be empty".to_string(),
            ));
        }
        for (name, cost) in [
            ("prompt_unit_cost", self.prompt_unit_cost),
            ("completion_unit_cost", self.completion_unit_cost),
        ] {
            if !cost.is_finite() || cost < 0.0 {
                return Err(PronoiaError::Validation(format!(
                    "target '{}': {name} must be finite and non-negative, got {cost}",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Injected, read-only pricing lookup (id → [`Target`]).
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    targets: HashMap<String, Target>,
}

impl PricingTable {
    /// Build a table from a set of targets.
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Self {
        Self {
            targets: targets
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect(),
        }
    }

    /// Look up a target by id.
    pub fn get(&self, id: &str) -> Option<&Target> {
        self.targets.get(id)
    }

    /// Number of registered targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Mint a chain from an ordered list of target ids.
    ///
    /// Fails with a validation error on any unknown id.
    pub fn chain(&self, ids: &[&str]) -> Result<Chain> {
        let targets = ids
            .iter()
            .map(|id| {
                self.get(id).cloned().ok_or_else(|| {
                    PronoiaError::Validation(format!("unknown target id: '{id}'"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Chain::new(targets)
    }
}

/// Caller-ordered sequence of targets tried for one logical request.
///
/// Read-only during execution. Ordering policy (cost-ascending, provider
/// diversity, …) is the caller's responsibility.
#[derive(Debug, Clone)]
pub struct Chain {
    targets: Vec<Target>,
}

impl Chain {
    /// Create a chain. Fails on an empty list or an invalid target.
    pub fn new(targets: Vec<Target>) -> Result<Self> {
        if targets.is_empty() {
            return Err(PronoiaError::Validation(
                "chain must contain at least one target".to_string(),
            ));
        }
        for target in &targets {
            target.validate()?;
        }
        Ok(Self { targets })
    }

    /// Targets in caller-supplied order.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Number of targets in the chain.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Always false: an empty chain cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Constraints on one logical request.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    /// Upper bound on usage units (tokens/size) the caller will accept.
    /// Handed to the invoker, which maps it onto the provider request.
    pub max_units: Option<u64>,

    /// Bound on the *entire* chain walk, not per attempt.
    pub deadline: Option<Duration>,
}

/// One logical call: an opaque payload plus constraints.
///
/// Consumed once per `execute`; never retried across different chains.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    /// Opaque to the core; handed to the invoker as-is.
    pub payload: Value,

    /// Deadline and size constraints.
    pub constraints: Constraints,

    /// Optional caller-supplied idempotency key, passed through to logs.
    pub idempotency_key: Option<String>,
}

impl RequestEnvelope {
    /// Envelope with no constraints.
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            constraints: Constraints::default(),
            idempotency_key: None,
        }
    }

    /// Bound the whole chain walk by `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.constraints.deadline = Some(deadline);
        self
    }

    /// Cap usage units for the request.
    pub fn with_max_units(mut self, max_units: u64) -> Self {
        self.constraints.max_units = Some(max_units);
        self
    }

    /// Attach an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Validate the envelope before any target is touched.
    pub fn validate(&self) -> Result<()> {
        if self.payload.is_null() {
            return Err(PronoiaError::Validation(
                "envelope payload must not be null".to_string(),
            ));
        }
        if self.constraints.max_units == Some(0) {
            return Err(PronoiaError::Validation(
                "constraints.max_units must be at least 1 when set".to_string(),
            ));
        }
        if self.constraints.deadline == Some(Duration::ZERO) {
            return Err(PronoiaError::Validation(
                "constraints.deadline must be nonzero when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Usage units reported by a target invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    /// Prompt-side units consumed.
    pub prompt_units: u64,
    /// Completion-side units consumed.
    pub completion_units: u64,
}

impl Usage {
    /// Construct from prompt and completion units.
    pub fn new(prompt_units: u64, completion_units: u64) -> Self {
        Self {
            prompt_units,
            completion_units,
        }
    }
}

/// How one attempt against one target ended.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// The target returned a result.
    Success,
    /// Retryable failure; the router may retry in place.
    Transient(TargetError),
    /// Non-retryable failure; the router advanced the chain.
    Permanent(TargetError),
    /// The target was skipped without being called: circuit open.
    CircuitOpen,
}

/// Metadata for one attempt (or skip) during a chain walk.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// Target this attempt addressed.
    pub target_id: String,
    /// Attempt number against that target, starting at 0. Zero for skips.
    pub attempt: u32,
    /// Backoff applied before this attempt (zero for the first).
    pub delay: Duration,
    /// Outcome of the attempt.
    pub outcome: AttemptOutcome,
}

/// Terminal record of a successful chain walk.
///
/// Failures never produce an `ExecutionResult`; they surface as one of the
/// four fatal errors, with `AllTargetsExhausted` carrying the same attempt
/// history found here.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Correlation id generated per `execute` call.
    pub request_id: Uuid,
    /// Target that produced the result.
    pub target_id: String,
    /// Full attempt history across the chain, skips included.
    pub attempts: Vec<AttemptRecord>,
    /// Wall time from `execute` entry to success.
    pub total_latency: Duration,
    /// Usage reported by the winning invocation.
    pub usage: Usage,
    /// Cost recorded for the winning invocation, in USD.
    pub cost_usd: f64,
    /// Opaque result from the invoker.
    pub result: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chain_rejects_empty() {
        assert!(Chain::new(vec![]).is_err());
    }

    #[test]
    fn chain_rejects_negative_cost() {
        let target = Target::new("bad", -0.1, 0.0);
        assert!(Chain::new(vec![target]).is_err());
    }

    #[test]
    fn chain_rejects_blank_id() {
        assert!(Chain::new(vec![Target::free("  ")]).is_err());
    }

    #[test]
    fn pricing_table_mints_chain_in_order() {
        let table = PricingTable::new([
            Target::new("a", 1.0, 2.0),
            Target::new("b", 3.0, 4.0),
        ]);
        let chain = table.chain(&["b", "a"]).unwrap();
        let ids: Vec<_> = chain.targets().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn pricing_table_rejects_unknown_id() {
        let table = PricingTable::new([Target::free("a")]);
        assert!(table.chain(&["a", "missing"]).is_err());
    }

    #[test]
    fn envelope_rejects_null_payload() {
        let envelope = RequestEnvelope::new(Value::Null);
        assert!(envelope.validate().is_err());
    }

    #[test]
    fn envelope_rejects_degenerate_constraints() {
        let envelope = RequestEnvelope::new(json!({"q": 1})).with_max_units(0);
        assert!(envelope.validate().is_err());

        let envelope = RequestEnvelope::new(json!({"q": 1})).with_deadline(Duration::ZERO);
        assert!(envelope.validate().is_err());
    }

    #[test]
    fn envelope_builder_sets_fields() {
        let envelope = RequestEnvelope::new(json!({"q": 1}))
            .with_deadline(Duration::from_secs(5))
            .with_max_units(4096)
            .with_idempotency_key("req-42");
        envelope.validate().unwrap();
        assert_eq!(envelope.constraints.deadline, Some(Duration::from_secs(5)));
        assert_eq!(envelope.constraints.max_units, Some(4096));
        assert_eq!(envelope.idempotency_key.as_deref(), Some("req-42"));
    }
}
