//! Per-bucket spend accounting and budget checks.
//!
//! Epistemic foundation:
//! - K_i: cost = prompt_units · prompt_unit_cost + completion_units · completion_unit_cost
//! - K_i: The bucket total always equals the sum of recorded per-request costs
//! - I^B: Spend rate is unknowable up front → warn at 80%, hard-stop at 100%
//!
//! The whole ledger lives under one mutex so the add-and-compare for the
//! warning latch is a single atomic step, which is what makes "warning fires
//! exactly once per bucket" hold under concurrency.

use crate::clock::Clock;
use crate::models::{BudgetBucket, BudgetConfig, Target, Usage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Budget check verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Spend is below the warning threshold, or no limit is configured.
    Ok,
    /// Spend first crossed 80% of the limit. Returned exactly once per bucket.
    Warning,
    /// Spend reached the limit. New executions must be refused.
    Exceeded,
}

#[derive(Debug, Default)]
struct Ledger {
    bucket_key: String,
    total_usd: f64,
    per_target_usd: HashMap<String, f64>,
    requests: u64,
    warned: bool,
}

/// Monotonic spend accumulator keyed by time bucket (day or month).
///
/// In-memory only; persistence, if any, belongs to the host.
pub struct CostTracker {
    limit_usd: Option<f64>,
    bucket: BudgetBucket,
    clock: Arc<dyn Clock>,
    ledger: Mutex<Ledger>,
}

impl CostTracker {
    /// Create a tracker from configuration.
    pub fn new(config: &BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit_usd: config.limit_usd,
            bucket: config.bucket,
            clock,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Configured hard limit, if any.
    pub fn limit_usd(&self) -> Option<f64> {
        self.limit_usd
    }

    /// Accumulation window.
    pub fn bucket(&self) -> BudgetBucket {
        self.bucket
    }

    fn bucket_key(&self) -> String {
        let now = self.clock.wall();
        match self.bucket {
            BudgetBucket::Day => now.format("%Y-%m-%d").to_string(),
            BudgetBucket::Month => now.format("%Y-%m").to_string(),
        }
    }

    /// Lock the ledger, rolling it over if the wall clock crossed a bucket
    /// boundary since the last access. Rollover resets totals and the
    /// warning latch.
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        let key = self.bucket_key();
        if ledger.bucket_key != key {
            if !ledger.bucket_key.is_empty() {
                debug!(
                    from = %ledger.bucket_key,
                    to = %key,
                    spent_usd = ledger.total_usd,
                    "Budget bucket rolled over"
                );
            }
            *ledger = Ledger {
                bucket_key: key,
                ..Ledger::default()
            };
        }
        ledger
    }

    /// Record usage against `target`'s pricing. Returns the cost in USD.
    pub fn record(&self, target: &Target, usage: &Usage) -> f64 {
        let cost = usage.prompt_units as f64 * target.prompt_unit_cost
            + usage.completion_units as f64 * target.completion_unit_cost;

        let mut ledger = self.ledger();
        ledger.total_usd += cost;
        ledger.requests += 1;
        *ledger.per_target_usd.entry(target.id.clone()).or_insert(0.0) += cost;
        debug!(
            target = %target.id,
            cost_usd = cost,
            bucket_total_usd = ledger.total_usd,
            "Recorded request cost"
        );
        cost
    }

    /// Evaluate the budget. The `Warning` verdict is latched: it is returned
    /// exactly once per bucket, the first time spend is observed at or above
    /// 80% of the limit.
    pub fn check_budget(&self) -> BudgetStatus {
        let Some(limit) = self.limit_usd else {
            return BudgetStatus::Ok;
        };

        let mut ledger = self.ledger();
        if ledger.total_usd >= limit {
            return BudgetStatus::Exceeded;
        }
        if ledger.total_usd >= 0.8 * limit && !ledger.warned {
            ledger.warned = true;
            return BudgetStatus::Warning;
        }
        BudgetStatus::Ok
    }

    /// Total spend in the current bucket, USD.
    pub fn total(&self) -> f64 {
        self.ledger().total_usd
    }

    /// Spend attributed to one target in the current bucket, USD.
    pub fn total_for(&self, target_id: &str) -> f64 {
        self.ledger()
            .per_target_usd
            .get(target_id)
            .copied()
            .unwrap_or(0.0)
    }

    /// Requests recorded in the current bucket.
    pub fn requests(&self) -> u64 {
        self.ledger().requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn tracker(limit: Option<f64>, bucket: BudgetBucket, clock: Arc<ManualClock>) -> CostTracker {
        let config = BudgetConfig {
            limit_usd: limit,
            bucket,
        };
        CostTracker::new(&config, clock)
    }

    fn clock_at(rfc3339: &str) -> Arc<ManualClock> {
        Arc::new(ManualClock::starting_at(rfc3339.parse().unwrap()))
    }

    #[test]
    fn cost_formula_uses_both_unit_prices() {
        let clock = clock_at("2026-03-01T00:00:00Z");
        let tracker = tracker(None, BudgetBucket::Day, clock);
        let target = Target::new("a", 0.000002, 0.000008);
        let cost = tracker.record(&target, &Usage::new(1000, 500));
        assert!((cost - (1000.0 * 0.000002 + 500.0 * 0.000008)).abs() < 1e-12);
        assert!((tracker.total() - cost).abs() < 1e-12);
    }

    #[test]
    fn total_equals_sum_of_recorded_costs() {
        let clock = clock_at("2026-03-01T00:00:00Z");
        let tracker = tracker(None, BudgetBucket::Day, clock);
        let a = Target::new("a", 0.001, 0.002);
        let b = Target::new("b", 0.01, 0.02);

        let mut sum = 0.0;
        for i in 1..=10u64 {
            sum += tracker.record(&a, &Usage::new(i, i));
            sum += tracker.record(&b, &Usage::new(i, 2 * i));
        }
        assert!((tracker.total() - sum).abs() < 1e-9);
        assert!(
            (tracker.total() - tracker.total_for("a") - tracker.total_for("b")).abs() < 1e-9
        );
        assert_eq!(tracker.requests(), 20);
    }

    #[test]
    fn no_limit_means_always_ok() {
        let clock = clock_at("2026-03-01T00:00:00Z");
        let tracker = tracker(None, BudgetBucket::Day, clock);
        tracker.record(&Target::new("a", 1.0, 1.0), &Usage::new(1_000_000, 0));
        assert_eq!(tracker.check_budget(), BudgetStatus::Ok);
    }

    #[test]
    fn warning_fires_exactly_once_per_bucket() {
        let clock = clock_at("2026-03-01T00:00:00Z");
        let tracker = tracker(Some(200.0), BudgetBucket::Day, clock);
        let target = Target::new("a", 1.0, 0.0);

        tracker.record(&target, &Usage::new(100, 0));
        assert_eq!(tracker.check_budget(), BudgetStatus::Ok);

        tracker.record(&target, &Usage::new(60, 0)); // $160 = 0.8 * limit
        assert_eq!(tracker.check_budget(), BudgetStatus::Warning);
        assert_eq!(tracker.check_budget(), BudgetStatus::Ok);
        assert_eq!(tracker.check_budget(), BudgetStatus::Ok);
    }

    #[test]
    fn exceeded_at_limit_and_sticky() {
        let clock = clock_at("2026-03-01T00:00:00Z");
        let tracker = tracker(Some(200.0), BudgetBucket::Day, clock);
        let target = Target::new("a", 1.0, 0.0);

        tracker.record(&target, &Usage::new(200, 0));
        assert_eq!(tracker.check_budget(), BudgetStatus::Exceeded);
        assert_eq!(tracker.check_budget(), BudgetStatus::Exceeded);
    }

    #[test]
    fn day_bucket_rolls_over_at_midnight() {
        let clock = clock_at("2026-03-01T23:59:00Z");
        let tracker = tracker(Some(100.0), BudgetBucket::Day, Arc::clone(&clock));
        let target = Target::new("a", 1.0, 0.0);

        tracker.record(&target, &Usage::new(95, 0));
        assert_eq!(tracker.check_budget(), BudgetStatus::Warning);

        clock.advance(Duration::from_secs(120)); // crosses midnight
        assert_eq!(tracker.total(), 0.0);
        assert_eq!(tracker.check_budget(), BudgetStatus::Ok);

        // The warning latch reset with the bucket.
        tracker.record(&target, &Usage::new(85, 0));
        assert_eq!(tracker.check_budget(), BudgetStatus::Warning);
    }

    #[test]
    fn month_bucket_survives_day_boundary() {
        let clock = clock_at("2026-03-15T12:00:00Z");
        let tracker = tracker(None, BudgetBucket::Month, Arc::clone(&clock));
        let target = Target::new("a", 1.0, 0.0);

        tracker.record(&target, &Usage::new(50, 0));
        clock.advance(Duration::from_secs(3 * 86_400));
        assert_eq!(tracker.total(), 50.0);

        clock.advance(Duration::from_secs(20 * 86_400)); // into April
        assert_eq!(tracker.total(), 0.0);
    }
}
