//! Configuration for the resilient client.
//!
//! All I^R (resolvable ignorance) is parameterized here. Every field has a
//! default matching the documented behavior, so an empty TOML table yields a
//! working configuration. Validation happens once, at construction, and
//! misconfiguration is fatal.

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Dispatch pacing
    #[serde(default)]
    pub rate: RateConfig,

    /// Per-target circuit breaking
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Retry and backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// Spend budget
    #[serde(default)]
    pub budget: BudgetConfig,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    /// Maximum dispatches per second for one governed scope.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Whether the ceiling is shared globally or applied per target.
    #[serde(default)]
    pub scope: RateScope,
}

fn default_requests_per_second() -> f64 {
    10.0
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            scope: RateScope::default(),
        }
    }
}

/// Scope governed by one admission coordinator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RateScope {
    /// One shared ceiling across all targets.
    #[default]
    Global,
    /// An independent ceiling per target.
    PerTarget,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before a target's circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Milliseconds a circuit stays open before a half-open trial is allowed.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl BreakerConfig {
    /// Reset timeout as a [`Duration`].
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Retry and backoff configuration. Retries are scoped per target, never
/// across the whole chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Exponential growth factor between retries.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Backoff ceiling, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum retries per target (the first attempt is not a retry).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Status codes classified as transient.
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

/// Budget configuration. `limit_usd = None` disables budget enforcement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard spend limit in USD per bucket.
    #[serde(default)]
    pub limit_usd: Option<f64>,

    /// Accumulation window.
    #[serde(default)]
    pub bucket: BudgetBucket,
}

/// Time window over which spend is accumulated.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BudgetBucket {
    /// Rolls over at UTC midnight.
    #[default]
    Day,
    /// Rolls over on the first of the month (UTC).
    Month,
}

impl std::fmt::Display for BudgetBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetBucket::Day => write!(f, "day"),
            BudgetBucket::Month => write!(f, "month"),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all fields. Called at construction; misconfiguration is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.rate.requests_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "rate.requests_per_second must be a positive finite number, got {rate}"
            )));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }

        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_delay_ms ({}) must not be below retry.initial_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.initial_delay_ms
            )));
        }

        if let Some(limit) = self.budget.limit_usd {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "budget.limit_usd must be a positive finite number, got {limit}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.rate.requests_per_second, 10.0);
        assert_eq!(config.rate.scope, RateScope::Global);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.reset_timeout_ms, 60_000);
        assert_eq!(config.retry.initial_delay_ms, 100);
        assert_eq!(config.retry.multiplier, 2.0);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(
            config.retry.retryable_status_codes,
            vec![408, 429, 500, 502, 503, 504]
        );
        assert!(config.budget.limit_usd.is_none());
        assert_eq!(config.budget.bucket, BudgetBucket::Day);
        config.validate().unwrap();
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
            [rate]
            requests_per_second = 2.0
            scope = "per-target"

            [breaker]
            failure_threshold = 3
            reset_timeout_ms = 30000

            [retry]
            initial_delay_ms = 50
            multiplier = 3.0
            max_delay_ms = 10000
            max_retries = 2
            retryable_status_codes = [429, 503]

            [budget]
            limit_usd = 200.0
            bucket = "month"
        "#;
        let config: ClientConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.rate.scope, RateScope::PerTarget);
        assert_eq!(config.retry.retryable_status_codes, vec![429, 503]);
        assert_eq!(config.budget.limit_usd, Some(200.0));
        assert_eq!(config.budget.bucket, BudgetBucket::Month);
    }

    #[test]
    fn rejects_nonpositive_rate() {
        let mut config = ClientConfig::default();
        config.rate.requests_per_second = 0.0;
        assert!(config.validate().is_err());
        config.rate.requests_per_second = -1.0;
        assert!(config.validate().is_err());
        config.rate.requests_per_second = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_multiplier_below_one() {
        let mut config = ClientConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_failure_threshold() {
        let mut config = ClientConfig::default();
        config.breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_delay_bounds() {
        let mut config = ClientConfig::default();
        config.retry.initial_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_nonpositive_budget_limit() {
        let mut config = ClientConfig::default();
        config.budget.limit_usd = Some(0.0);
        assert!(config.validate().is_err());
    }
}
