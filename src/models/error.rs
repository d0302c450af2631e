//! Error types for pronoia.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (bad envelope, budget spent, deadline hit)
//! - I^B materialized: Target-side failures (timeouts, 5xx) — recovered locally
//! - K_i violated: Internal invariant violations (bugs)

use super::config::BudgetBucket;
use super::request::AttemptRecord;
use thiserror::Error;

/// Top-level error type for pronoia.
///
/// Only four variants ever reach the caller of `execute` in normal operation:
/// `Validation`, `BudgetExceeded`, `DeadlineExceeded`, and
/// `AllTargetsExhausted` (`Internal` is reserved for runtime shutdown).
/// Everything a target throws is either retried or used to advance the chain,
/// and is surfaced only as attempt metadata.
#[derive(Debug, Error)]
pub enum PronoiaError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Budget exceeded: spent ${spent:.4} of ${limit:.4} this {bucket}")]
    BudgetExceeded {
        spent: f64,
        limit: f64,
        bucket: BudgetBucket,
    },

    #[error("Deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    #[error("All fallback targets exhausted ({} attempts recorded)", .attempts.len())]
    AllTargetsExhausted { attempts: Vec<AttemptRecord> },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error thrown by a [`TargetInvoker`](crate::client::TargetInvoker).
///
/// Never surfaced raw to the caller; the retry policy classifies it and the
/// router either retries in place or advances the chain.
#[derive(Debug, Clone, Error)]
#[error("target error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
pub struct TargetError {
    /// Provider status code, if the failure carried one.
    pub status: Option<u16>,
    /// Human-readable description.
    pub message: String,
    /// Whether the call failed by transport timeout.
    pub timed_out: bool,
    /// Invoker override for retry classification. Takes precedence over
    /// status-code classification when set.
    pub retryable_hint: Option<bool>,
}

impl TargetError {
    /// A failure carrying a provider status code.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            timed_out: false,
            retryable_hint: None,
        }
    }

    /// A transport timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            timed_out: true,
            retryable_hint: None,
        }
    }

    /// A failure with no status code (connection refused, TLS, …).
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            timed_out: false,
            retryable_hint: None,
        }
    }

    /// Override the retry classification.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable_hint = Some(retryable);
        self
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for pronoia.
pub type Result<T> = std::result::Result<T, PronoiaError>;
