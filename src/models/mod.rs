//! Data model: configuration, errors, and the request/result types.

pub mod config;
pub mod error;
pub mod request;

pub use config::{
    BreakerConfig, BudgetBucket, BudgetConfig, ClientConfig, RateConfig, RateScope, RetryConfig,
};
pub use error::{ConfigError, PronoiaError, Result, TargetError};
pub use request::{
    AttemptOutcome, AttemptRecord, Chain, Constraints, ExecutionResult, PricingTable,
    RequestEnvelope, Target, Usage,
};
