//! Error types
//!
//! Only genuine failures live here. Gate rejections are ordinary values
//! (`types::Rejection`) and ledger integrity problems are reported through
//! `audit::TrailReport`.

use thiserror::Error;

/// Fixed-point arithmetic failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AmountError {
    #[error("amount overflow")]
    Overflow,
    #[error("amount would be negative: {0}")]
    Negative(String),
    #[error("non-finite value cannot become an amount")]
    NotFinite,
    #[error("cannot parse amount from {0:?}")]
    Parse(String),
}

/// Invalid inputs to position sizing. Callers must not map these to a zero size.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SizingError {
    #[error("win probability must lie in (0, 1), got {0}")]
    WinProbability(f64),
    #[error("payoff ratio must be positive, got {0}")]
    PayoffRatio(f64),
    #[error("{name} must lie in [0, 1], got {value}")]
    Fraction { name: &'static str, value: f64 },
    #[error("volatility must be positive and finite, got {0}")]
    Volatility(f64),
    #[error(transparent)]
    Amount(#[from] AmountError),
}

/// Portfolio balancer construction failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BalancerError {
    #[error("target allocations must sum to 1.0 (got {0:.6})")]
    AllocationSum(f64),
    #[error("target allocation for {market} is out of range: {value}")]
    AllocationRange { market: String, value: f64 },
}

/// Audit ledger failures on the write path
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("entry timestamp {timestamp} precedes last recorded timestamp {last}")]
    OutOfOrder { timestamp: i64, last: i64 },
    #[error("failed to serialize entry: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("ledger i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures surfaced by the decision pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("position sizing: {0}")]
    Sizing(#[from] SizingError),
    #[error("amount arithmetic: {0}")]
    Amount(#[from] AmountError),
    #[error("audit ledger: {0}")]
    Ledger(#[from] LedgerError),
}
