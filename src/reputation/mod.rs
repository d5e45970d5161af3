//! Counterparty reputation
//!
//! An external service answers whether an address may be traded with.
//! The service is never trusted to respond: [`ReputationGate`] bounds every
//! lookup with a timeout and retry budget and degrades to
//! [`ReputationVerdict::Unverified`] instead of blocking or assuming trust.

mod gate;
mod http;

pub use gate::ReputationGate;
pub use http::HttpReputationClient;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Service answer for one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressCheck {
    pub allowed: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Reputation lookup service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReputationClient: Send + Sync {
    async fn check_address(&self, address: &str) -> Result<AddressCheck>;
}

/// Outcome of a bounded reputation lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReputationVerdict {
    Allowed,
    /// Lookup failed or timed out; the trade may proceed with a warning
    Unverified { warning: String },
    Denied { reason: String },
}

impl ReputationVerdict {
    pub fn is_denied(&self) -> bool {
        matches!(self, ReputationVerdict::Denied { .. })
    }
}

impl fmt::Display for ReputationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReputationVerdict::Allowed => write!(f, "allowed"),
            ReputationVerdict::Unverified { warning } => write!(f, "unverified: {}", warning),
            ReputationVerdict::Denied { reason } => write!(f, "denied: {}", reason),
        }
    }
}
