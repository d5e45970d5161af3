//! Audit module - tamper-evident record of every pipeline outcome
//!
//! - `ledger`: hash-linked entries, Merkle root, trail verification
//! - `signing`: optional HMAC signatures over entry hashes
//! - `flush`: background batching to durable storage

pub mod flush;
pub mod ledger;
pub mod signing;

pub use flush::{load_trail, FlushConfig, FlushStats, JsonlFileSink, LedgerFlusher, LedgerSink};
pub use ledger::{merkle_root, AuditEntry, AuditLedger, IssueKind, TrailIssue, TrailReport, EMPTY_ROOT};
pub use signing::HmacSigner;

/// Event types written by the decision pipeline
pub mod events {
    pub const DECISION_APPROVED: &str = "decision_approved";
    pub const DECISION_REJECTED: &str = "decision_rejected";
    pub const FORCED_EXIT: &str = "forced_exit";
    pub const PIPELINE_ERROR: &str = "pipeline_error";
    pub const FILL_APPLIED: &str = "fill_applied";
}
