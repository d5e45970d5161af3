//! Oracle module - price source health and consensus
//!
//! A monitor may be owned by one pipeline or shared between several agent
//! instances through [`SharedOracleMonitor`]; updates are read-modify-write,
//! so every access goes through the mutex.

mod monitor;

pub use monitor::{ConsensusPrice, OracleConfig, OracleHealth, OracleMonitor, SourceStatus};

use std::sync::{Arc, Mutex};

/// Oracle monitor handle shared across pipelines
pub type SharedOracleMonitor = Arc<Mutex<OracleMonitor>>;

/// Wrap a monitor for sharing
pub fn shared(monitor: OracleMonitor) -> SharedOracleMonitor {
    Arc::new(Mutex::new(monitor))
}
