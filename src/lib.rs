//! TradeGuard Library
//!
//! Risk-gated decision pipeline for automated trading agents: position
//! sizing, stop tracking, drawdown suspension, manipulation detection and
//! a hash-linked audit ledger.

pub mod amount;
pub mod audit;
pub mod config;
pub mod detection;
pub mod error;
pub mod logging;
pub mod oracle;
pub mod pipeline;
pub mod reputation;
pub mod retry;
pub mod risk;
pub mod runner;
pub mod types;
