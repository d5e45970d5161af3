//! Risk controls
//!
//! Implements:
//! - Kelly / fixed-fraction position sizing with volatility dampening
//! - Per-position stop-loss, take-profit and trailing-stop tracking
//! - Account drawdown limits with cooldown suspension
//! - Portfolio state, target allocations and concentration risk

pub mod drawdown;
pub mod portfolio;
pub mod sizing;
pub mod stop_loss;

pub use drawdown::{DrawdownConfig, DrawdownGuard, DrawdownLevel, DrawdownState, DrawdownStatus};
pub use portfolio::{
    AllocationDeviation, FillEffect, Portfolio, PortfolioBalancer, RebalanceOrder,
};
pub use sizing::{
    compute_kelly, dampen_for_volatility, fixed_fraction_size, kelly_size, volatility_scale,
    KellyQuote, PositionSizer,
};
pub use stop_loss::{ExitReason, StopLossConfig, StopLossTracker, TrackerState, TrackerTable};
