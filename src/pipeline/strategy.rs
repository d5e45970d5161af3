//! Strategy functions - the pluggable decision step of the pipeline

use crate::types::{Direction, MarketSnapshot, ProposedAction, Signal};

/// Proposes an action for a gated (snapshot, signal) pair.
/// Implementations must be pure: the pipeline owns all state.
pub trait StrategyFn: Send + Sync {
    fn decide(&self, snapshot: &MarketSnapshot, signal: &Signal) -> ProposedAction;

    /// Name recorded in decision reasons
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> StrategyFn for F
where
    F: Fn(&MarketSnapshot, &Signal) -> ProposedAction + Send + Sync,
{
    fn decide(&self, snapshot: &MarketSnapshot, signal: &Signal) -> ProposedAction {
        self(snapshot, signal)
    }
}

/// Trades in the signal's direction while its expected value clears a floor
#[derive(Debug, Clone, Copy)]
pub struct SignalFollower {
    pub min_expected_value: f64,
}

impl SignalFollower {
    pub fn new(min_expected_value: f64) -> Self {
        Self { min_expected_value }
    }
}

impl Default for SignalFollower {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl StrategyFn for SignalFollower {
    fn decide(&self, _snapshot: &MarketSnapshot, signal: &Signal) -> ProposedAction {
        if !(signal.expected_value > self.min_expected_value) {
            return ProposedAction::Hold;
        }
        match signal.direction {
            Direction::Up => ProposedAction::Buy,
            Direction::Down => ProposedAction::Sell,
        }
    }

    fn name(&self) -> &str {
        "signal_follower"
    }
}
