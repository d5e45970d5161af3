//! Stop-loss / take-profit / trailing-stop tracking
//!
//! One [`StopLossTracker`] per open position. A tracker starts `Active` and
//! moves to `Triggered` on the first matching exit condition, checked in
//! this order:
//! 1. hard stop-loss (adverse move from entry)
//! 2. take-profit (favourable move from entry), if configured
//! 3. trailing stop (adverse move from the running extreme), if configured
//!
//! A triggered tracker ignores further prices.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::types::Direction;

/// Exit reason for a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            ExitReason::TrailingStop => write!(f, "TRAILING_STOP"),
        }
    }
}

/// Exit thresholds as fractions (0.05 = 5%)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopLossConfig {
    pub stop_loss_pct: f64,
    pub take_profit_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Active,
    Triggered(ExitReason),
}

/// Per-position exit state machine
#[derive(Debug, Clone)]
pub struct StopLossTracker {
    config: StopLossConfig,
    direction: Direction,
    entry_price: f64,
    high_price: f64,
    low_price: f64,
    state: TrackerState,
}

impl StopLossTracker {
    pub fn new(entry_price: f64, config: StopLossConfig, direction: Direction) -> Self {
        Self {
            config,
            direction,
            entry_price,
            high_price: entry_price,
            low_price: entry_price,
            state: TrackerState::Active,
        }
    }

    /// Tracker for a long position
    pub fn long(entry_price: f64, config: StopLossConfig) -> Self {
        Self::new(entry_price, config, Direction::Up)
    }

    /// Feed a price. Returns the exit reason on the transition to
    /// `Triggered`, and `None` otherwise (including every call afterwards).
    pub fn update(&mut self, price: f64) -> Option<ExitReason> {
        if !self.is_active() || !price.is_finite() || self.entry_price <= 0.0 {
            return None;
        }

        self.high_price = self.high_price.max(price);
        self.low_price = self.low_price.min(price);

        let reason = self.evaluate(price)?;
        self.state = TrackerState::Triggered(reason);
        Some(reason)
    }

    fn evaluate(&self, price: f64) -> Option<ExitReason> {
        // Move relative to entry, positive = in our favour
        let gain = match self.direction {
            Direction::Up => (price - self.entry_price) / self.entry_price,
            Direction::Down => (self.entry_price - price) / self.entry_price,
        };

        if -gain >= self.config.stop_loss_pct {
            return Some(ExitReason::StopLoss);
        }

        if let Some(take) = self.config.take_profit_pct {
            if gain >= take {
                return Some(ExitReason::TakeProfit);
            }
        }

        if let Some(trail) = self.config.trailing_stop_pct {
            let retrace = match self.direction {
                Direction::Up if self.high_price > 0.0 => (self.high_price - price) / self.high_price,
                Direction::Down if self.low_price > 0.0 => (price - self.low_price) / self.low_price,
                _ => 0.0,
            };
            if retrace >= trail {
                return Some(ExitReason::TrailingStop);
            }
        }

        None
    }

    pub fn is_active(&self) -> bool {
        self.state == TrackerState::Active
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn high_price(&self) -> f64 {
        self.high_price
    }

    pub fn low_price(&self) -> f64 {
        self.low_price
    }
}

/// Trackers indexed by market id
#[derive(Debug, Default)]
pub struct TrackerTable {
    trackers: HashMap<String, StopLossTracker>,
}

impl TrackerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly opened position, replacing any previous tracker
    pub fn open(&mut self, market_id: &str, tracker: StopLossTracker) {
        self.trackers.insert(market_id.to_string(), tracker);
    }

    pub fn close(&mut self, market_id: &str) -> Option<StopLossTracker> {
        self.trackers.remove(market_id)
    }

    /// Feed a price to the market's tracker, if any
    pub fn update(&mut self, market_id: &str, price: f64) -> Option<ExitReason> {
        self.trackers.get_mut(market_id)?.update(price)
    }

    pub fn get(&self, market_id: &str) -> Option<&StopLossTracker> {
        self.trackers.get(market_id)
    }

    /// Drop trackers that have already fired
    pub fn prune_triggered(&mut self) -> usize {
        let before = self.trackers.len();
        self.trackers.retain(|_, t| t.is_active());
        before - self.trackers.len()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}
