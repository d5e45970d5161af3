//! Whale order detection
//!
//! Flags orders that are large in absolute terms, that would move a
//! constant-product pool too far, or that dominate trailing volume.
//! At most one alert is returned per order: the most severe, with ties
//! broken in that order.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::window::TimeWindow;
use crate::amount::Amount;
use crate::types::{Alert, AlertKind, Order, Severity};

const DAY_MS: i64 = 86_400_000;
const VOLUME_SHARE_MEDIUM: f64 = 0.10;
const VOLUME_SHARE_HIGH: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleConfig {
    /// Absolute order size that counts as a whale order
    pub volume_threshold: Amount,
    /// Price impact at which an alert is raised
    pub price_impact_threshold: f64,
    /// Price impact above which the alert is critical
    pub critical_impact_threshold: f64,
    /// Multiple of `volume_threshold` at which a whale order is critical
    pub critical_size_multiple: f64,
    /// Trailing window for order history
    pub history_window_ms: i64,
}

impl Default for WhaleConfig {
    fn default() -> Self {
        Self {
            volume_threshold: Amount::from_units(1_000_000_000_000_000_000),
            price_impact_threshold: 0.05,
            critical_impact_threshold: 0.20,
            critical_size_multiple: 10.0,
            history_window_ms: DAY_MS,
        }
    }
}

#[derive(Debug)]
struct MarketState {
    liquidity: Amount,
    /// 24h volume reported by the market feed
    reported_volume: Amount,
    history: TimeWindow<Amount>,
}

impl MarketState {
    fn new(window_ms: i64) -> Self {
        Self {
            liquidity: Amount::ZERO,
            reported_volume: Amount::ZERO,
            history: TimeWindow::new(window_ms),
        }
    }

    fn observed_volume(&self) -> Amount {
        self.history
            .iter()
            .fold(Amount::ZERO, |acc, a| acc.checked_add(*a).unwrap_or(acc))
    }
}

/// Constant-product price impact `amount / (liquidity + amount)`; 1.0 for an empty pool
pub fn price_impact(amount: Amount, liquidity: Amount) -> f64 {
    if liquidity.is_zero() {
        return 1.0;
    }
    let a = amount.as_decimal();
    let denom = liquidity.as_decimal().saturating_add(a);
    (a / denom).to_f64().unwrap_or(1.0)
}

pub struct WhaleDetector {
    config: WhaleConfig,
    markets: HashMap<String, MarketState>,
}

impl WhaleDetector {
    pub fn new(config: WhaleConfig) -> Self {
        Self {
            config,
            markets: HashMap::new(),
        }
    }

    /// Refresh liquidity and reported 24h volume for a market
    pub fn update_market(&mut self, market_id: &str, liquidity: Amount, volume_24h: Amount) {
        let window = self.config.history_window_ms;
        let state = self
            .markets
            .entry(market_id.to_string())
            .or_insert_with(|| MarketState::new(window));
        state.liquidity = liquidity;
        state.reported_volume = volume_24h;
    }

    /// Reported 24h volume when known, otherwise the volume of recorded orders
    pub fn trailing_volume(&self, market_id: &str) -> Amount {
        match self.markets.get(market_id) {
            Some(s) if !s.reported_volume.is_zero() => s.reported_volume,
            Some(s) => s.observed_volume(),
            None => Amount::ZERO,
        }
    }

    /// Analyze an order and record it into the market's history
    pub fn analyze(&mut self, order: &Order, now: i64) -> Option<Alert> {
        let alert = self.assess(order, now);

        let window = self.config.history_window_ms;
        let state = self
            .markets
            .entry(order.market_id.clone())
            .or_insert_with(|| MarketState::new(window));
        state.history.push(order.timestamp, order.amount);
        state.history.prune(now);

        alert
    }

    /// Analyze an order without recording it (used for probe orders)
    pub fn assess(&mut self, order: &Order, now: i64) -> Option<Alert> {
        if let Some(state) = self.markets.get_mut(&order.market_id) {
            state.history.prune(now);
        }
        let liquidity = self
            .markets
            .get(&order.market_id)
            .map(|s| s.liquidity)
            .unwrap_or(Amount::ZERO);
        let trailing = self.trailing_volume(&order.market_id);

        let candidates = [
            self.whale_alert(order, now),
            self.impact_alert(order, liquidity, now),
            Self::volume_share_alert(order, trailing, now),
        ];

        // Highest severity wins; on ties the earlier candidate is kept
        let mut best: Option<Alert> = None;
        for alert in candidates.into_iter().flatten() {
            match &best {
                Some(b) if b.severity >= alert.severity => {}
                _ => best = Some(alert),
            }
        }

        if let Some(alert) = &best {
            debug!(
                market = %order.market_id,
                kind = %alert.kind,
                severity = %alert.severity,
                "Whale detector alert"
            );
        }
        best
    }

    fn whale_alert(&self, order: &Order, now: i64) -> Option<Alert> {
        let threshold = self.config.volume_threshold;
        if threshold.is_zero() || order.amount < threshold {
            return None;
        }
        let multiple = order.amount.ratio_to(threshold);
        let severity = if multiple >= self.config.critical_size_multiple {
            Severity::Critical
        } else {
            Severity::High
        };
        Some(Alert {
            kind: AlertKind::WhaleOrder,
            severity,
            market_id: order.market_id.clone(),
            addresses: vec![order.trader.clone()],
            confidence: (multiple / 2.0).min(1.0),
            detail: format!("order of {} is {:.2}x the whale threshold", order.amount, multiple),
            timestamp: now,
        })
    }

    fn impact_alert(&self, order: &Order, liquidity: Amount, now: i64) -> Option<Alert> {
        let impact = price_impact(order.amount, liquidity);
        if impact < self.config.price_impact_threshold {
            return None;
        }
        let severity = if impact > self.config.critical_impact_threshold {
            Severity::Critical
        } else {
            Severity::High
        };
        Some(Alert {
            kind: AlertKind::PriceImpact,
            severity,
            market_id: order.market_id.clone(),
            addresses: vec![order.trader.clone()],
            confidence: (impact / self.config.critical_impact_threshold).min(1.0),
            detail: format!(
                "estimated price impact {:.2}% against liquidity {}",
                impact * 100.0,
                liquidity
            ),
            timestamp: now,
        })
    }

    fn volume_share_alert(order: &Order, trailing: Amount, now: i64) -> Option<Alert> {
        if trailing.is_zero() {
            return None;
        }
        let share = order.amount.ratio_to(trailing);
        let severity = if share > VOLUME_SHARE_HIGH {
            Severity::High
        } else if share > VOLUME_SHARE_MEDIUM {
            Severity::Medium
        } else {
            return None;
        };
        Some(Alert {
            kind: AlertKind::VolumeShare,
            severity,
            market_id: order.market_id.clone(),
            addresses: vec![order.trader.clone()],
            confidence: (share / VOLUME_SHARE_HIGH).min(1.0),
            detail: format!("order is {:.1}% of trailing 24h volume", share * 100.0),
            timestamp: now,
        })
    }

    pub fn config(&self) -> &WhaleConfig {
        &self.config
    }
}
