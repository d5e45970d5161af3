//! Wash trading detection
//!
//! Trades are indexed by unordered counterparty pair, each pair holding a
//! time-bounded window of its trades. Circular trading is only detected for
//! direct back-and-forth between two addresses; multi-hop cycles
//! (A -> B -> C -> A) are not.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::window::TimeWindow;
use crate::types::{Alert, AlertKind, Severity, Trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WashTradingConfig {
    /// Back-and-forth trades between a pair needed to flag circular trading
    pub min_count: usize,
    /// Sliding window (ms)
    pub window_ms: i64,
}

impl Default for WashTradingConfig {
    fn default() -> Self {
        Self {
            min_count: 3,
            window_ms: 3_600_000,
        }
    }
}

/// Unordered address pair, lexicographically ordered
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PairKey(String, String);

impl PairKey {
    fn new(a: &str, b: &str) -> Self {
        if a <= b {
            PairKey(a.to_string(), b.to_string())
        } else {
            PairKey(b.to_string(), a.to_string())
        }
    }
}

#[derive(Debug, Clone)]
struct PairTrade {
    market_id: String,
    /// Whether the lexicographically smaller address was the buyer
    low_bought: bool,
}

pub struct WashTradingDetector {
    config: WashTradingConfig,
    pairs: HashMap<PairKey, TimeWindow<PairTrade>>,
}

impl WashTradingDetector {
    pub fn new(config: WashTradingConfig) -> Self {
        Self {
            config,
            pairs: HashMap::new(),
        }
    }

    /// Record a settled trade and return any alerts it completes
    pub fn analyze(&mut self, trade: &Trade, now: i64) -> Vec<Alert> {
        if trade.buyer == trade.seller {
            warn!(market = %trade.market_id, address = %trade.buyer, "Self-trade detected");
            return vec![Alert {
                kind: AlertKind::SelfTrading,
                severity: Severity::Critical,
                market_id: trade.market_id.clone(),
                addresses: vec![trade.buyer.clone()],
                confidence: 1.0,
                detail: format!("{} traded with itself", trade.buyer),
                timestamp: now,
            }];
        }

        self.prune(now);

        let key = PairKey::new(&trade.buyer, &trade.seller);
        let low_bought = trade.buyer == key.0;
        let window_ms = self.config.window_ms;
        let min = self.config.min_count.max(1);
        let window = self
            .pairs
            .entry(key.clone())
            .or_insert_with(|| TimeWindow::new(window_ms));
        window.push(
            trade.timestamp,
            PairTrade {
                market_id: trade.market_id.clone(),
                low_bought,
            },
        );

        let mut alerts = Vec::new();

        let (mut in_market, mut low_buys, mut high_buys) = (0usize, 0usize, 0usize);
        for t in window.iter().filter(|t| t.market_id == trade.market_id) {
            in_market += 1;
            if t.low_bought {
                low_buys += 1;
            } else {
                high_buys += 1;
            }
        }

        if in_market >= min && low_buys > 0 && high_buys > 0 {
            let severity = if in_market >= 2 * min {
                Severity::Critical
            } else {
                Severity::High
            };
            alerts.push(Alert {
                kind: AlertKind::CircularTrading,
                severity,
                market_id: trade.market_id.clone(),
                addresses: vec![key.0.clone(), key.1.clone()],
                confidence: (in_market as f64 / (2 * min) as f64).min(1.0),
                detail: format!(
                    "{} and {} traded back and forth {} times",
                    key.0, key.1, in_market
                ),
                timestamp: now,
            });
        }

        let total = window.len();
        if total > 2 * min {
            alerts.push(Alert {
                kind: AlertKind::VolumeInflation,
                severity: Severity::Medium,
                market_id: trade.market_id.clone(),
                addresses: vec![key.0.clone(), key.1.clone()],
                confidence: (total as f64 / (4 * min) as f64).min(1.0),
                detail: format!(
                    "{} trades between {} and {} across all markets",
                    total, key.0, key.1
                ),
                timestamp: now,
            });
        }

        for alert in &alerts {
            debug!(market = %alert.market_id, kind = %alert.kind, severity = %alert.severity, "Wash trading alert");
        }
        alerts
    }

    /// Drop expired trades and empty pairs
    pub fn prune(&mut self, now: i64) {
        self.pairs.retain(|_, window| {
            window.prune(now);
            !window.is_empty()
        });
    }

    /// Trades recorded between two addresses, in any market
    pub fn pair_count(&self, a: &str, b: &str) -> usize {
        self.pairs
            .get(&PairKey::new(a, b))
            .map(|w| w.len())
            .unwrap_or(0)
    }

    pub fn tracked_pairs(&self) -> usize {
        self.pairs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;

    fn trade(market: &str, buyer: &str, seller: &str, ts: i64) -> Trade {
        Trade {
            id: format!("{}-{}-{}", buyer, seller, ts),
            market_id: market.into(),
            buyer: buyer.into(),
            seller: seller.into(),
            amount: Amount::from_units(1_000),
            price: 1.0,
            timestamp: ts,
            block: ts as u64,
        }
    }

    fn detector() -> WashTradingDetector {
        WashTradingDetector::new(WashTradingConfig {
            min_count: 3,
            window_ms: 60_000,
        })
    }

    #[test]
    fn test_self_trade_is_critical() {
        let mut d = detector();
        let alerts = d.analyze(&trade("m", "0xa", "0xa", 0), 0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SelfTrading);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].confidence, 1.0);
    }

    #[test]
    fn test_alternating_pair_is_circular() {
        let mut d = detector();
        assert!(d.analyze(&trade("m", "0xa", "0xb", 0), 0).is_empty());
        assert!(d.analyze(&trade("m", "0xb", "0xa", 10), 10).is_empty());
        let alerts = d.analyze(&trade("m", "0xa", "0xb", 20), 20);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::CircularTrading);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].addresses, vec!["0xa", "0xb"]);
        assert!((alerts[0].confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_one_directional_flow_not_circular() {
        let mut d = detector();
        for i in 0..3 {
            assert!(d.analyze(&trade("m", "0xa", "0xb", i), i).is_empty());
        }
    }

    #[test]
    fn test_trades_outside_window_forgotten() {
        let mut d = detector();
        d.analyze(&trade("m", "0xa", "0xb", 0), 0);
        d.analyze(&trade("m", "0xb", "0xa", 10), 10);
        let alerts = d.analyze(&trade("m", "0xa", "0xb", 70_000), 70_000);
        assert!(alerts.is_empty());
        assert_eq!(d.pair_count("0xb", "0xa"), 1);
    }

    #[test]
    fn test_volume_inflation_across_markets() {
        let mut d = detector();
        let markets = ["m1", "m2", "m3", "m4", "m5", "m6", "m7"];
        let mut last = Vec::new();
        for (i, m) in markets.iter().enumerate() {
            last = d.analyze(&trade(m, "0xa", "0xb", i as i64), i as i64);
        }
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].kind, AlertKind::VolumeInflation);
        assert_eq!(last[0].severity, Severity::Medium);
    }
}
