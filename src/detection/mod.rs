//! Manipulation detection
//!
//! Three trade-flow detectors, each stateful over a sliding window:
//! - [`WhaleDetector`]: oversized orders, price impact, volume share
//! - [`WashTradingDetector`]: self-trades, back-and-forth pairs, pair volume inflation
//! - [`SandwichGuard`]: pending-order threats and settled sandwich signatures
//!
//! [`Detectors`] bundles them with a per-market table of recent alerts so
//! the decision pipeline can consult everything observed about a market.

pub mod sandwich;
pub mod wash_trading;
pub mod whale;
pub mod window;

pub use sandwich::{SandwichAttack, SandwichCheck, SandwichConfig, SandwichGuard};
pub use wash_trading::{WashTradingConfig, WashTradingDetector};
pub use whale::{price_impact, WhaleConfig, WhaleDetector};
pub use window::TimeWindow;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Alert, Order, Trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub whale: WhaleConfig,
    pub wash_trading: WashTradingConfig,
    pub sandwich: SandwichConfig,
    /// How long trade-flow alerts stay relevant to a market (ms)
    pub alert_retention_ms: i64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            whale: WhaleConfig::default(),
            wash_trading: WashTradingConfig::default(),
            sandwich: SandwichConfig::default(),
            alert_retention_ms: 3_600_000,
        }
    }
}

pub struct Detectors {
    pub whale: WhaleDetector,
    pub wash_trading: WashTradingDetector,
    pub sandwich: SandwichGuard,
    recent: HashMap<String, TimeWindow<Alert>>,
    retention_ms: i64,
}

impl Detectors {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            whale: WhaleDetector::new(config.whale),
            wash_trading: WashTradingDetector::new(config.wash_trading),
            sandwich: SandwichGuard::new(config.sandwich),
            recent: HashMap::new(),
            retention_ms: config.alert_retention_ms,
        }
    }

    /// Feed a settled trade to the wash-trading detector and the sandwich scan
    pub fn observe_trade(&mut self, trade: Trade, now: i64) -> Vec<Alert> {
        let mut alerts = self.wash_trading.analyze(&trade, now);
        alerts.extend(
            self.sandwich
                .record_trade(trade, now)
                .iter()
                .map(|attack| attack.to_alert(now)),
        );
        for alert in &alerts {
            self.remember(alert.clone());
        }
        alerts
    }

    /// Feed a third-party order: recorded by the whale detector and tracked as pending
    pub fn observe_order(&mut self, order: Order, now: i64) -> Option<Alert> {
        let alert = self.whale.analyze(&order, now);
        if let Some(a) = &alert {
            self.remember(a.clone());
        }
        self.sandwich.observe_pending(order);
        alert
    }

    fn remember(&mut self, alert: Alert) {
        let retention = self.retention_ms;
        self.recent
            .entry(alert.market_id.clone())
            .or_insert_with(|| TimeWindow::new(retention))
            .push(alert.timestamp, alert);
    }

    /// Alerts raised for a market within the retention window
    pub fn recent_alerts(&mut self, market_id: &str, now: i64) -> Vec<Alert> {
        match self.recent.get_mut(market_id) {
            Some(window) => {
                window.prune(now);
                window.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Markets with alerts still held for the retention window
    pub fn alert_markets(&self) -> usize {
        self.recent.len()
    }

    pub fn prune(&mut self, now: i64) {
        self.recent.retain(|_, w| {
            w.prune(now);
            !w.is_empty()
        });
        self.wash_trading.prune(now);
        self.sandwich.prune(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::types::AlertKind;

    #[test]
    fn test_trade_alerts_retained_per_market() {
        let mut d = Detectors::new(DetectionConfig {
            alert_retention_ms: 1_000,
            ..Default::default()
        });
        let trade = Trade {
            id: "t1".into(),
            market_id: "m".into(),
            buyer: "0xa".into(),
            seller: "0xa".into(),
            amount: Amount::from_units(10),
            price: 1.0,
            timestamp: 0,
            block: 0,
        };
        let alerts = d.observe_trade(trade, 0);
        assert_eq!(alerts[0].kind, AlertKind::SelfTrading);
        assert_eq!(d.recent_alerts("m", 500).len(), 1);
        assert!(d.recent_alerts("other", 500).is_empty());
        assert!(d.recent_alerts("m", 1_000).is_empty());
    }
}
