//! Sandwich attack protection
//!
//! Two views of the same threat:
//! - a pre-trade check against pending (unconfirmed) orders in the market
//! - a post-trade block-window scan of settled trades, looking for a
//!   counterparty that sold to the victim both just before and just after
//!   the victim's trade

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::window::TimeWindow;
use crate::amount::Amount;
use crate::types::{Alert, AlertKind, Order, Severity, Trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandwichConfig {
    /// Pending orders older than this are dropped (ms)
    pub pending_ttl_ms: i64,
    /// Blocks either side of a victim trade searched for front/back runs
    pub block_window: u64,
    /// Another trader's pending order at least this multiple of ours is a threat
    pub threat_size_multiple: f64,
    /// Slippage multiplier recommended when threatened
    pub slippage_multiplier: f64,
    /// Bucket width for coordinated-order detection (ms)
    pub coordination_bucket_ms: i64,
    /// Orders per bucket that may indicate coordination
    pub coordination_min_orders: usize,
    /// Maximum coefficient of variation of sizes within a coordinated bucket
    pub coordination_max_cv: f64,
    /// How long settled trades are kept for the block-window scan (ms)
    pub trade_history_ms: i64,
}

impl Default for SandwichConfig {
    fn default() -> Self {
        Self {
            pending_ttl_ms: 30_000,
            block_window: 2,
            threat_size_multiple: 2.0,
            slippage_multiplier: 2.0,
            coordination_bucket_ms: 1_000,
            coordination_min_orders: 3,
            coordination_max_cv: 0.10,
            trade_history_ms: 600_000,
        }
    }
}

/// Result of the pre-trade check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandwichCheck {
    pub safe: bool,
    /// Slippage tolerance to use for this order
    pub recommended_slippage: f64,
    /// Pending orders that threaten the caller's order
    pub threats: Vec<String>,
    /// Near-equal orders bunched in one bucket
    pub coordinated: bool,
    pub alerts: Vec<Alert>,
}

/// Sandwich signature found in settled trades
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandwichAttack {
    pub market_id: String,
    pub victim: String,
    pub attacker: String,
    pub victim_trade_id: String,
    pub front_run_trade_id: String,
    pub back_run_trade_id: String,
    /// Victim amount x relative price move from the front run
    pub estimated_loss: Amount,
}

impl SandwichAttack {
    pub fn to_alert(&self, now: i64) -> Alert {
        Alert {
            kind: AlertKind::SandwichRisk,
            severity: Severity::High,
            market_id: self.market_id.clone(),
            addresses: vec![self.attacker.clone(), self.victim.clone()],
            confidence: 0.9,
            detail: format!(
                "{} sandwiched {} around trade {} (est. loss {})",
                self.attacker, self.victim, self.victim_trade_id, self.estimated_loss
            ),
            timestamp: now,
        }
    }
}

pub struct SandwichGuard {
    config: SandwichConfig,
    pending: HashMap<String, TimeWindow<Order>>,
    trades: HashMap<String, TimeWindow<Trade>>,
    reported: HashSet<String>,
}

impl SandwichGuard {
    pub fn new(config: SandwichConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            trades: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    /// Track an unconfirmed order
    pub fn observe_pending(&mut self, order: Order) {
        let ttl = self.config.pending_ttl_ms;
        self.pending
            .entry(order.market_id.clone())
            .or_insert_with(|| TimeWindow::new(ttl))
            .push(order.timestamp, order);
    }

    /// Remove a pending order once it settles or is cancelled.
    /// Returns whether the order was being tracked.
    pub fn confirm_pending(&mut self, order_id: &str) -> bool {
        let mut found = false;
        for window in self.pending.values_mut() {
            let before = window.len();
            window.retain(|o| o.id != order_id);
            found |= window.len() != before;
        }
        found
    }

    pub fn pending_count(&self, market_id: &str) -> usize {
        self.pending.get(market_id).map(|w| w.len()).unwrap_or(0)
    }

    /// Markets holding pending orders or trade history
    pub fn tracked_markets(&self) -> usize {
        self.pending
            .keys()
            .chain(self.trades.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn prune(&mut self, now: i64) {
        self.pending.retain(|_, w| {
            w.prune(now);
            !w.is_empty()
        });
        self.trades.retain(|_, w| {
            w.prune(now);
            !w.is_empty()
        });
        let live: HashSet<&str> = self
            .trades
            .values()
            .flat_map(|w| w.iter().map(|t| t.id.as_str()))
            .collect();
        self.reported.retain(|id| live.contains(id.as_str()));
    }

    /// Check an order we are about to submit against pending orders in its market
    pub fn check(&mut self, order: &Order, base_slippage: f64, now: i64) -> SandwichCheck {
        self.prune(now);

        let mut check = SandwichCheck {
            safe: true,
            recommended_slippage: base_slippage,
            threats: Vec::new(),
            coordinated: false,
            alerts: Vec::new(),
        };
        let window = match self.pending.get(&order.market_id) {
            Some(w) => w,
            None => return check,
        };

        let ours = order.amount.as_decimal();
        for pending in window.iter() {
            if pending.trader == order.trader || pending.id == order.id {
                continue;
            }
            if order.amount.is_zero() || pending.amount.ratio_to(order.amount) >= self.config.threat_size_multiple {
                check.threats.push(pending.id.clone());
            }
        }

        if !check.threats.is_empty() {
            check.safe = false;
            check.recommended_slippage = base_slippage * self.config.slippage_multiplier;
            warn!(
                market = %order.market_id,
                threats = check.threats.len(),
                "Large pending orders around our order"
            );
            check.alerts.push(Alert {
                kind: AlertKind::SandwichRisk,
                severity: Severity::High,
                market_id: order.market_id.clone(),
                addresses: window
                    .iter()
                    .filter(|o| check.threats.contains(&o.id))
                    .map(|o| o.trader.clone())
                    .collect(),
                confidence: 0.7,
                detail: format!(
                    "{} pending order(s) at least {:.0}x our size {}",
                    check.threats.len(),
                    self.config.threat_size_multiple,
                    ours
                ),
                timestamp: now,
            });
        }

        if let Some(addresses) = self.coordinated_bucket(window) {
            check.coordinated = true;
            check.alerts.push(Alert {
                kind: AlertKind::SandwichRisk,
                severity: Severity::Medium,
                market_id: order.market_id.clone(),
                addresses,
                confidence: 0.5,
                detail: "near-equal pending orders bunched in one second".to_string(),
                timestamp: now,
            });
        }

        check
    }

    /// Traders in the first bucket holding enough near-equal orders
    fn coordinated_bucket(&self, window: &TimeWindow<Order>) -> Option<Vec<String>> {
        let width = self.config.coordination_bucket_ms.max(1);
        let mut buckets: HashMap<i64, Vec<&Order>> = HashMap::new();
        for o in window.iter() {
            buckets.entry(o.timestamp.div_euclid(width)).or_default().push(o);
        }

        let mut keys: Vec<i64> = buckets.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            let orders = &buckets[&key];
            if orders.len() < self.config.coordination_min_orders {
                continue;
            }
            let sizes: Vec<f64> = orders.iter().map(|o| o.amount.to_f64()).collect();
            let n = sizes.len() as f64;
            let mean = sizes.iter().sum::<f64>() / n;
            if mean <= 0.0 {
                continue;
            }
            let variance = sizes.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
            if variance.sqrt() / mean < self.config.coordination_max_cv {
                let mut traders: Vec<String> = orders.iter().map(|o| o.trader.clone()).collect();
                traders.sort();
                traders.dedup();
                return Some(traders);
            }
        }
        None
    }

    /// Record a settled trade and scan its market for completed sandwiches
    pub fn record_trade(&mut self, trade: Trade, now: i64) -> Vec<SandwichAttack> {
        let history_ms = self.config.trade_history_ms;
        let market_id = trade.market_id.clone();
        self.trades
            .entry(market_id.clone())
            .or_insert_with(|| TimeWindow::new(history_ms))
            .push(trade.timestamp, trade);
        self.prune(now);

        let trades: Vec<&Trade> = match self.trades.get(&market_id) {
            Some(w) => w.iter().collect(),
            None => return Vec::new(),
        };

        let mut found = Vec::new();
        for victim in &trades {
            if self.reported.contains(&victim.id) {
                continue;
            }
            if let Some(attack) = self.scan_victim(victim, &trades) {
                found.push(attack);
            }
        }

        for attack in &found {
            warn!(
                market = %attack.market_id,
                attacker = %attack.attacker,
                victim = %attack.victim,
                loss = %attack.estimated_loss,
                "Sandwich attack detected"
            );
            self.reported.insert(attack.victim_trade_id.clone());
        }
        found
    }

    fn scan_victim(&self, victim: &Trade, trades: &[&Trade]) -> Option<SandwichAttack> {
        let w = self.config.block_window;
        let vb = victim.block;

        let sold_to_victim = |t: &&&Trade| {
            t.id != victim.id && t.buyer == victim.buyer && t.seller != victim.buyer
        };
        let fronts = trades
            .iter()
            .filter(sold_to_victim)
            .filter(|t| t.block < vb && t.block >= vb.saturating_sub(w));

        for front in fronts {
            let back = trades.iter().filter(sold_to_victim).find(|t| {
                t.seller == front.seller && t.block > vb && t.block <= vb.saturating_add(w)
            });
            if let Some(back) = back {
                let estimated_loss = if front.price > 0.0 {
                    let moved = (victim.price - front.price).abs() / front.price;
                    victim.amount.mul_ratio(moved).unwrap_or(Amount::ZERO)
                } else {
                    Amount::ZERO
                };
                debug!(victim = %victim.id, front = %front.id, back = %back.id, "Sandwich signature");
                return Some(SandwichAttack {
                    market_id: victim.market_id.clone(),
                    victim: victim.buyer.clone(),
                    attacker: front.seller.clone(),
                    victim_trade_id: victim.id.clone(),
                    front_run_trade_id: front.id.clone(),
                    back_run_trade_id: back.id.clone(),
                    estimated_loss,
                });
            }
        }
        None
    }

    pub fn config(&self) -> &SandwichConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    fn order(id: &str, trader: &str, amount: u64, ts: i64) -> Order {
        Order {
            id: id.into(),
            market_id: "m".into(),
            trader: trader.into(),
            side: OrderSide::Buy,
            amount: Amount::from_units(amount),
            price: 1.0,
            timestamp: ts,
            block: 0,
        }
    }

    fn trade(id: &str, buyer: &str, seller: &str, price: f64, block: u64) -> Trade {
        Trade {
            id: id.into(),
            market_id: "m".into(),
            buyer: buyer.into(),
            seller: seller.into(),
            amount: Amount::from_units(1_000),
            price,
            timestamp: block as i64 * 1_000,
            block,
        }
    }

    #[test]
    fn test_large_pending_order_is_threat() {
        let mut g = SandwichGuard::new(SandwichConfig::default());
        g.observe_pending(order("p1", "0xbot", 2_000, 0));
        g.observe_pending(order("p2", "0xsmall", 500, 5_000));

        let check = g.check(&order("me", "0xme", 1_000, 0), 0.01, 10);
        assert!(!check.safe);
        assert_eq!(check.threats, vec!["p1"]);
        assert!((check.recommended_slippage - 0.02).abs() < 1e-12);
        assert_eq!(check.alerts[0].severity, Severity::High);
    }

    #[test]
    fn test_repeated_check_yields_equal_result() {
        let mut g = SandwichGuard::new(SandwichConfig::default());
        g.observe_pending(order("p1", "0xbot", 2_000, 0));

        let first = g.check(&order("me", "0xme", 1_000, 0), 0.01, 10);
        let second = g.check(&order("me", "0xme", 1_000, 0), 0.01, 10);
        assert_eq!(first, second);
        assert_eq!(first.alerts.len(), 1);
        assert_eq!(g.tracked_markets(), 1);

        g.prune(40_000);
        assert_eq!(g.tracked_markets(), 0);
    }

    #[test]
    fn test_own_and_expired_orders_ignored() {
        let mut g = SandwichGuard::new(SandwichConfig::default());
        g.observe_pending(order("p1", "0xme", 5_000, 0));
        g.observe_pending(order("p2", "0xbot", 5_000, 0));

        // p2 expires after the TTL
        let check = g.check(&order("me", "0xme", 1_000, 40_000), 0.01, 40_000);
        assert!(check.safe);
        assert_eq!(check.recommended_slippage, 0.01);
        assert_eq!(g.pending_count("m"), 0);
    }

    #[test]
    fn test_confirm_pending_removes_order() {
        let mut g = SandwichGuard::new(SandwichConfig::default());
        g.observe_pending(order("p1", "0xbot", 5_000, 0));
        assert!(g.confirm_pending("p1"));
        assert!(!g.confirm_pending("p1"));
        assert!(g.check(&order("me", "0xme", 1_000, 0), 0.01, 0).safe);
    }

    #[test]
    fn test_coordinated_bucket_warns() {
        let mut g = SandwichGuard::new(SandwichConfig::default());
        g.observe_pending(order("a", "0x1", 1_000, 100));
        g.observe_pending(order("b", "0x2", 1_010, 300));
        g.observe_pending(order("c", "0x3", 990, 900));

        let check = g.check(&order("me", "0xme", 1_000, 950), 0.01, 950);
        assert!(check.safe);
        assert!(check.coordinated);
        assert_eq!(check.alerts.len(), 1);
        assert_eq!(check.alerts[0].severity, Severity::Medium);
        assert_eq!(check.alerts[0].addresses, vec!["0x1", "0x2", "0x3"]);
    }

    #[test]
    fn test_uneven_bucket_not_coordinated() {
        let mut g = SandwichGuard::new(SandwichConfig::default());
        g.observe_pending(order("a", "0x1", 100, 100));
        g.observe_pending(order("b", "0x2", 1_000, 300));
        g.observe_pending(order("c", "0x3", 500, 900));
        let check = g.check(&order("me", "0xme", 1_000, 950), 0.01, 950);
        assert!(!check.coordinated);
    }

    #[test]
    fn test_block_window_scan_finds_sandwich() {
        let mut g = SandwichGuard::new(SandwichConfig::default());
        assert!(g.record_trade(trade("front", "0xvictim", "0xatk", 100.0, 10), 10_000).is_empty());
        assert!(g.record_trade(trade("victim", "0xvictim", "0xpool", 105.0, 11), 11_000).is_empty());
        let found = g.record_trade(trade("back", "0xvictim", "0xatk", 106.0, 12), 12_000);

        assert_eq!(found.len(), 1);
        let attack = &found[0];
        assert_eq!(attack.attacker, "0xatk");
        assert_eq!(attack.victim, "0xvictim");
        assert_eq!(attack.victim_trade_id, "victim");
        // 1000 * |105 - 100| / 100
        assert_eq!(attack.estimated_loss, Amount::from_units(50));

        // Reported once only
        assert!(g.record_trade(trade("later", "0xother", "0xpool", 100.0, 13), 13_000).is_empty());
    }

    #[test]
    fn test_outside_block_window_is_not_sandwich() {
        let mut g = SandwichGuard::new(SandwichConfig::default());
        g.record_trade(trade("front", "0xvictim", "0xatk", 100.0, 1), 1_000);
        g.record_trade(trade("victim", "0xvictim", "0xpool", 105.0, 11), 11_000);
        let found = g.record_trade(trade("back", "0xvictim", "0xatk", 106.0, 12), 12_000);
        assert!(found.is_empty());
    }
}
