//! Portfolio state and target-allocation rebalancing
//!
//! [`Portfolio`] owns cash and open positions and is only mutated through
//! fills. [`PortfolioBalancer`] compares current holdings against target
//! fractions and produces rebalance orders.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::amount::Amount;
use crate::error::{AmountError, BalancerError};
use crate::types::{Position, TradeAction};

/// Allowed slack when target allocations are summed
pub const ALLOCATION_TOLERANCE: f64 = 1e-3;

/// What a fill did to the market's position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillEffect {
    Opened,
    Increased,
    Reduced,
    Closed,
    /// Crossed through zero into the opposite side
    Flipped,
}

/// Cash plus open positions keyed by market id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    cash: Amount,
    positions: HashMap<String, Position>,
}

fn to_decimal(v: f64) -> Result<Decimal, AmountError> {
    if !v.is_finite() {
        return Err(AmountError::NotFinite);
    }
    Decimal::from_f64_retain(v).ok_or(AmountError::Overflow)
}

impl Portfolio {
    pub fn new(cash: Amount) -> Self {
        Self {
            cash,
            positions: HashMap::new(),
        }
    }

    /// Apply an executed fill of `amount` quote units at `price`
    pub fn apply_fill(
        &mut self,
        market_id: &str,
        amount: Amount,
        price: f64,
        is_buy: bool,
        now: i64,
    ) -> Result<FillEffect, AmountError> {
        if !(price > 0.0) {
            return Err(AmountError::NotFinite);
        }
        let price_d = to_decimal(price)?;
        let qty = amount
            .as_decimal()
            .checked_div(price_d)
            .ok_or(AmountError::Overflow)?;
        let delta = if is_buy { qty } else { -qty };

        let cash = if is_buy {
            self.cash.checked_sub(amount)?
        } else {
            self.cash.checked_add(amount)?
        };

        let effect = match self.positions.get_mut(market_id) {
            None => {
                self.positions.insert(
                    market_id.to_string(),
                    Position {
                        market_id: market_id.to_string(),
                        quantity: delta,
                        entry_price: price,
                        last_price: price,
                        opened_at: now,
                    },
                );
                FillEffect::Opened
            }
            Some(pos) => {
                let old = pos.quantity;
                let new = old.checked_add(delta).ok_or(AmountError::Overflow)?;
                let residual = new.checked_mul(price_d).ok_or(AmountError::Overflow)?;
                pos.last_price = price;

                // Residual worth less than one base unit counts as flat
                if residual.abs() < Decimal::ONE {
                    FillEffect::Closed
                } else if old.is_sign_negative() == delta.is_sign_negative() {
                    let old_abs = old.abs().to_f64().unwrap_or(0.0);
                    let delta_abs = delta.abs().to_f64().unwrap_or(0.0);
                    pos.entry_price =
                        (old_abs * pos.entry_price + delta_abs * price) / (old_abs + delta_abs);
                    pos.quantity = new;
                    FillEffect::Increased
                } else if new.is_sign_negative() == old.is_sign_negative() {
                    pos.quantity = new;
                    FillEffect::Reduced
                } else {
                    pos.quantity = new;
                    pos.entry_price = price;
                    pos.opened_at = now;
                    FillEffect::Flipped
                }
            }
        };

        self.cash = cash;
        if effect == FillEffect::Closed {
            self.positions.remove(market_id);
        }
        debug!(market = market_id, ?effect, cash = %self.cash, "Fill applied");
        Ok(effect)
    }

    /// Record the latest price for a held market
    pub fn mark(&mut self, market_id: &str, price: f64) {
        if let Some(pos) = self.positions.get_mut(market_id) {
            pos.last_price = price;
        }
    }

    /// Cash plus marked position values, floored at zero
    pub fn equity(&self) -> Amount {
        let total = self
            .positions
            .values()
            .fold(self.cash.as_decimal(), |acc, p| acc.saturating_add(p.market_value()));
        Amount::saturating_from_decimal(total)
    }

    /// Sum of absolute position notionals
    pub fn gross_position_value(&self) -> Decimal {
        self.positions
            .values()
            .fold(Decimal::ZERO, |acc, p| acc.saturating_add(p.market_value().abs()))
    }

    pub fn cash(&self) -> Amount {
        self.cash
    }

    pub fn position(&self, market_id: &str) -> Option<&Position> {
        self.positions.get(market_id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn has_position(&self, market_id: &str) -> bool {
        self.positions.contains_key(market_id)
    }
}

/// Current vs target for one market
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationDeviation {
    pub market_id: String,
    pub target_value: f64,
    pub current_value: f64,
    /// `|current - target| / target`; 1.0 when the target is zero but a position exists
    pub relative_deviation: f64,
}

/// Order that moves a market back towards its target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceOrder {
    pub market_id: String,
    pub action: TradeAction,
    /// Absolute value difference in quote units
    pub amount: Amount,
}

/// Target-allocation deviation calculator
#[derive(Debug, Clone)]
pub struct PortfolioBalancer {
    targets: HashMap<String, f64>,
    threshold: f64,
}

impl PortfolioBalancer {
    /// Fails unless the target fractions sum to 1.0 within [`ALLOCATION_TOLERANCE`]
    pub fn new(targets: HashMap<String, f64>, threshold: f64) -> Result<Self, BalancerError> {
        for (market, &value) in &targets {
            if !(0.0..=1.0).contains(&value) {
                return Err(BalancerError::AllocationRange {
                    market: market.clone(),
                    value,
                });
            }
        }
        let sum: f64 = targets.values().sum();
        if (sum - 1.0).abs() > ALLOCATION_TOLERANCE {
            return Err(BalancerError::AllocationSum(sum));
        }
        Ok(Self { targets, threshold })
    }

    /// Deviation for every targeted or held market, sorted by market id
    pub fn deviations(&self, portfolio: &Portfolio) -> Vec<AllocationDeviation> {
        let total = portfolio.gross_position_value().to_f64().unwrap_or(0.0);

        let markets: BTreeSet<&str> = self
            .targets
            .keys()
            .map(String::as_str)
            .chain(portfolio.positions.keys().map(String::as_str))
            .collect();

        markets
            .into_iter()
            .map(|market| {
                let fraction = self.targets.get(market).copied().unwrap_or(0.0);
                let target_value = total * fraction;
                let current_value = portfolio
                    .position(market)
                    .map(|p| p.quantity_f64() * p.last_price)
                    .unwrap_or(0.0);
                let relative_deviation = if target_value > 0.0 {
                    (current_value - target_value).abs() / target_value
                } else if current_value.abs() > 0.0 {
                    1.0
                } else {
                    0.0
                };
                AllocationDeviation {
                    market_id: market.to_string(),
                    target_value,
                    current_value,
                    relative_deviation,
                }
            })
            .collect()
    }

    /// Orders for every market whose relative deviation exceeds the threshold
    pub fn rebalance_orders(&self, portfolio: &Portfolio) -> Vec<RebalanceOrder> {
        self.deviations(portfolio)
            .into_iter()
            .filter(|d| d.relative_deviation > self.threshold)
            .filter_map(|d| {
                let diff = d.target_value - d.current_value;
                let action = if diff > 0.0 {
                    TradeAction::Buy
                } else {
                    TradeAction::Sell
                };
                let amount = Amount::from_f64_trunc(diff.abs()).ok()?;
                if amount.is_zero() {
                    return None;
                }
                Some(RebalanceOrder {
                    market_id: d.market_id,
                    action,
                    amount,
                })
            })
            .collect()
    }

    /// Largest single position value divided by total position value
    pub fn concentration_risk(portfolio: &Portfolio) -> f64 {
        let total = portfolio.gross_position_value();
        if total.is_zero() {
            return 0.0;
        }
        let largest = portfolio
            .positions()
            .map(|p| p.market_value().abs())
            .max()
            .unwrap_or(Decimal::ZERO);
        (largest / total).to_f64().unwrap_or(0.0)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn targets(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_fill_lifecycle_and_vwap() {
        let mut p = Portfolio::new(Amount::from_units(10_000));
        assert_eq!(
            p.apply_fill("btc", Amount::from_units(1000), 100.0, true, 1).unwrap(),
            FillEffect::Opened
        );
        assert_eq!(
            p.apply_fill("btc", Amount::from_units(2000), 200.0, true, 2).unwrap(),
            FillEffect::Increased
        );
        let pos = p.position("btc").unwrap();
        assert_eq!(pos.quantity, dec!(20));
        // 10 @ 100 + 10 @ 200
        assert!((pos.entry_price - 150.0).abs() < 1e-9);
        assert_eq!(p.cash(), Amount::from_units(7000));

        assert_eq!(
            p.apply_fill("btc", Amount::from_units(2000), 200.0, false, 3).unwrap(),
            FillEffect::Reduced
        );
        assert_eq!(
            p.apply_fill("btc", Amount::from_units(2000), 200.0, false, 4).unwrap(),
            FillEffect::Closed
        );
        assert!(!p.has_position("btc"));
        assert_eq!(p.cash(), Amount::from_units(11_000));
    }

    #[test]
    fn test_buy_without_cash_fails() {
        let mut p = Portfolio::new(Amount::from_units(100));
        assert!(p.apply_fill("btc", Amount::from_units(101), 1.0, true, 0).is_err());
    }

    #[test]
    fn test_equity_marks_positions() {
        let mut p = Portfolio::new(Amount::from_units(1000));
        p.apply_fill("eth", Amount::from_units(500), 50.0, true, 0).unwrap();
        p.mark("eth", 60.0);
        // 500 cash + 10 * 60
        assert_eq!(p.equity(), Amount::from_units(1100));
    }

    #[test]
    fn test_extreme_marks_saturate_instead_of_panicking() {
        let mut p = Portfolio::new(Amount::from_units(10_000_000_000));
        p.apply_fill("eth", Amount::from_units(1_000_000_000), 1e-10, true, 0)
            .unwrap();
        p.mark("eth", 1e10);
        assert_eq!(p.equity(), Amount::saturating_from_decimal(Decimal::MAX));
        assert!(PortfolioBalancer::concentration_risk(&p) > 0.99);
    }

    #[test]
    fn test_balancer_rejects_bad_sum() {
        let err = PortfolioBalancer::new(targets(&[("a", 0.5), ("b", 0.4)]), 0.05).unwrap_err();
        assert!(matches!(err, BalancerError::AllocationSum(_)));
        assert!(PortfolioBalancer::new(targets(&[("a", 0.5), ("b", 0.5005)]), 0.05).is_ok());
    }

    #[test]
    fn test_rebalance_orders_and_concentration() {
        let mut p = Portfolio::new(Amount::from_units(100_000));
        p.apply_fill("a", Amount::from_units(7000), 1.0, true, 0).unwrap();
        p.apply_fill("b", Amount::from_units(3000), 1.0, true, 0).unwrap();

        let balancer = PortfolioBalancer::new(targets(&[("a", 0.5), ("b", 0.5)]), 0.1).unwrap();
        let orders = balancer.rebalance_orders(&p);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].market_id, "a");
        assert_eq!(orders[0].action, TradeAction::Sell);
        assert_eq!(orders[0].amount, Amount::from_units(2000));
        assert_eq!(orders[1].action, TradeAction::Buy);
        assert_eq!(orders[1].amount, Amount::from_units(2000));

        let risk = PortfolioBalancer::concentration_risk(&p);
        assert!((risk - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_within_threshold_emits_nothing() {
        let mut p = Portfolio::new(Amount::from_units(100_000));
        p.apply_fill("a", Amount::from_units(5200), 1.0, true, 0).unwrap();
        p.apply_fill("b", Amount::from_units(4800), 1.0, true, 0).unwrap();
        let balancer = PortfolioBalancer::new(targets(&[("a", 0.5), ("b", 0.5)]), 0.1).unwrap();
        assert!(balancer.rebalance_orders(&p).is_empty());
    }
}
