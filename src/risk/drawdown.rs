//! Drawdown Guard - account-level equity curve monitor
//!
//! Implements:
//! - Monotonic peak equity tracking
//! - Daily drawdown against a rolling daily baseline
//! - Total drawdown against the peak
//! - Cooldown suspension after a limit breach

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::amount::Amount;

/// Share of the daily limit above which a warning is reported
const WARNING_RATIO: f64 = 0.8;

/// Drawdown limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownConfig {
    /// Maximum daily drawdown fraction (e.g. 0.03 = 3%)
    pub max_daily_drawdown: f64,
    /// Maximum drawdown from peak (e.g. 0.10 = 10%)
    pub max_total_drawdown: f64,
    /// Suspension length after a breach
    pub cooldown_duration_ms: i64,
    /// Length of the daily period
    pub daily_period_ms: i64,
}

impl Default for DrawdownConfig {
    fn default() -> Self {
        Self {
            max_daily_drawdown: 0.03,
            max_total_drawdown: 0.10,
            cooldown_duration_ms: 3_600_000,
            daily_period_ms: 86_400_000,
        }
    }
}

/// Guard level reported on each update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DrawdownLevel {
    Normal,
    Warning,
    Critical,
    Cooldown,
}

impl fmt::Display for DrawdownLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawdownLevel::Normal => write!(f, "NORMAL"),
            DrawdownLevel::Warning => write!(f, "WARNING"),
            DrawdownLevel::Critical => write!(f, "CRITICAL"),
            DrawdownLevel::Cooldown => write!(f, "COOLDOWN"),
        }
    }
}

/// Persistent guard state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownState {
    pub peak_equity: Amount,
    pub current_equity: Amount,
    pub daily_start_equity: Amount,
    pub last_daily_reset: i64,
    pub cooldown_active: bool,
    pub cooldown_end: i64,
    pub trigger_count: u32,
}

/// Result of one equity update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownStatus {
    pub level: DrawdownLevel,
    pub can_trade: bool,
    pub total_drawdown: f64,
    pub daily_drawdown: f64,
    pub reason: Option<String>,
}

/// Equity curve monitor
#[derive(Debug, Clone)]
pub struct DrawdownGuard {
    config: DrawdownConfig,
    state: DrawdownState,
}

/// `(base - current) / base`, zero for a zero base, never negative
fn drawdown_ratio(base: Amount, current: Amount) -> f64 {
    if base.is_zero() {
        return 0.0;
    }
    let base = base.as_decimal();
    let diff = base - current.as_decimal();
    if diff <= Decimal::ZERO {
        return 0.0;
    }
    (diff / base).to_f64().unwrap_or(0.0)
}

impl DrawdownGuard {
    pub fn new(config: DrawdownConfig, initial_equity: Amount, now: i64) -> Self {
        Self {
            config,
            state: DrawdownState {
                peak_equity: initial_equity,
                current_equity: initial_equity,
                daily_start_equity: initial_equity,
                last_daily_reset: now,
                cooldown_active: false,
                cooldown_end: 0,
                trigger_count: 0,
            },
        }
    }

    /// Restore from persisted state
    pub fn from_state(config: DrawdownConfig, state: DrawdownState) -> Self {
        Self { config, state }
    }

    /// Feed the latest equity figure
    pub fn update(&mut self, equity: Amount, now: i64) -> DrawdownStatus {
        let s = &mut self.state;
        s.current_equity = equity;
        if equity > s.peak_equity {
            s.peak_equity = equity;
        }

        if now.saturating_sub(s.last_daily_reset) >= self.config.daily_period_ms {
            s.daily_start_equity = equity;
            s.last_daily_reset = now;
        }

        let total = drawdown_ratio(s.peak_equity, s.current_equity);
        let daily = drawdown_ratio(s.daily_start_equity, s.current_equity);

        if s.cooldown_active {
            if now >= s.cooldown_end {
                s.cooldown_active = false;
                info!(
                    triggers = s.trigger_count,
                    "Drawdown cooldown expired, resuming evaluation"
                );
            } else {
                // Still inside the window: CRITICAL while a limit is breached
                let breached = total >= self.config.max_total_drawdown
                    || daily >= self.config.max_daily_drawdown;
                return DrawdownStatus {
                    level: if breached {
                        DrawdownLevel::Critical
                    } else {
                        DrawdownLevel::Cooldown
                    },
                    can_trade: false,
                    total_drawdown: total,
                    daily_drawdown: daily,
                    reason: Some(format!(
                        "trading suspended for {}ms more after drawdown breach",
                        s.cooldown_end - now
                    )),
                };
            }
        }

        let total_hit = total >= self.config.max_total_drawdown;
        let daily_hit = daily >= self.config.max_daily_drawdown;
        if total_hit || daily_hit {
            s.cooldown_active = true;
            s.cooldown_end = now.saturating_add(self.config.cooldown_duration_ms);
            s.trigger_count += 1;

            let reason = if total_hit {
                format!(
                    "total drawdown {:.2}% reached limit {:.2}%",
                    total * 100.0,
                    self.config.max_total_drawdown * 100.0
                )
            } else {
                format!(
                    "daily drawdown {:.2}% reached limit {:.2}%",
                    daily * 100.0,
                    self.config.max_daily_drawdown * 100.0
                )
            };
            warn!(
                equity = %equity,
                peak = %s.peak_equity,
                triggers = s.trigger_count,
                "Drawdown limit breached: {}",
                reason
            );

            return DrawdownStatus {
                level: DrawdownLevel::Critical,
                can_trade: false,
                total_drawdown: total,
                daily_drawdown: daily,
                reason: Some(reason),
            };
        }

        let level = if daily > self.config.max_daily_drawdown * WARNING_RATIO {
            DrawdownLevel::Warning
        } else {
            DrawdownLevel::Normal
        };

        DrawdownStatus {
            level,
            can_trade: true,
            total_drawdown: total,
            daily_drawdown: daily,
            reason: None,
        }
    }

    pub fn can_trade(&self, now: i64) -> bool {
        !self.state.cooldown_active || now >= self.state.cooldown_end
    }

    pub fn state(&self) -> &DrawdownState {
        &self.state
    }

    pub fn config(&self) -> &DrawdownConfig {
        &self.config
    }

    pub fn current_equity(&self) -> Amount {
        self.state.current_equity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(initial: u64) -> DrawdownGuard {
        DrawdownGuard::new(DrawdownConfig::default(), Amount::from_units(initial), 0)
    }

    #[test]
    fn test_daily_limit_enters_cooldown() {
        let mut g = guard(10_000);

        let first = g.update(Amount::from_units(9_700), 1_000);
        assert_eq!(first.level, DrawdownLevel::Critical);
        assert!(!first.can_trade);

        let second = g.update(Amount::from_units(9_699), 2_000);
        assert!(!second.can_trade);
        assert_eq!(second.level, DrawdownLevel::Critical);
        assert!(second.reason.unwrap().contains("suspended"));
        // Staying in the window does not count as a new breach
        assert_eq!(g.state().trigger_count, 1);
    }

    #[test]
    fn test_recovered_equity_inside_window_reports_cooldown() {
        let mut g = guard(10_000);
        g.update(Amount::from_units(9_700), 1_000);

        let s = g.update(Amount::from_units(9_950), 2_000);
        assert_eq!(s.level, DrawdownLevel::Cooldown);
        assert!(!s.can_trade);
        assert!(!g.can_trade(2_000));
        assert_eq!(g.state().trigger_count, 1);
    }

    #[test]
    fn test_total_limit_from_new_peak() {
        let mut g = guard(10_000);
        let up = g.update(Amount::from_units(11_000), 1_000);
        assert_eq!(up.level, DrawdownLevel::Normal);
        assert_eq!(g.state().peak_equity, Amount::from_units(11_000));

        // ~10.9% below the new peak, only 2% below the daily baseline
        let down = g.update(Amount::from_units(9_800), 2_000);
        assert_eq!(down.level, DrawdownLevel::Critical);
        assert!(!down.can_trade);
        assert!(down.total_drawdown > 0.10);
    }

    #[test]
    fn test_warning_above_eighty_percent_of_daily_limit() {
        let mut g = guard(10_000);
        // 2.5% > 0.8 * 3%
        let s = g.update(Amount::from_units(9_750), 1_000);
        assert_eq!(s.level, DrawdownLevel::Warning);
        assert!(s.can_trade);

        let s = g.update(Amount::from_units(9_900), 2_000);
        assert_eq!(s.level, DrawdownLevel::Normal);
    }

    #[test]
    fn test_peak_never_decreases() {
        let mut g = guard(10_000);
        g.update(Amount::from_units(10_500), 1);
        g.update(Amount::from_units(10_400), 2);
        assert_eq!(g.state().peak_equity, Amount::from_units(10_500));
    }

    #[test]
    fn test_cooldown_expires_and_daily_baseline_resets() {
        let config = DrawdownConfig {
            cooldown_duration_ms: 1_000,
            daily_period_ms: 10_000,
            max_total_drawdown: 0.5,
            ..Default::default()
        };
        let mut g = DrawdownGuard::new(config, Amount::from_units(10_000), 0);
        assert_eq!(g.update(Amount::from_units(9_600), 100).level, DrawdownLevel::Critical);
        assert!(!g.can_trade(500));

        // Cooldown over, but still the same day: daily drawdown re-breaches
        let s = g.update(Amount::from_units(9_600), 1_200);
        assert_eq!(s.level, DrawdownLevel::Critical);
        assert_eq!(g.state().trigger_count, 2);

        // Next day: baseline resets to current equity
        let s = g.update(Amount::from_units(9_600), 12_000);
        assert_eq!(s.level, DrawdownLevel::Normal);
        assert!(s.can_trade);
        assert_eq!(g.state().daily_start_equity, Amount::from_units(9_600));
    }

    #[test]
    fn test_zero_equity_denominator() {
        let mut g = guard(0);
        let s = g.update(Amount::ZERO, 1);
        assert_eq!(s.total_drawdown, 0.0);
        assert_eq!(s.daily_drawdown, 0.0);
        assert!(s.can_trade);
    }
}
