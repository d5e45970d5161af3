//! Risk-profile presets
//!
//! Strategy variants differ only in their numbers, so each profile is a
//! preset [`AgentConfig`] rather than a separate agent type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::AgentConfig;
use crate::amount::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl FromStr for RiskProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(RiskProfile::Conservative),
            "balanced" => Ok(RiskProfile::Balanced),
            "aggressive" => Ok(RiskProfile::Aggressive),
            other => Err(format!("unknown risk profile '{}'", other)),
        }
    }
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskProfile::Conservative => write!(f, "conservative"),
            RiskProfile::Balanced => write!(f, "balanced"),
            RiskProfile::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl AgentConfig {
    /// Preset parameters for a risk profile
    pub fn preset(profile: RiskProfile) -> Self {
        let base = AgentConfig {
            agent_id: "tradeguard".to_string(),
            profile,
            max_position_percent: 0.05,
            min_confidence: 0.65,
            kelly_fraction: 0.5,
            stop_loss_percent: 0.05,
            take_profit_percent: Some(0.15),
            trailing_stop_percent: Some(0.10),
            max_daily_drawdown: 0.03,
            max_total_drawdown: 0.10,
            cooldown_duration_ms: 3_600_000,
            daily_period_ms: 86_400_000,
            whale_volume_threshold: Amount::from_units(1_000_000_000_000_000_000),
            oracle_sources: Vec::new(),
            oracle_max_staleness_ms: 60_000,
            oracle_max_deviation: 0.02,
            initial_equity: Amount::from_units(10_000_000_000),
            payoff_ratio: 1.0,
            target_volatility: None,
            min_expected_value: 0.0,
            probe_liquidity_fraction: 0.01,
            base_slippage: 0.005,
        };

        match profile {
            RiskProfile::Balanced => base,
            RiskProfile::Conservative => AgentConfig {
                max_position_percent: 0.02,
                min_confidence: 0.75,
                kelly_fraction: 0.25,
                stop_loss_percent: 0.03,
                take_profit_percent: Some(0.10),
                trailing_stop_percent: Some(0.05),
                max_daily_drawdown: 0.02,
                max_total_drawdown: 0.05,
                cooldown_duration_ms: 4 * 3_600_000,
                target_volatility: Some(0.02),
                ..base
            },
            RiskProfile::Aggressive => AgentConfig {
                max_position_percent: 0.10,
                min_confidence: 0.55,
                kelly_fraction: 0.75,
                stop_loss_percent: 0.08,
                take_profit_percent: Some(0.25),
                trailing_stop_percent: Some(0.12),
                max_daily_drawdown: 0.05,
                max_total_drawdown: 0.20,
                cooldown_duration_ms: 1_800_000,
                ..base
            },
        }
    }
}
