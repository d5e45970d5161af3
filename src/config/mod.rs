//! Configuration management for TradeGuard
//!
//! Loads code defaults (from the selected risk profile), optional
//! `config/default` and `config/local` files, then `TRADEGUARD__*`
//! environment variables, with `.env` read first.

mod profile;

pub use profile::RiskProfile;

use anyhow::{anyhow, bail, Context, Result};
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::amount::Amount;
use crate::detection::DetectionConfig;
use crate::oracle::OracleConfig;
use crate::risk::{DrawdownConfig, PositionSizer, StopLossConfig};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub detection: DetectionConfig,
    pub ledger: LedgerConfig,
    pub reputation: ReputationConfig,
    pub logging: LoggingConfig,
}

/// Per-agent risk parameters. Percentages are fractions (0.05 = 5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent id written to every audit entry
    pub agent_id: String,
    /// Preset the defaults were taken from
    pub profile: RiskProfile,
    /// Position cap as a fraction of bankroll
    pub max_position_percent: f64,
    /// Minimum signal confidence to trade (0.0 - 1.0)
    pub min_confidence: f64,
    /// Safety multiplier applied to full Kelly
    pub kelly_fraction: f64,
    pub stop_loss_percent: f64,
    #[serde(default)]
    pub take_profit_percent: Option<f64>,
    #[serde(default)]
    pub trailing_stop_percent: Option<f64>,
    pub max_daily_drawdown: f64,
    pub max_total_drawdown: f64,
    pub cooldown_duration_ms: i64,
    /// Length of the daily drawdown period
    pub daily_period_ms: i64,
    /// Absolute order size flagged as a whale order (base units)
    pub whale_volume_threshold: Amount,
    #[serde(default)]
    pub oracle_sources: Vec<String>,
    pub oracle_max_staleness_ms: i64,
    pub oracle_max_deviation: f64,
    /// Starting equity (base units)
    pub initial_equity: Amount,
    /// Win/loss payoff ratio used for Kelly sizing
    pub payoff_ratio: f64,
    /// Volatility at which sizes are not dampened; unset disables dampening
    #[serde(default)]
    pub target_volatility: Option<f64>,
    /// Expected value at or below which the signal follower holds
    pub min_expected_value: f64,
    /// Probe order size as a fraction of market liquidity
    pub probe_liquidity_fraction: f64,
    /// Slippage tolerance before sandwich adjustments
    pub base_slippage: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig::preset(RiskProfile::Balanced)
    }
}

impl AgentConfig {
    pub fn drawdown_config(&self) -> DrawdownConfig {
        DrawdownConfig {
            max_daily_drawdown: self.max_daily_drawdown,
            max_total_drawdown: self.max_total_drawdown,
            cooldown_duration_ms: self.cooldown_duration_ms,
            daily_period_ms: self.daily_period_ms,
        }
    }

    pub fn stop_loss_config(&self) -> StopLossConfig {
        StopLossConfig {
            stop_loss_pct: self.stop_loss_percent,
            take_profit_pct: self.take_profit_percent,
            trailing_stop_pct: self.trailing_stop_percent,
        }
    }

    pub fn oracle_config(&self) -> OracleConfig {
        OracleConfig {
            sources: self.oracle_sources.clone(),
            max_staleness_ms: self.oracle_max_staleness_ms,
            max_deviation: self.oracle_max_deviation,
        }
    }

    pub fn position_sizer(&self) -> PositionSizer {
        PositionSizer::new(
            self.kelly_fraction,
            self.max_position_percent,
            self.target_volatility,
        )
    }

    /// Check every fraction and duration is usable
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| -> Result<()> {
            if !(0.0..=1.0).contains(&v) {
                bail!("agent.{} must lie in [0, 1], got {}", name, v);
            }
            Ok(())
        };
        let open_unit = |name: &str, v: f64| -> Result<()> {
            if !(v > 0.0 && v < 1.0) {
                bail!("agent.{} must lie in (0, 1), got {}", name, v);
            }
            Ok(())
        };

        if self.agent_id.trim().is_empty() {
            bail!("agent.agent_id must not be empty");
        }
        unit("max_position_percent", self.max_position_percent)?;
        unit("min_confidence", self.min_confidence)?;
        unit("kelly_fraction", self.kelly_fraction)?;
        open_unit("stop_loss_percent", self.stop_loss_percent)?;
        if let Some(tp) = self.take_profit_percent {
            if !(tp > 0.0) {
                bail!("agent.take_profit_percent must be positive, got {}", tp);
            }
        }
        if let Some(ts) = self.trailing_stop_percent {
            open_unit("trailing_stop_percent", ts)?;
        }
        open_unit("max_daily_drawdown", self.max_daily_drawdown)?;
        open_unit("max_total_drawdown", self.max_total_drawdown)?;
        open_unit("oracle_max_deviation", self.oracle_max_deviation)?;
        unit("probe_liquidity_fraction", self.probe_liquidity_fraction)?;
        unit("base_slippage", self.base_slippage)?;

        if self.cooldown_duration_ms < 0 {
            bail!("agent.cooldown_duration_ms must not be negative");
        }
        if self.daily_period_ms <= 0 || self.oracle_max_staleness_ms <= 0 {
            bail!("agent.daily_period_ms and agent.oracle_max_staleness_ms must be positive");
        }
        if !(self.payoff_ratio > 0.0) {
            bail!("agent.payoff_ratio must be positive, got {}", self.payoff_ratio);
        }
        if let Some(tv) = self.target_volatility {
            if !(tv > 0.0) {
                bail!("agent.target_volatility must be positive, got {}", tv);
            }
        }
        if self.initial_equity.is_zero() {
            bail!("agent.initial_equity must be positive");
        }
        Ok(())
    }
}

/// Audit ledger persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-lines file the trail is flushed to; unset keeps the ledger in memory
    pub path: Option<String>,
    /// Entries written per flush
    pub batch_size: usize,
    /// Maximum time an entry waits before being flushed
    pub flush_interval_ms: u64,
    /// Attempts per batch before it is reported as failed
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// HMAC key for entry signatures; unset leaves entries unsigned
    pub signing_key: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            batch_size: 64,
            flush_interval_ms: 1_000,
            max_retries: 5,
            retry_base_delay_ms: 200,
            signing_key: None,
        }
    }
}

/// Counterparty reputation lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub cache_ttl_ms: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 2_000,
            max_retries: 2,
            cache_ttl_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "tradeguard=debug"
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn with_sources(builder: ConfigBuilder<DefaultState>, dir: &Path) -> ConfigBuilder<DefaultState> {
    builder
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join("local")).required(false))
        .add_source(
            Environment::with_prefix("TRADEGUARD")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("agent.oracle_sources"),
        )
}

fn with_agent_defaults(
    builder: ConfigBuilder<DefaultState>,
    agent: &AgentConfig,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let mut builder = builder
        .set_default("agent.agent_id", agent.agent_id.clone())?
        .set_default("agent.profile", agent.profile.to_string())?
        .set_default("agent.max_position_percent", agent.max_position_percent)?
        .set_default("agent.min_confidence", agent.min_confidence)?
        .set_default("agent.kelly_fraction", agent.kelly_fraction)?
        .set_default("agent.stop_loss_percent", agent.stop_loss_percent)?
        .set_default("agent.max_daily_drawdown", agent.max_daily_drawdown)?
        .set_default("agent.max_total_drawdown", agent.max_total_drawdown)?
        .set_default("agent.cooldown_duration_ms", agent.cooldown_duration_ms)?
        .set_default("agent.daily_period_ms", agent.daily_period_ms)?
        .set_default(
            "agent.whale_volume_threshold",
            agent.whale_volume_threshold.to_string(),
        )?
        .set_default("agent.oracle_sources", agent.oracle_sources.clone())?
        .set_default("agent.oracle_max_staleness_ms", agent.oracle_max_staleness_ms)?
        .set_default("agent.oracle_max_deviation", agent.oracle_max_deviation)?
        .set_default("agent.initial_equity", agent.initial_equity.to_string())?
        .set_default("agent.payoff_ratio", agent.payoff_ratio)?
        .set_default("agent.min_expected_value", agent.min_expected_value)?
        .set_default("agent.probe_liquidity_fraction", agent.probe_liquidity_fraction)?
        .set_default("agent.base_slippage", agent.base_slippage)?;

    // Optional limits only get a default when the preset sets one
    if let Some(tp) = agent.take_profit_percent {
        builder = builder.set_default("agent.take_profit_percent", tp)?;
    }
    if let Some(ts) = agent.trailing_stop_percent {
        builder = builder.set_default("agent.trailing_stop_percent", ts)?;
    }
    if let Some(tv) = agent.target_volatility {
        builder = builder.set_default("agent.target_volatility", tv)?;
    }
    Ok(builder)
}

impl AppConfig {
    /// Load configuration from `config/` and the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(Path::new("config"))
    }

    /// Load configuration with files read from `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        // The profile decides which preset supplies the agent defaults
        let probe = with_sources(Config::builder(), dir)
            .build()
            .context("Failed to build configuration")?;
        let profile = match probe.get_string("agent.profile") {
            Ok(name) => name.parse::<RiskProfile>().map_err(|e| anyhow!(e))?,
            Err(_) => RiskProfile::default(),
        };

        let preset = AgentConfig::preset(profile);
        let config = with_agent_defaults(Config::builder(), &preset)?;
        let config = with_sources(config, dir)
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject configurations a pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        if self.ledger.batch_size == 0 {
            bail!("ledger.batch_size must be positive");
        }
        if self.reputation.enabled && self.reputation.timeout_ms == 0 {
            bail!("reputation.timeout_ms must be positive when reputation is enabled");
        }
        Ok(())
    }

    /// Detector settings with the agent's whale threshold applied
    pub fn detection_config(&self) -> DetectionConfig {
        let mut detection = self.detection.clone();
        detection.whale.volume_threshold = self.agent.whale_volume_threshold;
        detection
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "agent={} profile={} max_pos={:.3} min_conf={:.2} kelly={:.2} dd={:.3}/{:.3} oracles={:?} ledger={} signed={}",
            self.agent.agent_id,
            self.agent.profile,
            self.agent.max_position_percent,
            self.agent.min_confidence,
            self.agent.kelly_fraction,
            self.agent.max_daily_drawdown,
            self.agent.max_total_drawdown,
            self.agent.oracle_sources,
            self.ledger.path.as_deref().unwrap_or("memory"),
            self.ledger.signing_key.is_some()
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
