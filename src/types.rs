//! Core types used throughout TradeGuard
//!
//! Market snapshots and signals flow in, alerts are raised by detectors,
//! and the pipeline produces either a sized trade decision or a rejection.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::amount::Amount;
use crate::risk::ExitReason;

/// Predicted price direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn from_bool(is_up: bool) -> Self {
        if is_up {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, Direction::Up)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Immutable market state for one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Market identifier
    pub market_id: String,
    /// Current price (quote per unit)
    pub price: f64,
    /// Liquidity depth in base units
    pub liquidity: Amount,
    /// Trailing 24h volume in base units
    pub volume_24h: Amount,
    /// Volatility as a unitless ratio (e.g. 0.04 = 4%)
    pub volatility: f64,
    /// Snapshot time (Unix ms)
    pub timestamp: i64,
}

/// Directional signal produced by an external predictor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub market_id: String,
    pub direction: Direction,
    /// Confidence level (0.0 - 1.0)
    pub confidence: f64,
    /// Expected value per unit staked
    pub expected_value: f64,
    /// Generation time (Unix ms)
    pub timestamp: i64,
    /// Counterparty address for counterparty-facing trades
    #[serde(default)]
    pub counterparty: Option<String>,
}

/// Open position in one market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub market_id: String,
    /// Signed asset quantity (negative = short)
    pub quantity: Decimal,
    /// Volume-weighted entry price
    pub entry_price: f64,
    /// Last observed price
    pub last_price: f64,
    /// Open time (Unix ms)
    pub opened_at: i64,
}

impl Position {
    /// Signed mark-to-market value in quote units, saturating at the
    /// Decimal range
    pub fn market_value(&self) -> Decimal {
        let price = Decimal::from_f64_retain(self.last_price).unwrap_or(Decimal::ZERO);
        self.quantity.saturating_mul(price)
    }

    /// Absolute notional in quote units
    pub fn notional(&self) -> Amount {
        Amount::saturating_from_decimal(self.market_value().abs())
    }

    /// Notional needed to close the position, rounded up so the closing
    /// fill covers the full quantity
    pub fn exit_notional(&self) -> Amount {
        Amount::saturating_from_decimal(self.market_value().abs().ceil())
    }

    pub fn is_long(&self) -> bool {
        self.quantity.is_sign_positive() && !self.quantity.is_zero()
    }

    pub fn quantity_f64(&self) -> f64 {
        self.quantity.to_f64().unwrap_or(0.0)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order as seen by the detectors (pending or probe)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub market_id: String,
    pub trader: String,
    pub side: OrderSide,
    /// Order size in base units
    pub amount: Amount,
    pub price: f64,
    /// Submission time (Unix ms)
    pub timestamp: i64,
    /// Block / sequence number
    #[serde(default)]
    pub block: u64,
}

impl Order {
    /// Size with sign by side (buys positive)
    pub fn signed_amount(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => self.amount.as_decimal(),
            OrderSide::Sell => -self.amount.as_decimal(),
        }
    }
}

/// Settled trade between two counterparties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub market_id: String,
    pub buyer: String,
    pub seller: String,
    /// Trade size in base units
    pub amount: Amount,
    pub price: f64,
    /// Settlement time (Unix ms)
    pub timestamp: i64,
    /// Block / sequence number
    pub block: u64,
}

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Manipulation pattern that raised an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    WhaleOrder,
    PriceImpact,
    VolumeShare,
    SelfTrading,
    CircularTrading,
    VolumeInflation,
    SandwichRisk,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::WhaleOrder => "WHALE_ORDER",
            AlertKind::PriceImpact => "PRICE_IMPACT",
            AlertKind::VolumeShare => "VOLUME_SHARE",
            AlertKind::SelfTrading => "SELF_TRADING",
            AlertKind::CircularTrading => "CIRCULAR_TRADING",
            AlertKind::VolumeInflation => "VOLUME_INFLATION",
            AlertKind::SandwichRisk => "SANDWICH_RISK",
        };
        write!(f, "{}", s)
    }
}

/// Detector finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub market_id: String,
    /// Addresses implicated in the pattern
    pub addresses: Vec<String>,
    /// Confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Human-readable detail
    pub detail: String,
    /// When the alert was raised (Unix ms)
    pub timestamp: i64,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] {} (conf {:.2})",
            self.kind, self.severity, self.detail, self.confidence
        )
    }
}

/// Action proposed by a strategy function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProposedAction {
    Buy,
    Sell,
    Hold,
}

/// Executable action on an approved decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn is_buy(&self) -> bool {
        matches!(self, TradeAction::Buy)
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
        }
    }
}

/// Approved, sized decision handed to the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDecision {
    pub id: Uuid,
    pub action: TradeAction,
    pub market_id: String,
    /// Quote notional in base units
    pub amount: Amount,
    pub confidence: f64,
    pub reason: String,
    /// Non-critical alerts surfaced while gating
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Set when a stop-loss tracker forced this exit
    #[serde(default)]
    pub forced_exit: Option<ExitReason>,
    pub timestamp: i64,
}

/// Gate that rejected a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Drawdown,
    Oracle,
    Manipulation,
    Strategy,
    Confidence,
    Sizing,
    Reputation,
}

impl Gate {
    /// Stable reason code used in logs and the audit ledger
    pub fn code(&self) -> &'static str {
        match self {
            Gate::Drawdown => "DRAWDOWN_LIMIT",
            Gate::Oracle => "ORACLE_UNHEALTHY",
            Gate::Manipulation => "MANIPULATION_CRITICAL",
            Gate::Strategy => "STRATEGY_HOLD",
            Gate::Confidence => "LOW_CONFIDENCE",
            Gate::Sizing => "NON_POSITIVE_SIZE",
            Gate::Reputation => "COUNTERPARTY_DENIED",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Defined "no trade" outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub market_id: String,
    pub gate: Gate,
    pub reason: String,
    pub timestamp: i64,
}

/// Result of one pipeline evaluation
#[derive(Debug, Clone)]
pub enum Outcome {
    Approved(TradeDecision),
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, Outcome::Approved(_))
    }

    pub fn decision(&self) -> Option<&TradeDecision> {
        match self {
            Outcome::Approved(d) => Some(d),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Approved(_) => None,
            Outcome::Rejected(r) => Some(r),
        }
    }
}
