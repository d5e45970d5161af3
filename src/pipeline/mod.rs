//! Decision Pipeline - every proposed trade passes the same gates
//!
//! Gate order for one (snapshot, signal) pair:
//! 1. drawdown guard: abort while trading is suspended
//! 2. oracle health: abort on any unhealthy configured source
//! 3. manipulation detectors on a probe order: abort on CRITICAL only,
//!    anything less becomes a warning on the decision
//! 4. strategy function proposes BUY / SELL / HOLD
//! 5. confidence floor
//! 6. position sizing (plus the counterparty verdict, when one is supplied)
//! 7. stop-loss override: a triggered tracker forces the position closed
//!    and gates 4-6 are skipped
//!
//! Every outcome, including errors, is written to the audit ledger before
//! `evaluate` returns. Gate rejections are values, not errors.

pub mod strategy;

pub use strategy::{SignalFollower, StrategyFn};

use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::amount::Amount;
use crate::audit::{events, AuditLedger};
use crate::config::AgentConfig;
use crate::detection::{DetectionConfig, Detectors};
use crate::error::{LedgerError, PipelineError};
use crate::oracle::{self, OracleMonitor, SharedOracleMonitor};
use crate::reputation::ReputationVerdict;
use crate::risk::{
    DrawdownGuard, ExitReason, FillEffect, Portfolio, PortfolioBalancer, PositionSizer,
    StopLossTracker, TrackerTable,
};
use crate::types::{
    Alert, Direction, Gate, MarketSnapshot, Order, OrderSide, Outcome, ProposedAction, Rejection,
    Severity, Signal, Trade, TradeAction, TradeDecision,
};

/// Single-writer decision pipeline for one agent
pub struct DecisionPipeline {
    config: AgentConfig,
    strategy: Box<dyn StrategyFn>,
    sizer: PositionSizer,
    drawdown: DrawdownGuard,
    oracle: SharedOracleMonitor,
    detectors: Detectors,
    trackers: TrackerTable,
    /// Exits signalled by a tracker and not yet filled
    pending_exits: HashMap<String, ExitReason>,
    portfolio: Portfolio,
    ledger: AuditLedger,
}

impl DecisionPipeline {
    pub fn new(
        config: AgentConfig,
        detection: DetectionConfig,
        strategy: Box<dyn StrategyFn>,
        ledger: AuditLedger,
        now: i64,
    ) -> Self {
        let oracle = oracle::shared(OracleMonitor::new(config.oracle_config()));
        Self {
            sizer: config.position_sizer(),
            drawdown: DrawdownGuard::new(config.drawdown_config(), config.initial_equity, now),
            portfolio: Portfolio::new(config.initial_equity),
            detectors: Detectors::new(detection),
            trackers: TrackerTable::new(),
            pending_exits: HashMap::new(),
            oracle,
            strategy,
            ledger,
            config,
        }
    }

    /// Use an oracle monitor shared with other pipelines
    pub fn with_shared_oracle(mut self, oracle: SharedOracleMonitor) -> Self {
        self.oracle = oracle;
        self
    }

    /// Evaluate a (snapshot, signal) pair without a counterparty verdict
    pub fn evaluate(
        &mut self,
        snapshot: &MarketSnapshot,
        signal: &Signal,
        now: i64,
    ) -> Result<Outcome, PipelineError> {
        self.evaluate_with(snapshot, signal, None, now)
    }

    /// Evaluate a (snapshot, signal) pair. `verdict` is the result of a
    /// reputation lookup for the signal's counterparty, if one was made.
    pub fn evaluate_with(
        &mut self,
        snapshot: &MarketSnapshot,
        signal: &Signal,
        verdict: Option<&ReputationVerdict>,
        now: i64,
    ) -> Result<Outcome, PipelineError> {
        let market = snapshot.market_id.as_str();
        if signal.market_id != snapshot.market_id {
            debug!(market, signal_market = %signal.market_id, "Signal market differs from snapshot");
        }

        self.housekeeping(now);
        self.observe_snapshot(snapshot);

        // Gate 1: drawdown
        let equity = self.portfolio.equity();
        let status = self.drawdown.update(equity, now);
        if !status.can_trade {
            let reason = status.reason.unwrap_or_else(|| {
                format!("drawdown guard at {} suspends trading", status.level)
            });
            return self.reject(market, Gate::Drawdown, reason, now);
        }

        // Gate 2: oracle health
        let health = match self.oracle.lock() {
            Ok(monitor) => monitor.health(now),
            Err(poisoned) => poisoned.into_inner().health(now),
        };
        if !health.healthy {
            return self.reject(market, Gate::Oracle, health.summary(), now);
        }

        // Gate 3: manipulation detectors
        let alerts = match self.probe_alerts(snapshot, signal, now) {
            Ok(alerts) => alerts,
            Err(e) => return Err(self.fail(market, e, now)),
        };
        if let Some(critical) = alerts.iter().find(|a| a.severity == Severity::Critical) {
            let reason = critical.to_string();
            return self.reject(market, Gate::Manipulation, reason, now);
        }
        let mut warnings: Vec<String> = alerts.iter().map(|a| a.to_string()).collect();

        // Gate 7: a fired tracker overrides gates 4-6 entirely
        if let Some(forced) = self.forced_exit(market, &warnings, now) {
            warn!(
                market,
                reason = ?forced.forced_exit,
                amount = %forced.amount,
                "Stop tracker forced exit"
            );
            let ts = self.ledger_time(now);
            let payload = serde_json::to_value(&forced).map_err(LedgerError::from)?;
            self.ledger.record(events::FORCED_EXIT, payload, Some(ts))?;
            return Ok(Outcome::Approved(forced));
        }

        let candidate = self.candidate(snapshot, signal, verdict, &mut warnings, now);
        let candidate = match candidate {
            Ok(c) => c,
            Err(e) => return Err(self.fail(market, e, now)),
        };

        match candidate {
            Ok(decision) => {
                info!(
                    market,
                    action = %decision.action,
                    amount = %decision.amount,
                    confidence = decision.confidence,
                    warnings = decision.warnings.len(),
                    "Decision approved"
                );
                let ts = self.ledger_time(now);
                let payload = serde_json::to_value(&decision).map_err(LedgerError::from)?;
                self.ledger.record(events::DECISION_APPROVED, payload, Some(ts))?;
                Ok(Outcome::Approved(decision))
            }
            Err(rejection) => self.reject(market, rejection.gate, rejection.reason, now),
        }
    }

    /// Drop detector state outside its windows, for every market, and
    /// trackers whose exit has already been handed out
    fn housekeeping(&mut self, now: i64) {
        self.detectors.prune(now);
        let dropped = self.trackers.prune_triggered();
        if dropped > 0 {
            debug!(dropped, "Pruned triggered trackers");
        }
    }

    fn observe_snapshot(&mut self, snapshot: &MarketSnapshot) {
        let market = snapshot.market_id.as_str();
        self.portfolio.mark(market, snapshot.price);
        self.detectors
            .whale
            .update_market(market, snapshot.liquidity, snapshot.volume_24h);

        if let Some(reason) = self.trackers.update(market, snapshot.price) {
            info!(market, %reason, price = snapshot.price, "Exit condition reached");
            self.pending_exits.insert(market.to_string(), reason);
        }
    }

    /// Alerts for a probe order sized from current liquidity, plus recent
    /// trade-flow alerts for the market
    fn probe_alerts(
        &mut self,
        snapshot: &MarketSnapshot,
        signal: &Signal,
        now: i64,
    ) -> Result<Vec<Alert>, PipelineError> {
        let probe = Order {
            id: format!("probe-{}", Uuid::new_v4()),
            market_id: snapshot.market_id.clone(),
            trader: self.config.agent_id.clone(),
            side: match signal.direction {
                Direction::Up => OrderSide::Buy,
                Direction::Down => OrderSide::Sell,
            },
            amount: snapshot
                .liquidity
                .mul_ratio(self.config.probe_liquidity_fraction)?,
            price: snapshot.price,
            timestamp: now,
            block: 0,
        };

        let mut alerts = Vec::new();
        alerts.extend(self.detectors.whale.assess(&probe, now));
        let check = self
            .detectors
            .sandwich
            .check(&probe, self.config.base_slippage, now);
        alerts.extend(check.alerts);
        alerts.extend(self.detectors.recent_alerts(&snapshot.market_id, now));
        Ok(alerts)
    }

    /// Gates 4-6. The outer error is a domain failure; the inner one a rejection.
    fn candidate(
        &self,
        snapshot: &MarketSnapshot,
        signal: &Signal,
        verdict: Option<&ReputationVerdict>,
        warnings: &mut Vec<String>,
        now: i64,
    ) -> Result<Result<TradeDecision, Rejection>, PipelineError> {
        let market = snapshot.market_id.clone();
        let rejection = |gate: Gate, reason: String| Rejection {
            market_id: market.clone(),
            gate,
            reason,
            timestamp: now,
        };

        let action = match self.strategy.decide(snapshot, signal) {
            ProposedAction::Buy => TradeAction::Buy,
            ProposedAction::Sell => TradeAction::Sell,
            ProposedAction::Hold => {
                return Ok(Err(rejection(
                    Gate::Strategy,
                    format!("{} proposed HOLD", self.strategy.name()),
                )))
            }
        };

        if signal.confidence < self.config.min_confidence {
            return Ok(Err(rejection(
                Gate::Confidence,
                format!(
                    "confidence {:.3} below minimum {:.3}",
                    signal.confidence, self.config.min_confidence
                ),
            )));
        }

        let bankroll = self.portfolio.equity();
        let amount = self.sizer.size(
            bankroll,
            signal.confidence,
            self.config.payoff_ratio,
            snapshot.volatility,
        )?;
        if amount.is_zero() {
            return Ok(Err(rejection(
                Gate::Sizing,
                format!(
                    "no positive size for confidence {:.3} at payoff {:.2}",
                    signal.confidence, self.config.payoff_ratio
                ),
            )));
        }

        match verdict {
            Some(ReputationVerdict::Denied { reason }) => {
                let who = signal.counterparty.as_deref().unwrap_or("counterparty");
                return Ok(Err(rejection(
                    Gate::Reputation,
                    format!("{} denied: {}", who, reason),
                )));
            }
            Some(ReputationVerdict::Unverified { warning }) => warnings.push(warning.clone()),
            Some(ReputationVerdict::Allowed) | None => {}
        }

        Ok(Ok(TradeDecision {
            id: Uuid::new_v4(),
            action,
            market_id: market.clone(),
            amount,
            confidence: signal.confidence,
            reason: format!(
                "{} {} on {} signal (ev {:.4})",
                self.strategy.name(),
                action,
                signal.direction,
                signal.expected_value
            ),
            warnings: warnings.clone(),
            forced_exit: None,
            timestamp: now,
        }))
    }

    /// Close-out decision for a market whose tracker has fired
    fn forced_exit(&self, market: &str, warnings: &[String], now: i64) -> Option<TradeDecision> {
        let reason = *self.pending_exits.get(market)?;
        let position = self.portfolio.position(market)?;
        let action = if position.is_long() {
            TradeAction::Sell
        } else {
            TradeAction::Buy
        };
        Some(TradeDecision {
            id: Uuid::new_v4(),
            action,
            market_id: market.to_string(),
            amount: position.exit_notional(),
            confidence: 1.0,
            reason: format!("forced exit: {}", reason),
            warnings: warnings.to_vec(),
            forced_exit: Some(reason),
            timestamp: now,
        })
    }

    fn reject(
        &mut self,
        market: &str,
        gate: Gate,
        reason: String,
        now: i64,
    ) -> Result<Outcome, PipelineError> {
        info!(market, code = gate.code(), %reason, "Decision rejected");
        let rejection = Rejection {
            market_id: market.to_string(),
            gate,
            reason,
            timestamp: now,
        };
        let ts = self.ledger_time(now);
        let payload = json!({
            "market_id": rejection.market_id,
            "code": gate.code(),
            "reason": rejection.reason,
        });
        self.ledger.record(events::DECISION_REJECTED, payload, Some(ts))?;
        Ok(Outcome::Rejected(rejection))
    }

    /// Audit a domain failure and hand it back to the caller
    fn fail(&mut self, market: &str, e: PipelineError, now: i64) -> PipelineError {
        error!(market, error = %e, "Pipeline error");
        let ts = self.ledger_time(now);
        let payload = json!({ "market_id": market, "error": e.to_string() });
        match self.ledger.record(events::PIPELINE_ERROR, payload, Some(ts)) {
            Ok(_) => e,
            Err(ledger_err) => ledger_err.into(),
        }
    }

    /// Ledger timestamps never go backwards even if the caller's clock does
    fn ledger_time(&self, now: i64) -> i64 {
        self.ledger.last_timestamp().map_or(now, |last| now.max(last))
    }

    /// Executor callback after settlement. Opens or closes the market's
    /// stop tracker as the position opens, flips or closes.
    pub fn apply_fill(
        &mut self,
        market_id: &str,
        amount: Amount,
        price: f64,
        is_buy: bool,
        now: i64,
    ) -> Result<FillEffect, PipelineError> {
        let effect = self
            .portfolio
            .apply_fill(market_id, amount, price, is_buy, now)?;

        match effect {
            FillEffect::Opened | FillEffect::Flipped => {
                if let Some(position) = self.portfolio.position(market_id) {
                    let tracker = StopLossTracker::new(
                        position.entry_price,
                        self.config.stop_loss_config(),
                        Direction::from_bool(position.is_long()),
                    );
                    self.trackers.open(market_id, tracker);
                }
                self.pending_exits.remove(market_id);
            }
            FillEffect::Closed => {
                self.trackers.close(market_id);
                self.pending_exits.remove(market_id);
            }
            FillEffect::Increased | FillEffect::Reduced => {}
        }

        let ts = self.ledger_time(now);
        self.ledger.record(
            events::FILL_APPLIED,
            json!({
                "market_id": market_id,
                "amount": amount,
                "price": price,
                "side": if is_buy { "BUY" } else { "SELL" },
                "effect": format!("{:?}", effect),
                "cash": self.portfolio.cash(),
            }),
            Some(ts),
        )?;
        Ok(effect)
    }

    /// Settled trade from the market feed
    pub fn observe_trade(&mut self, trade: Trade, now: i64) -> Vec<Alert> {
        self.detectors.observe_trade(trade, now)
    }

    /// Unconfirmed third-party order from the mempool or order book
    pub fn observe_pending(&mut self, order: Order, now: i64) -> Option<Alert> {
        self.detectors.observe_order(order, now)
    }

    pub fn confirm_pending(&mut self, order_id: &str) -> bool {
        self.detectors.sandwich.confirm_pending(order_id)
    }

    pub fn observe_oracle_price(&mut self, source: &str, price: f64, timestamp: i64) {
        match self.oracle.lock() {
            Ok(mut monitor) => monitor.update(source, price, timestamp),
            Err(poisoned) => poisoned.into_inner().update(source, price, timestamp),
        }
    }

    /// Largest position's share of gross position value
    pub fn concentration_risk(&self) -> f64 {
        PortfolioBalancer::concentration_risk(&self.portfolio)
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn drawdown(&self) -> &DrawdownGuard {
        &self.drawdown
    }

    pub fn trackers(&self) -> &TrackerTable {
        &self.trackers
    }

    pub fn oracle(&self) -> SharedOracleMonitor {
        self.oracle.clone()
    }

    pub fn detectors(&self) -> &Detectors {
        &self.detectors
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}
