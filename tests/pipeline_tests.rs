//! End-to-end tests for the decision pipeline

#[cfg(test)]
mod tests {
    use tradeguard::amount::Amount;
    use tradeguard::audit::{events, AuditLedger};
    use tradeguard::config::{AgentConfig, RiskProfile};
    use tradeguard::detection::DetectionConfig;
    use tradeguard::oracle::{self, OracleConfig, OracleMonitor};
    use tradeguard::pipeline::DecisionPipeline;
    use tradeguard::risk::{ExitReason, FillEffect};
    use tradeguard::types::{
        Direction, Gate, MarketSnapshot, Order, OrderSide, ProposedAction, Signal, Trade,
        TradeAction,
    };

    const MARKET: &str = "btc-usdc";

    fn snapshot(price: f64, ts: i64) -> MarketSnapshot {
        MarketSnapshot {
            market_id: MARKET.into(),
            price,
            liquidity: Amount::from_units(1_000_000_000_000),
            volume_24h: Amount::from_units(10_000_000_000_000),
            volatility: 0.02,
            timestamp: ts,
        }
    }

    fn signal(direction: Direction, confidence: f64, ts: i64) -> Signal {
        Signal {
            market_id: MARKET.into(),
            direction,
            confidence,
            expected_value: 0.05,
            timestamp: ts,
            counterparty: None,
        }
    }

    fn follower_pipeline(config: AgentConfig) -> DecisionPipeline {
        DecisionPipeline::new(
            config,
            DetectionConfig::default(),
            Box::new(tradeguard::pipeline::SignalFollower::default()),
            AuditLedger::new("e2e"),
            0,
        )
    }

    // ============================================================================
    // Position lifecycle
    // ============================================================================

    #[test]
    fn test_open_trail_and_take_profit() {
        let mut p = follower_pipeline(AgentConfig::default());

        let outcome = p.evaluate(&snapshot(100.0, 1_000), &signal(Direction::Up, 0.8, 1_000), 1_000).unwrap();
        let decision = outcome.decision().unwrap().clone();
        assert_eq!(decision.action, TradeAction::Buy);

        let effect = p
            .apply_fill(MARKET, decision.amount, 100.0, true, 1_010)
            .unwrap();
        assert_eq!(effect, FillEffect::Opened);
        assert!(p.trackers().get(MARKET).is_some());

        // +10% is below the 15% take-profit
        let outcome = p.evaluate(&snapshot(110.0, 2_000), &signal(Direction::Up, 0.8, 2_000), 2_000).unwrap();
        assert_eq!(outcome.decision().unwrap().forced_exit, None);

        let outcome = p.evaluate(&snapshot(116.0, 3_000), &signal(Direction::Up, 0.8, 3_000), 3_000).unwrap();
        let exit = outcome.decision().unwrap();
        assert_eq!(exit.forced_exit, Some(ExitReason::TakeProfit));
        assert_eq!(exit.action, TradeAction::Sell);

        let effect = p.apply_fill(MARKET, exit.amount, 116.0, false, 3_010).unwrap();
        assert_eq!(effect, FillEffect::Closed);
        assert!(!p.portfolio().has_position(MARKET));
        assert!(p.portfolio().equity() > Amount::from_units(10_000_000_000));
    }

    #[test]
    fn test_forced_exit_ignores_hold_and_confidence() {
        let mut p = follower_pipeline(AgentConfig::default());
        p.apply_fill(MARKET, Amount::from_units(50_000_000), 100.0, true, 10)
            .unwrap();

        // A HOLD with low confidence would be rejected by gates 4-5
        let mut s = signal(Direction::Down, 0.1, 1_000);
        s.expected_value = 0.0;
        let outcome = p.evaluate(&snapshot(90.0, 1_000), &s, 1_000).unwrap();
        let exit = outcome.decision().unwrap();
        assert_eq!(exit.forced_exit, Some(ExitReason::StopLoss));
        assert_eq!(exit.confidence, 1.0);
    }

    #[test]
    fn test_short_position_forced_exit_buys_back() {
        let mut p = follower_pipeline(AgentConfig::default());
        p.apply_fill(MARKET, Amount::from_units(50_000_000), 100.0, false, 10)
            .unwrap();
        assert!(!p.portfolio().position(MARKET).unwrap().is_long());

        let outcome = p.evaluate(&snapshot(106.0, 1_000), &signal(Direction::Down, 0.8, 1_000), 1_000).unwrap();
        let exit = outcome.decision().unwrap();
        assert_eq!(exit.forced_exit, Some(ExitReason::StopLoss));
        assert_eq!(exit.action, TradeAction::Buy);

        let effect = p.apply_fill(MARKET, exit.amount, 106.0, true, 1_010).unwrap();
        assert_eq!(effect, FillEffect::Closed);
    }

    // ============================================================================
    // Gate order
    // ============================================================================

    #[test]
    fn test_drawdown_gate_precedes_oracle_gate() {
        let mut config = AgentConfig::default();
        config.oracle_sources = vec!["chainlink".into()];
        let mut p = follower_pipeline(config);
        p.observe_oracle_price("chainlink", 100.0, 0);
        p.apply_fill(MARKET, Amount::from_units(1_000_000_000), 100.0, true, 0)
            .unwrap();

        // Price halves: drawdown breached and the oracle is also stale
        let outcome = p
            .evaluate(&snapshot(50.0, 120_000), &signal(Direction::Up, 0.8, 120_000), 120_000)
            .unwrap();
        assert_eq!(outcome.rejection().unwrap().gate, Gate::Drawdown);

        // Still suspended on the next tick
        let outcome = p
            .evaluate(&snapshot(50.0, 130_000), &signal(Direction::Up, 0.8, 130_000), 130_000)
            .unwrap();
        let rejection = outcome.rejection().unwrap();
        assert_eq!(rejection.gate, Gate::Drawdown);
        assert!(rejection.reason.contains("suspended"));
    }

    #[test]
    fn test_large_pending_order_surfaces_as_warning() {
        let mut p = follower_pipeline(AgentConfig::default());
        // First tick registers the market's liquidity with the whale detector
        let outcome = p.evaluate(&snapshot(100.0, 500), &signal(Direction::Up, 0.8, 500), 500).unwrap();
        assert!(outcome.decision().unwrap().warnings.is_empty());

        // Third party order 3x the 1% probe
        let alert = p.observe_pending(
            Order {
                id: "big".into(),
                market_id: MARKET.into(),
                trader: "0xfront".into(),
                side: OrderSide::Buy,
                amount: Amount::from_units(30_000_000_000),
                price: 100.0,
                timestamp: 900,
                block: 7,
            },
            900,
        );
        assert!(alert.is_none());

        let outcome = p.evaluate(&snapshot(100.0, 1_000), &signal(Direction::Up, 0.8, 1_000), 1_000).unwrap();
        let decision = outcome.decision().unwrap();
        assert!(decision
            .warnings
            .iter()
            .any(|w| w.starts_with("SANDWICH_RISK")));

        assert!(p.confirm_pending("big"));
        let outcome = p.evaluate(&snapshot(100.0, 2_000), &signal(Direction::Up, 0.8, 2_000), 2_000).unwrap();
        assert!(!outcome
            .decision()
            .unwrap()
            .warnings
            .iter()
            .any(|w| w.starts_with("SANDWICH_RISK")));
    }

    #[test]
    fn test_circular_trading_is_warning_until_critical() {
        let mut p = follower_pipeline(AgentConfig::default());
        let mut trade = |id: &str, buyer: &str, seller: &str, ts: i64| {
            p.observe_trade(
                Trade {
                    id: id.into(),
                    market_id: MARKET.into(),
                    buyer: buyer.into(),
                    seller: seller.into(),
                    amount: Amount::from_units(1_000),
                    price: 100.0,
                    timestamp: ts,
                    block: ts as u64,
                },
                ts,
            )
        };
        trade("t1", "0xa", "0xb", 100);
        trade("t2", "0xb", "0xa", 200);
        let alerts = trade("t3", "0xa", "0xb", 300);
        assert!(!alerts.is_empty());

        let outcome = p.evaluate(&snapshot(100.0, 1_000), &signal(Direction::Up, 0.8, 1_000), 1_000).unwrap();
        let decision = outcome.decision().unwrap();
        assert!(decision
            .warnings
            .iter()
            .any(|w| w.starts_with("CIRCULAR_TRADING[HIGH]")));
    }

    // ============================================================================
    // Strategy variants as data
    // ============================================================================

    #[test]
    fn test_profiles_change_gating_not_code() {
        let s = signal(Direction::Up, 0.62, 1_000);

        let mut aggressive = follower_pipeline(AgentConfig::preset(RiskProfile::Aggressive));
        assert!(aggressive.evaluate(&snapshot(100.0, 1_000), &s, 1_000).unwrap().is_approved());

        let mut conservative = follower_pipeline(AgentConfig::preset(RiskProfile::Conservative));
        let outcome = conservative.evaluate(&snapshot(100.0, 1_000), &s, 1_000).unwrap();
        assert_eq!(outcome.rejection().unwrap().gate, Gate::Confidence);
    }

    #[test]
    fn test_closure_strategy() {
        let contrarian = |_: &MarketSnapshot, signal: &Signal| match signal.direction {
            Direction::Up => ProposedAction::Sell,
            Direction::Down => ProposedAction::Buy,
        };
        let mut p = DecisionPipeline::new(
            AgentConfig::default(),
            DetectionConfig::default(),
            Box::new(contrarian),
            AuditLedger::new("contrarian"),
            0,
        );
        let outcome = p.evaluate(&snapshot(100.0, 1_000), &signal(Direction::Up, 0.8, 1_000), 1_000).unwrap();
        assert_eq!(outcome.decision().unwrap().action, TradeAction::Sell);
    }

    // ============================================================================
    // Shared oracle and audit
    // ============================================================================

    #[test]
    fn test_shared_oracle_between_pipelines() {
        let shared = oracle::shared(OracleMonitor::new(OracleConfig {
            sources: vec!["pyth".into()],
            max_staleness_ms: 60_000,
            max_deviation: 0.02,
        }));
        let mut a = follower_pipeline(AgentConfig::default()).with_shared_oracle(shared.clone());
        let mut b = follower_pipeline(AgentConfig::default()).with_shared_oracle(shared);

        let outcome = b.evaluate(&snapshot(100.0, 1_000), &signal(Direction::Up, 0.8, 1_000), 1_000).unwrap();
        assert_eq!(outcome.rejection().unwrap().gate, Gate::Oracle);

        a.observe_oracle_price("pyth", 100.0, 1_500);
        let outcome = b.evaluate(&snapshot(100.0, 2_000), &signal(Direction::Up, 0.8, 2_000), 2_000).unwrap();
        assert!(outcome.is_approved());
    }

    #[test]
    fn test_every_outcome_is_audited() {
        let mut p = follower_pipeline(AgentConfig::default());
        p.evaluate(&snapshot(100.0, 1_000), &signal(Direction::Up, 0.8, 1_000), 1_000).unwrap();
        p.evaluate(&snapshot(100.0, 2_000), &signal(Direction::Up, 0.3, 2_000), 2_000).unwrap();
        p.evaluate(&snapshot(100.0, 3_000), &signal(Direction::Up, 1.0, 3_000), 3_000)
            .unwrap_err();
        p.apply_fill(MARKET, Amount::from_units(1_000), 100.0, true, 4_000)
            .unwrap();

        let kinds: Vec<&str> = p
            .ledger()
            .entries()
            .iter()
            .map(|e| e.event_type.as_str())
            .collect();
        assert_eq!(
            kinds,
            vec![
                events::DECISION_APPROVED,
                events::DECISION_REJECTED,
                events::PIPELINE_ERROR,
                events::FILL_APPLIED
            ]
        );
        let report = AuditLedger::verify_trail(p.ledger().entries(), None);
        assert!(report.valid);
        assert_eq!(report.merkle_root, p.ledger().merkle_root());
    }
}
