//! Agent runner - sequential tick loop around one pipeline
//!
//! Ticks are drained one at a time; a tick's feeds, gates and ledger write
//! all complete before the stop signal is looked at again.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::pipeline::DecisionPipeline;
use crate::reputation::ReputationGate;
use crate::types::{MarketSnapshot, Order, Outcome, Signal, Trade, TradeDecision};

/// Oracle price observed alongside a tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleQuote {
    pub source: String,
    pub price: f64,
    /// Defaults to the snapshot time
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// One unit of work: market feeds observed since the last tick, then the
/// snapshot/signal pair to evaluate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub snapshot: MarketSnapshot,
    pub signal: Signal,
    #[serde(default)]
    pub oracle: Vec<OracleQuote>,
    #[serde(default)]
    pub trades: Vec<Trade>,
    #[serde(default)]
    pub pending: Vec<Order>,
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub approved: u64,
    pub rejected: u64,
    pub forced_exits: u64,
    pub errors: u64,
    /// Ended by the stop signal rather than by the tick source closing
    pub stopped: bool,
}

/// Line-delimited JSON tick source. Blank and malformed lines are skipped.
pub struct TickFile {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl TickFile {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    /// Next well-formed tick, or `None` at end of file
    pub async fn next_tick(&mut self) -> std::io::Result<Option<Tick>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Tick>(&line) {
                Ok(tick) => return Ok(Some(tick)),
                Err(e) => error!(line = self.line_no, error = %e, "Skipping malformed tick"),
            }
        }
        Ok(None)
    }

    pub fn lines_read(&self) -> usize {
        self.line_no
    }
}

pub struct AgentRunner {
    pipeline: DecisionPipeline,
    reputation: Option<ReputationGate>,
    decisions: Option<mpsc::UnboundedSender<TradeDecision>>,
    paper_fills: bool,
}

impl AgentRunner {
    pub fn new(pipeline: DecisionPipeline) -> Self {
        Self {
            pipeline,
            reputation: None,
            decisions: None,
            paper_fills: false,
        }
    }

    /// Consult the reputation gate for signals naming a counterparty
    pub fn with_reputation(mut self, gate: ReputationGate) -> Self {
        self.reputation = Some(gate);
        self
    }

    /// Forward approved decisions to an executor
    pub fn with_decision_sink(mut self, sink: mpsc::UnboundedSender<TradeDecision>) -> Self {
        self.decisions = Some(sink);
        self
    }

    /// Fill approved decisions immediately at the snapshot price
    pub fn with_paper_fills(mut self, enabled: bool) -> Self {
        self.paper_fills = enabled;
        self
    }

    pub fn pipeline(&self) -> &DecisionPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut DecisionPipeline {
        &mut self.pipeline
    }

    pub fn into_pipeline(self) -> DecisionPipeline {
        self.pipeline
    }

    /// Drain `ticks` until the channel closes or `stop` turns true
    pub async fn run(
        &mut self,
        mut ticks: mpsc::Receiver<Tick>,
        mut stop: watch::Receiver<bool>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut stop_open = true;

        loop {
            if *stop.borrow() {
                summary.stopped = true;
                break;
            }

            tokio::select! {
                biased;

                changed = stop.changed(), if stop_open => {
                    if changed.is_err() {
                        // Stop sender dropped: nobody can stop us any more
                        stop_open = false;
                    }
                }

                tick = ticks.recv() => {
                    match tick {
                        Some(tick) => self.process(tick, &mut summary).await,
                        None => {
                            debug!("Tick source closed");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            ticks = summary.ticks,
            approved = summary.approved,
            rejected = summary.rejected,
            forced_exits = summary.forced_exits,
            errors = summary.errors,
            stopped = summary.stopped,
            "Runner finished"
        );
        summary
    }

    async fn process(&mut self, tick: Tick, summary: &mut RunSummary) {
        summary.ticks += 1;
        match self.step(tick).await {
            Ok(Outcome::Approved(decision)) => {
                summary.approved += 1;
                if decision.forced_exit.is_some() {
                    summary.forced_exits += 1;
                }
                if let Some(sink) = &self.decisions {
                    if sink.send(decision).is_err() {
                        warn!("Decision sink closed, dropping approved decision");
                    }
                }
            }
            Ok(Outcome::Rejected(_)) => summary.rejected += 1,
            Err(e) => {
                summary.errors += 1;
                error!(error = %e, "Tick failed");
            }
        }
    }

    /// Feed, evaluate and (in paper mode) fill one tick
    pub async fn step(&mut self, tick: Tick) -> Result<Outcome, PipelineError> {
        let now = tick.snapshot.timestamp;

        for quote in tick.oracle {
            self.pipeline
                .observe_oracle_price(&quote.source, quote.price, quote.timestamp.unwrap_or(now));
        }
        for trade in tick.trades {
            self.pipeline.observe_trade(trade, now);
        }
        for order in tick.pending {
            self.pipeline.observe_pending(order, now);
        }

        let verdict = match (&self.reputation, tick.signal.counterparty.as_deref()) {
            (Some(gate), Some(address)) => Some(gate.check(address).await),
            _ => None,
        };

        let outcome =
            self.pipeline
                .evaluate_with(&tick.snapshot, &tick.signal, verdict.as_ref(), now)?;

        if self.paper_fills {
            if let Outcome::Approved(decision) = &outcome {
                self.pipeline.apply_fill(
                    &decision.market_id,
                    decision.amount,
                    tick.snapshot.price,
                    decision.action.is_buy(),
                    now,
                )?;
            }
        }
        Ok(outcome)
    }
}
