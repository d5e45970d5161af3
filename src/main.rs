//! TradeGuard - risk-gated decision pipeline
//!
//! Usage:
//!   tradeguard run <ticks.jsonl> [--paper]   replay ticks through a pipeline
//!   tradeguard verify <ledger.jsonl>         re-verify a persisted audit trail

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use tradeguard::audit::{load_trail, AuditLedger, FlushConfig, HmacSigner, JsonlFileSink, LedgerFlusher};
use tradeguard::config::AppConfig;
use tradeguard::pipeline::{DecisionPipeline, SignalFollower};
use tradeguard::reputation::{HttpReputationClient, ReputationGate};
use tradeguard::runner::{AgentRunner, Tick, TickFile};
use tradeguard::logging;

const USAGE: &str = "usage: tradeguard run <ticks.jsonl> [--paper] | tradeguard verify <ledger.jsonl>";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, path) = match (args.first(), args.get(1)) {
        (Some(c), Some(p)) => (c.as_str(), PathBuf::from(p)),
        _ => bail!(USAGE),
    };
    let paper = args.iter().skip(2).any(|a| a == "--paper");

    let config = AppConfig::load().context("Failed to load configuration")?;
    logging::init(&config.logging)?;
    info!("Configuration: {}", config.digest());

    match command {
        "run" => run(config, &path, paper).await,
        "verify" => verify(&config, &path).await,
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
}

fn signer(config: &AppConfig) -> Result<Option<HmacSigner>> {
    config
        .ledger
        .signing_key
        .as_deref()
        .map(HmacSigner::from_secret)
        .transpose()
        .context("Invalid ledger signing key")
}

async fn run(config: AppConfig, ticks_path: &Path, paper: bool) -> Result<()> {
    let mut ledger = AuditLedger::new(config.agent.agent_id.clone());
    if let Some(signer) = signer(&config)? {
        ledger = ledger.with_signer(signer);
    }

    let flusher = config.ledger.path.as_ref().map(|path| {
        info!(path = %path, "Persisting audit ledger");
        LedgerFlusher::spawn(JsonlFileSink::new(path), FlushConfig::from(&config.ledger))
    });
    if let Some(f) = &flusher {
        ledger.attach_sink(f.sender());
    }

    // Replayed ticks carry their own clock; the guard's daily period starts there
    let mut ticks = TickFile::open(ticks_path)
        .await
        .with_context(|| format!("Failed to open {}", ticks_path.display()))?;
    let first = ticks.next_tick().await?;
    let start = first
        .as_ref()
        .map_or_else(|| Utc::now().timestamp_millis(), |t| t.snapshot.timestamp);

    let strategy = SignalFollower::new(config.agent.min_expected_value);
    let pipeline = DecisionPipeline::new(
        config.agent.clone(),
        config.detection_config(),
        Box::new(strategy),
        ledger,
        start,
    );

    let mut runner = AgentRunner::new(pipeline).with_paper_fills(paper);
    if config.reputation.enabled {
        let client = HttpReputationClient::from_config(&config.reputation)?;
        runner = runner.with_reputation(ReputationGate::from_config(
            Arc::new(client),
            &config.reputation,
        ));
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current tick");
            let _ = stop_tx.send(true);
        }
    });

    let (tick_tx, tick_rx) = mpsc::channel::<Tick>(64);
    let reader = tokio::spawn(async move {
        let mut next = first;
        while let Some(tick) = next {
            if tick_tx.send(tick).await.is_err() {
                break;
            }
            next = ticks.next_tick().await?;
        }
        Ok::<usize, std::io::Error>(ticks.lines_read())
    });

    let summary = runner.run(tick_rx, stop_rx).await;
    match reader.await {
        Ok(Ok(lines)) => info!(lines, "Tick file read"),
        Ok(Err(e)) => error!(error = %e, "Tick file read failed"),
        Err(e) => error!(error = %e, "Tick reader task panicked"),
    }

    let pipeline = runner.into_pipeline();
    let ledger = pipeline.ledger();
    info!(
        entries = ledger.len(),
        merkle_root = %ledger.merkle_root(),
        equity = %pipeline.portfolio().equity(),
        concentration = pipeline.concentration_risk(),
        "Run complete"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("merkle_root: {}", ledger.merkle_root());

    // The pipeline's ledger holds a sender clone; it must go before the flusher drains
    drop(pipeline);
    if let Some(f) = flusher {
        let stats = f.shutdown().await?;
        if stats.unwritten > 0 {
            bail!("{} audit entries could not be persisted", stats.unwritten);
        }
    }
    Ok(())
}

async fn verify(config: &AppConfig, ledger_path: &Path) -> Result<()> {
    let entries = load_trail(ledger_path).await?;
    let signer = signer(config)?;
    let report = AuditLedger::verify_trail(&entries, signer.as_ref());

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.valid {
        for issue in &report.issues {
            warn!(index = issue.index, kind = ?issue.kind, "{}", issue.detail);
        }
        bail!("audit trail failed verification with {} issue(s)", report.issues.len());
    }
    info!(entries = report.entries, merkle_root = %report.merkle_root, "Audit trail verified");
    Ok(())
}
