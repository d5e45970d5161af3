//! Asynchronous, batched ledger persistence
//!
//! The ledger forwards each recorded entry over a channel; a background task
//! groups entries into batches and writes them through a [`LedgerSink`].
//! A batch that keeps failing stays at the head of the queue, so entries
//! reach storage in the order they were recorded or not at all.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::ledger::AuditEntry;
use crate::config::LedgerConfig;
use crate::retry::RetryConfig;

/// Destination for flushed entries
#[async_trait]
pub trait LedgerSink: Send {
    /// Persist a batch; must be all-or-nothing from the caller's view
    async fn write_batch(&mut self, entries: &[AuditEntry]) -> Result<()>;
}

/// Appends entries as JSON lines
pub struct JsonlFileSink {
    path: PathBuf,
    file: Option<File>,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    async fn file(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .with_context(|| format!("Failed to open ledger file {}", self.path.display()))?;
            self.file = Some(file);
        }
        self.file.as_mut().context("ledger file not open")
    }
}

#[async_trait]
impl LedgerSink for JsonlFileSink {
    async fn write_batch(&mut self, entries: &[AuditEntry]) -> Result<()> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry).context("Failed to serialize audit entry")?;
            buf.push(b'\n');
        }
        let result = async {
            let file = self.file().await?;
            file.write_all(&buf).await?;
            file.flush().await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        if result.is_err() {
            // Reopen on the next attempt
            self.file = None;
        }
        result
    }
}

/// Flusher tuning
#[derive(Debug, Clone)]
pub struct FlushConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry: RetryConfig,
}

impl From<&LedgerConfig> for FlushConfig {
    fn from(cfg: &LedgerConfig) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            flush_interval: Duration::from_millis(cfg.flush_interval_ms.max(1)),
            retry: RetryConfig::new(cfg.max_retries, cfg.retry_base_delay_ms),
        }
    }
}

/// Totals reported when the flusher stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub written: usize,
    pub batches: usize,
    pub failed_attempts: usize,
    /// Entries still unwritten at shutdown
    pub unwritten: usize,
}

/// Handle to a running flusher task
pub struct LedgerFlusher {
    sender: mpsc::UnboundedSender<AuditEntry>,
    handle: JoinHandle<FlushStats>,
}

impl LedgerFlusher {
    /// Spawn the background task on the current runtime
    pub fn spawn<S: LedgerSink + 'static>(sink: S, config: FlushConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_flusher(sink, config, receiver));
        Self { sender, handle }
    }

    /// Sender to attach to an [`AuditLedger`](super::AuditLedger)
    pub fn sender(&self) -> mpsc::UnboundedSender<AuditEntry> {
        self.sender.clone()
    }

    /// Stop accepting entries, flush what is queued and wait for the task.
    /// Every other sender clone must be dropped first.
    pub async fn shutdown(self) -> Result<FlushStats> {
        drop(self.sender);
        self.handle.await.context("Ledger flusher task panicked")
    }
}

async fn write_with_retry<S: LedgerSink>(
    sink: &mut S,
    batch: &[AuditEntry],
    retry: &RetryConfig,
    stats: &mut FlushStats,
) -> bool {
    for attempt in 0..=retry.max_retries {
        match sink.write_batch(batch).await {
            Ok(()) => {
                stats.written += batch.len();
                stats.batches += 1;
                debug!(entries = batch.len(), "Ledger batch flushed");
                return true;
            }
            Err(e) => {
                stats.failed_attempts += 1;
                if attempt < retry.max_retries {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(attempt = attempt + 1, error = %e, ?delay, "Ledger flush failed, retrying");
                    sleep(delay).await;
                } else {
                    error!(entries = batch.len(), error = %e, "Ledger flush failed, keeping batch queued");
                }
            }
        }
    }
    false
}

/// Write queued entries in order, one batch at a time.
/// Returns false when a batch could not be written.
async fn drain<S: LedgerSink>(
    sink: &mut S,
    queue: &mut Vec<AuditEntry>,
    config: &FlushConfig,
    stats: &mut FlushStats,
) -> bool {
    while !queue.is_empty() {
        let n = queue.len().min(config.batch_size);
        if !write_with_retry(sink, &queue[..n], &config.retry, stats).await {
            return false;
        }
        queue.drain(..n);
    }
    true
}

async fn run_flusher<S: LedgerSink>(
    mut sink: S,
    config: FlushConfig,
    mut receiver: mpsc::UnboundedReceiver<AuditEntry>,
) -> FlushStats {
    let mut stats = FlushStats::default();
    let mut queue: Vec<AuditEntry> = Vec::new();
    let mut ticker = interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(entry) => {
                    queue.push(entry);
                    if queue.len() >= config.batch_size {
                        drain(&mut sink, &mut queue, &config, &mut stats).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !queue.is_empty() {
                    drain(&mut sink, &mut queue, &config, &mut stats).await;
                }
            }
        }
    }

    drain(&mut sink, &mut queue, &config, &mut stats).await;
    stats.unwritten = queue.len();
    if stats.unwritten > 0 {
        error!(unwritten = stats.unwritten, "Ledger flusher stopped with unwritten entries");
    } else {
        info!(written = stats.written, batches = stats.batches, "Ledger flusher stopped");
    }
    stats
}

/// Read a persisted JSON-lines trail
pub async fn load_trail(path: &Path) -> Result<Vec<AuditEntry>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read ledger file {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid audit entry on line {}", i + 1))
        })
        .collect()
}
