//! Oracle Monitor - health and consensus across named price sources
//!
//! Each source reports its latest price. A source is active while it is
//! fresh and close to the mean of the other known sources; the consensus
//! price is the median of active sources with a confidence score based on
//! how tightly they agree.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Oracle monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Sources expected to report
    pub sources: Vec<String>,
    /// Maximum age of a source price (ms)
    pub max_staleness_ms: i64,
    /// Maximum relative deviation from the other sources' mean
    pub max_deviation: f64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            max_staleness_ms: 60_000,
            max_deviation: 0.02,
        }
    }
}

/// Last known state of a single source
#[derive(Debug, Clone, PartialEq)]
struct SourceState {
    price: f64,
    updated_at: i64,
    /// Relative deviation from the mean of the other known sources
    deviation: f64,
}

/// Point-in-time view of a source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub price: f64,
    pub staleness_ms: i64,
    pub deviation: f64,
    pub active: bool,
}

/// Median of active sources
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusPrice {
    pub price: f64,
    /// `max(0, 1 - 10 * mean deviation from median)`
    pub confidence: f64,
    pub active_sources: Vec<String>,
}

/// Health check result, one issue per violating source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleHealth {
    pub healthy: bool,
    pub issues: Vec<String>,
}

impl OracleHealth {
    /// Issues joined for use as a rejection reason
    pub fn summary(&self) -> String {
        self.issues.join("; ")
    }
}

/// Multi-source oracle monitor
#[derive(Debug, Clone)]
pub struct OracleMonitor {
    config: OracleConfig,
    sources: HashMap<String, SourceState>,
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

impl OracleMonitor {
    pub fn new(config: OracleConfig) -> Self {
        Self {
            config,
            sources: HashMap::new(),
        }
    }

    /// Record a price from a source and refresh every source's deviation
    pub fn update(&mut self, source: &str, price: f64, now: i64) {
        if !(price > 0.0) || !price.is_finite() {
            warn!(source, price, "Ignoring invalid oracle price");
            return;
        }
        if !self.config.sources.iter().any(|s| s == source) {
            debug!(source, "Price from unconfigured oracle source");
        }

        self.sources.insert(
            source.to_string(),
            SourceState {
                price,
                updated_at: now,
                deviation: 0.0,
            },
        );
        self.refresh_deviations();
    }

    fn refresh_deviations(&mut self) {
        let total: f64 = self.sources.values().map(|s| s.price).sum();
        let count = self.sources.len();
        for state in self.sources.values_mut() {
            state.deviation = if count > 1 {
                let mean_others = (total - state.price) / (count - 1) as f64;
                if mean_others > 0.0 {
                    (state.price - mean_others).abs() / mean_others
                } else {
                    0.0
                }
            } else {
                0.0
            };
        }
    }

    fn is_active(&self, state: &SourceState, now: i64) -> bool {
        now - state.updated_at < self.config.max_staleness_ms
            && state.deviation < self.config.max_deviation
    }

    /// Status of every source that has reported, sorted by name
    pub fn source_status(&self, now: i64) -> Vec<SourceStatus> {
        let mut out: Vec<SourceStatus> = self
            .sources
            .iter()
            .map(|(name, s)| SourceStatus {
                name: name.clone(),
                price: s.price,
                staleness_ms: now - s.updated_at,
                deviation: s.deviation,
                active: self.is_active(s, now),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Median of active sources, `None` when no source is active
    pub fn consensus(&self, now: i64) -> Option<ConsensusPrice> {
        let mut active: Vec<(&String, f64)> = self
            .sources
            .iter()
            .filter(|(_, s)| self.is_active(s, now))
            .map(|(name, s)| (name, s.price))
            .collect();
        if active.is_empty() {
            return None;
        }
        active.sort_by(|a, b| a.1.total_cmp(&b.1));

        let prices: Vec<f64> = active.iter().map(|(_, p)| *p).collect();
        let mid = median(&prices);
        let mean_dev = if mid > 0.0 {
            prices.iter().map(|p| (p - mid).abs() / mid).sum::<f64>() / prices.len() as f64
        } else {
            0.0
        };

        let mut active_sources: Vec<String> = active.iter().map(|(n, _)| (*n).clone()).collect();
        active_sources.sort();

        Some(ConsensusPrice {
            price: mid,
            confidence: (1.0 - 10.0 * mean_dev).max(0.0),
            active_sources,
        })
    }

    /// Check every configured source for missing data, staleness and deviation
    pub fn health(&self, now: i64) -> OracleHealth {
        let mut issues = Vec::new();

        for name in &self.config.sources {
            match self.sources.get(name) {
                None => issues.push(format!("{}: no price data", name)),
                Some(state) => {
                    let age = now - state.updated_at;
                    if age >= self.config.max_staleness_ms {
                        issues.push(format!(
                            "{}: stale price ({}ms old, max {}ms)",
                            name, age, self.config.max_staleness_ms
                        ));
                    }
                    if state.deviation >= self.config.max_deviation {
                        issues.push(format!(
                            "{}: deviation {:.2}% exceeds {:.2}%",
                            name,
                            state.deviation * 100.0,
                            self.config.max_deviation * 100.0
                        ));
                    }
                }
            }
        }

        OracleHealth {
            healthy: issues.is_empty(),
            issues,
        }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(sources: &[&str]) -> OracleMonitor {
        OracleMonitor::new(OracleConfig {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            max_staleness_ms: 5_000,
            max_deviation: 0.02,
        })
    }

    #[test]
    fn test_consensus_is_median_of_agreeing_sources() {
        let mut m = monitor(&["a", "b", "c"]);
        m.update("a", 100.0, 0);
        m.update("b", 101.0, 0);
        m.update("c", 99.5, 0);

        let c = m.consensus(1_000).unwrap();
        assert_eq!(c.price, 100.0);
        assert_eq!(c.active_sources.len(), 3);
        // mean dev = (0 + 0.01 + 0.005) / 3 = 0.005 -> confidence 0.95
        assert!((c.confidence - 0.95).abs() < 1e-9);
        assert!(m.health(1_000).healthy);
    }

    #[test]
    fn test_outlier_excluded_and_reported() {
        let mut m = monitor(&["a", "b", "c", "d", "e"]);
        for s in ["a", "b", "c", "d"] {
            m.update(s, 100.0, 0);
        }
        // 3% off the others' mean of 100; each honest source sits ~0.74% off
        m.update("e", 103.0, 0);

        let c = m.consensus(0).unwrap();
        assert_eq!(c.active_sources, vec!["a", "b", "c", "d"]);
        assert_eq!(c.price, 100.0);
        assert_eq!(c.confidence, 1.0);

        let health = m.health(0);
        assert!(!health.healthy);
        assert_eq!(health.issues.len(), 1);
        assert!(health.issues[0].starts_with("e: deviation"));
    }

    #[test]
    fn test_missing_and_stale_sources() {
        let mut m = monitor(&["a", "b"]);
        m.update("a", 100.0, 0);

        let health = m.health(6_000);
        assert!(!health.healthy);
        assert_eq!(health.issues.len(), 2);
        assert!(health.issues[0].contains("stale"));
        assert!(health.issues[1].contains("no price data"));
        assert!(m.consensus(6_000).is_none());
    }

    #[test]
    fn test_invalid_price_ignored() {
        let mut m = monitor(&["a"]);
        m.update("a", -1.0, 0);
        m.update("a", f64::NAN, 0);
        assert!(m.source_status(0).is_empty());
    }

    #[test]
    fn test_single_source_has_no_deviation() {
        let mut m = monitor(&["a"]);
        m.update("a", 42.0, 0);
        let status = m.source_status(10);
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].deviation, 0.0);
        assert!(status[0].active);
    }
}
