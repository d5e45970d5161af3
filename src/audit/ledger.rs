//! Audit Ledger - append-only, hash-linked record of pipeline outcomes
//!
//! Each entry is hashed over the canonical JSON of (type, agent, payload,
//! timestamp). Object keys serialize in sorted order, so the same entry
//! always produces the same bytes. Entry hashes are the leaves of a Merkle
//! tree whose root can be anchored externally.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::signing::HmacSigner;
use crate::error::LedgerError;

/// Root of an empty ledger
pub const EMPTY_ROOT: [u8; 32] = [0u8; 32];

/// One immutable ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "type")]
    pub event_type: String,
    pub agent: String,
    pub payload: Value,
    pub timestamp: i64,
    /// Hex SHA-256 of the canonical content
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Serialize)]
struct HashedContent<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    agent: &'a str,
    payload: &'a Value,
    timestamp: i64,
}

fn content_digest(
    event_type: &str,
    agent: &str,
    payload: &Value,
    timestamp: i64,
) -> Result<[u8; 32], serde_json::Error> {
    let bytes = serde_json::to_vec(&HashedContent {
        event_type,
        agent,
        payload,
        timestamp,
    })?;
    Ok(Sha256::digest(&bytes).into())
}

impl AuditEntry {
    /// Recompute the content hash; `None` if the payload cannot be serialized
    pub fn compute_hash(&self) -> Option<String> {
        content_digest(&self.event_type, &self.agent, &self.payload, self.timestamp)
            .ok()
            .map(hex::encode)
    }

    /// Whether the stored hash matches the content
    pub fn is_intact(&self) -> bool {
        self.compute_hash().as_deref() == Some(self.hash.as_str())
    }
}

/// Combine leaves pairwise until one root remains. An unmatched last leaf
/// is paired with itself.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return EMPTY_ROOT;
    }
    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut hasher = Sha256::new();
                hasher.update(left);
                hasher.update(right);
                hasher.finalize().into()
            })
            .collect();
    }
    level[0]
}

/// Kind of integrity problem found in a trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HashMismatch,
    BadSignature,
    /// Unsigned entry in a trail verified with a signer
    MissingSignature,
    OutOfOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailIssue {
    pub index: usize,
    pub kind: IssueKind,
    pub detail: String,
}

/// Result of re-verifying a persisted trail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailReport {
    pub valid: bool,
    pub entries: usize,
    /// Hex Merkle root over the stored hashes
    pub merkle_root: String,
    pub issues: Vec<TrailIssue>,
}

/// Append-only ledger owned by one pipeline
pub struct AuditLedger {
    agent_id: String,
    entries: Vec<AuditEntry>,
    leaves: Vec<[u8; 32]>,
    signer: Option<HmacSigner>,
    last_timestamp: Option<i64>,
    /// Recorded entries are forwarded here for asynchronous persistence
    sink: Option<mpsc::UnboundedSender<AuditEntry>>,
}

impl AuditLedger {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            entries: Vec::new(),
            leaves: Vec::new(),
            signer: None,
            last_timestamp: None,
            sink: None,
        }
    }

    pub fn with_signer(mut self, signer: HmacSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Forward every subsequently recorded entry to a flusher
    pub fn attach_sink(&mut self, sink: mpsc::UnboundedSender<AuditEntry>) {
        self.sink = Some(sink);
    }

    /// Append an entry, stamping the current time when `timestamp` is absent.
    /// Timestamps must not go backwards within one ledger.
    pub fn record(
        &mut self,
        event_type: &str,
        payload: Value,
        timestamp: Option<i64>,
    ) -> Result<&AuditEntry, LedgerError> {
        let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Err(LedgerError::OutOfOrder { timestamp, last });
            }
        }

        let digest = content_digest(event_type, &self.agent_id, &payload, timestamp)?;
        let hash = hex::encode(digest);
        let signature = self.signer.as_ref().map(|s| s.sign(&hash));

        let entry = AuditEntry {
            event_type: event_type.to_string(),
            agent: self.agent_id.clone(),
            payload,
            timestamp,
            hash,
            signature,
        };

        if let Some(sink) = &self.sink {
            if sink.send(entry.clone()).is_err() {
                warn!("Ledger flusher has stopped, entry kept in memory only");
                self.sink = None;
            }
        }

        debug!(event = event_type, hash = %entry.hash, "Audit entry recorded");
        self.leaves.push(digest);
        self.entries.push(entry);
        self.last_timestamp = Some(timestamp);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Whether an entry's hash still matches its content
    pub fn verify(&self, entry: &AuditEntry) -> bool {
        entry.is_intact()
    }

    /// Hex Merkle root over every recorded entry
    pub fn merkle_root(&self) -> String {
        hex::encode(merkle_root(&self.leaves))
    }

    /// Re-verify a trail: hashes, signatures (when a signer is given) and ordering
    pub fn verify_trail(entries: &[AuditEntry], signer: Option<&HmacSigner>) -> TrailReport {
        let mut issues = Vec::new();
        let mut leaves = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            match entry.compute_hash() {
                Some(h) if h == entry.hash => {}
                Some(h) => issues.push(TrailIssue {
                    index,
                    kind: IssueKind::HashMismatch,
                    detail: format!("stored {} but content hashes to {}", entry.hash, h),
                }),
                None => issues.push(TrailIssue {
                    index,
                    kind: IssueKind::HashMismatch,
                    detail: "payload cannot be serialized".to_string(),
                }),
            }

            if let Some(signer) = signer {
                match entry.signature.as_deref() {
                    Some(sig) if signer.verify(&entry.hash, sig) => {}
                    Some(_) => issues.push(TrailIssue {
                        index,
                        kind: IssueKind::BadSignature,
                        detail: "signature does not match hash".to_string(),
                    }),
                    None => issues.push(TrailIssue {
                        index,
                        kind: IssueKind::MissingSignature,
                        detail: "entry carries no signature".to_string(),
                    }),
                }
            }

            if index > 0 && entry.timestamp < entries[index - 1].timestamp {
                issues.push(TrailIssue {
                    index,
                    kind: IssueKind::OutOfOrder,
                    detail: format!(
                        "timestamp {} precedes previous {}",
                        entry.timestamp,
                        entries[index - 1].timestamp
                    ),
                });
            }

            let mut leaf = [0u8; 32];
            if hex::decode_to_slice(&entry.hash, &mut leaf).is_err() {
                leaf = Sha256::digest(entry.hash.as_bytes()).into();
            }
            leaves.push(leaf);
        }

        TrailReport {
            valid: issues.is_empty(),
            entries: entries.len(),
            merkle_root: hex::encode(merkle_root(&leaves)),
            issues,
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ledger_with(n: i64) -> AuditLedger {
        let mut ledger = AuditLedger::new("agent-1");
        for i in 0..n {
            ledger
                .record("decision", json!({ "seq": i, "market": "m" }), Some(1_000 + i))
                .unwrap();
        }
        ledger
    }

    #[test]
    fn test_verify_detects_payload_mutation() {
        let ledger = ledger_with(3);
        let mut entry = ledger.entries()[1].clone();
        assert!(ledger.verify(&entry));

        entry.payload = json!({ "seq": 99, "market": "m" });
        assert!(!ledger.verify(&entry));
    }

    #[test]
    fn test_merkle_root_deterministic() {
        let a = ledger_with(5);
        let b = ledger_with(5);
        assert_eq!(a.merkle_root(), b.merkle_root());
        assert_ne!(a.merkle_root(), ledger_with(4).merkle_root());
        assert_eq!(AuditLedger::new("x").merkle_root(), hex::encode(EMPTY_ROOT));
    }

    #[test]
    fn test_merkle_root_changes_with_any_leaf() {
        let ledger = ledger_with(3);
        let mut leaves = ledger.leaves.clone();
        let original = merkle_root(&leaves);
        leaves[2][0] ^= 1;
        assert_ne!(merkle_root(&leaves), original);
    }

    #[test]
    fn test_odd_leaf_is_duplicated() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));
        assert_eq!(merkle_root(&[a]), a);
    }

    #[test]
    fn test_record_rejects_backwards_time() {
        let mut ledger = ledger_with(2);
        let err = ledger.record("decision", json!({}), Some(500)).unwrap_err();
        assert!(matches!(err, LedgerError::OutOfOrder { timestamp: 500, last: 1_001 }));
        assert_eq!(ledger.len(), 2);
        // Equal timestamps are allowed
        assert!(ledger.record("decision", json!({}), Some(1_001)).is_ok());
    }

    #[test]
    fn test_verify_trail_flags_issues() {
        let signer = HmacSigner::new(b"secret").unwrap();
        let mut ledger = AuditLedger::new("agent-1").with_signer(signer.clone());
        for ts in [10, 20, 30] {
            ledger.record("decision", json!({ "ts": ts }), Some(ts)).unwrap();
        }

        let clean = AuditLedger::verify_trail(ledger.entries(), Some(&signer));
        assert!(clean.valid);
        assert_eq!(clean.merkle_root, ledger.merkle_root());

        let mut trail = ledger.entries().to_vec();
        trail.swap(1, 2);
        trail[0].signature = Some(HmacSigner::new(b"wrong").unwrap().sign(&trail[0].hash));
        let report = AuditLedger::verify_trail(&trail, Some(&signer));
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.index == 0 && i.kind == IssueKind::BadSignature));
        assert!(report
            .issues
            .iter()
            .any(|i| i.index == 2 && i.kind == IssueKind::OutOfOrder));
    }

    #[test]
    fn test_stripped_signature_fails_signed_verification() {
        let signer = HmacSigner::new(b"secret").unwrap();
        let mut ledger = AuditLedger::new("agent-1").with_signer(signer.clone());
        for ts in [10, 20] {
            ledger.record("decision", json!({ "amount": "500" }), Some(ts)).unwrap();
        }

        // Rewrite the payload, recompute a consistent hash and drop the signature
        let mut trail = ledger.entries().to_vec();
        trail[1].payload = json!({ "amount": "5000" });
        trail[1].hash = trail[1].compute_hash().unwrap();
        trail[1].signature = None;

        let report = AuditLedger::verify_trail(&trail, Some(&signer));
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].index, 1);
        assert_eq!(report.issues[0].kind, IssueKind::MissingSignature);

        // Without a signer only hashes and order are checked
        assert!(AuditLedger::verify_trail(&trail, None).valid);
    }

    #[test]
    fn test_entries_forwarded_to_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ledger = AuditLedger::new("agent-1");
        ledger.attach_sink(tx);
        ledger.record("decision", json!({}), Some(1)).unwrap();
        let forwarded = rx.try_recv().unwrap();
        assert_eq!(forwarded, ledger.entries()[0]);
    }
}
