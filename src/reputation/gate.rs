//! Timeout and retry wrapper around a reputation client

use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use super::{ReputationClient, ReputationVerdict};
use crate::config::ReputationConfig;
use crate::retry::{retry_async, RetryConfig};

pub struct ReputationGate {
    client: Arc<dyn ReputationClient>,
    timeout: Duration,
    retry: RetryConfig,
}

impl ReputationGate {
    pub fn new(client: Arc<dyn ReputationClient>, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            client,
            timeout,
            retry,
        }
    }

    pub fn from_config(client: Arc<dyn ReputationClient>, config: &ReputationConfig) -> Self {
        Self::new(
            client,
            Duration::from_millis(config.timeout_ms),
            RetryConfig::new(config.max_retries, 100),
        )
    }

    /// Look up an address. Never fails: a lookup that cannot complete
    /// within the retry budget is reported as unverified.
    pub async fn check(&self, address: &str) -> ReputationVerdict {
        let per_attempt = self.timeout;
        let result = retry_async(&self.retry, "reputation_check", || {
            let client = self.client.clone();
            let address = address.to_string();
            async move {
                timeout(per_attempt, client.check_address(&address))
                    .await
                    .map_err(|_| anyhow!("timed out after {:?}", per_attempt))?
            }
        })
        .await;

        match result {
            Ok(check) if check.allowed => ReputationVerdict::Allowed,
            Ok(check) => {
                let reason = check
                    .reason
                    .unwrap_or_else(|| "address flagged by reputation service".to_string());
                info!(address, %reason, "Counterparty denied");
                ReputationVerdict::Denied { reason }
            }
            Err(e) => {
                warn!(address, error = %e, "Reputation lookup failed, continuing unverified");
                ReputationVerdict::Unverified {
                    warning: format!("counterparty {} unverified: {}", address, e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{AddressCheck, MockReputationClient};
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn test_allowed_and_denied() {
        let mut mock = MockReputationClient::new();
        mock.expect_check_address()
            .withf(|a| a == "0xgood")
            .returning(|_| Ok(AddressCheck { allowed: true, reason: None }));
        mock.expect_check_address()
            .withf(|a| a == "0xbad")
            .returning(|_| {
                Ok(AddressCheck {
                    allowed: false,
                    reason: Some("known wash trader".into()),
                })
            });
        let gate = ReputationGate::new(Arc::new(mock), Duration::from_secs(1), fast_retry(0));

        assert_eq!(gate.check("0xgood").await, ReputationVerdict::Allowed);
        assert_eq!(
            gate.check("0xbad").await,
            ReputationVerdict::Denied {
                reason: "known wash trader".into()
            }
        );
    }

    #[tokio::test]
    async fn test_failure_degrades_to_unverified_after_retries() {
        let mut mock = MockReputationClient::new();
        mock.expect_check_address()
            .times(3)
            .returning(|_| Err(anyhow!("connection refused")));
        let gate = ReputationGate::new(Arc::new(mock), Duration::from_secs(1), fast_retry(2));

        let verdict = gate.check("0xabc").await;
        assert!(matches!(verdict, ReputationVerdict::Unverified { .. }));
        assert!(!verdict.is_denied());
    }

    struct SlowClient;

    #[async_trait]
    impl ReputationClient for SlowClient {
        async fn check_address(&self, _address: &str) -> Result<AddressCheck> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(AddressCheck { allowed: true, reason: None })
        }
    }

    #[tokio::test]
    async fn test_timeout_never_blocks() {
        let gate = ReputationGate::new(Arc::new(SlowClient), Duration::from_millis(10), fast_retry(1));
        let verdict = gate.check("0xslow").await;
        match verdict {
            ReputationVerdict::Unverified { warning } => assert!(warning.contains("timed out")),
            other => panic!("expected unverified, got {:?}", other),
        }
    }
}
