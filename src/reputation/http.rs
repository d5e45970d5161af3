//! HTTP reputation client with a TTL cache

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{AddressCheck, ReputationClient};
use crate::config::ReputationConfig;

/// Queries `GET {base_url}/v1/address/{address}`.
/// The cache sits behind a mutex so one client can serve several pipelines.
pub struct HttpReputationClient {
    client: Client,
    base_url: String,
    ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, AddressCheck)>>,
}

impl HttpReputationClient {
    pub fn new(base_url: &str, request_timeout: Duration, ttl: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ttl,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &ReputationConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            Duration::from_millis(config.timeout_ms),
            Duration::from_millis(config.cache_ttl_ms),
        )
    }

    fn cached(&self, address: &str) -> Option<AddressCheck> {
        let mut cache = self.cache.lock().ok()?;
        match cache.get(address) {
            Some((at, check)) if at.elapsed() < self.ttl => Some(check.clone()),
            Some(_) => {
                cache.remove(address);
                None
            }
            None => None,
        }
    }

    fn store(&self, address: &str, check: &AddressCheck) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.retain(|_, (at, _)| at.elapsed() < self.ttl);
            cache.insert(address.to_string(), (Instant::now(), check.clone()));
        }
    }
}

#[async_trait]
impl ReputationClient for HttpReputationClient {
    async fn check_address(&self, address: &str) -> Result<AddressCheck> {
        if let Some(check) = self.cached(address) {
            debug!(address, "Reputation cache hit");
            return Ok(check);
        }

        let url = format!("{}/v1/address/{}", self.base_url, address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Reputation request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Reputation service returned {}", status);
        }

        let check: AddressCheck = response
            .json()
            .await
            .context("Failed to parse reputation response")?;
        self.store(address, &check);
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_honours_ttl() {
        let client =
            HttpReputationClient::new("http://localhost:1/", Duration::from_secs(1), Duration::from_secs(60))
                .unwrap();
        assert_eq!(client.base_url, "http://localhost:1");
        let check = AddressCheck {
            allowed: true,
            reason: None,
        };
        client.store("0xa", &check);
        assert_eq!(client.cached("0xa"), Some(check));
        assert_eq!(client.cached("0xb"), None);

        let expired =
            HttpReputationClient::new("http://localhost:1", Duration::from_secs(1), Duration::ZERO)
                .unwrap();
        expired.store(
            "0xa",
            &AddressCheck {
                allowed: false,
                reason: Some("sanctioned".into()),
            },
        );
        assert_eq!(expired.cached("0xa"), None);
    }
}
