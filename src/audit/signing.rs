//! HMAC-SHA256 signatures over entry hashes

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs entry hashes with a shared secret
#[derive(Clone)]
pub struct HmacSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HmacSigner(..)")
    }
}

impl HmacSigner {
    pub fn new(key: &[u8]) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(key).context("Failed to initialize HMAC")?;
        Ok(Self { mac })
    }

    /// Key given as url-safe base64, or used as raw bytes when it does not decode
    pub fn from_secret(secret: &str) -> Result<Self> {
        let key = general_purpose::URL_SAFE_NO_PAD
            .decode(secret)
            .or_else(|_| general_purpose::URL_SAFE.decode(secret))
            .unwrap_or_else(|_| secret.as_bytes().to_vec());
        Self::new(&key)
    }

    /// Base64 signature of a hex entry hash
    pub fn sign(&self, hash: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(hash.as_bytes());
        general_purpose::URL_SAFE.encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a signature against a hash
    pub fn verify(&self, hash: &str, signature: &str) -> bool {
        let Ok(sig) = general_purpose::URL_SAFE.decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(hash.as_bytes());
        mac.verify_slice(&sig).is_ok()
    }
}
