//! Pre-signed upload URLs.
//!
//! A URL authorizes a single `PUT` of one key until its expiry. The
//! signature is HMAC-SHA256 over the method, object path and expiry.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use super::StoreError;
use crate::key::ArtifactKey;

type HmacSha256 = Hmac<Sha256>;

/// A signed upload URL and what it grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUpload {
    pub key: ArtifactKey,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies upload URLs for one namespace.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    base_url: String,
    namespace: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    /// Create a signer with an explicit secret.
    pub fn new(secret: Vec<u8>, base_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            secret,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            namespace: namespace.into(),
        }
    }

    /// Create a signer with a random secret, valid for this process only.
    pub fn ephemeral(base_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(secret, base_url, namespace)
    }

    fn mac(&self, key: &ArtifactKey, expires: i64) -> Result<HmacSha256, StoreError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| StoreError::Signing("failed to initialize hmac".to_string()))?;
        mac.update(b"PUT\n");
        mac.update(self.namespace.as_bytes());
        mac.update(b"/");
        mac.update(key.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Sign an upload of `key` valid for `ttl` from `now`.
    pub fn sign_at(&self, key: &ArtifactKey, ttl: Duration, now: DateTime<Utc>) -> Result<SignedUpload, StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Signing(format!("invalid ttl: {}", e)))?;
        let expires_at = now + ttl;
        let expires = expires_at.timestamp();
        let sig = URL_SAFE_NO_PAD.encode(self.mac(key, expires)?.finalize().into_bytes());
        let url = format!(
            "{}/{}/{}?expires={}&sig={}",
            self.base_url, self.namespace, key, expires, sig
        );
        Ok(SignedUpload {
            key: key.clone(),
            url,
            expires_at,
        })
    }

    /// Sign an upload of `key` valid for `ttl` from now.
    pub fn sign(&self, key: &ArtifactKey, ttl: Duration) -> Result<SignedUpload, StoreError> {
        self.sign_at(key, ttl, Utc::now())
    }

    /// Check a presented signature. Comparison is constant-time.
    pub fn verify(&self, key: &ArtifactKey, expires: i64, sig: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let Ok(presented) = URL_SAFE_NO_PAD.decode(sig) else {
            return false;
        };
        match self.mac(key, expires) {
            Ok(mac) => mac.verify_slice(&presented).is_ok(),
            Err(_) => false,
        }
    }
}
