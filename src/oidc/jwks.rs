//! Signing key resolution from the identity provider's JWKS.
//!
//! Keys are indexed by `kid` and swapped wholesale on refresh, so readers
//! never observe a half-built key set. An unknown `kid` triggers at most one
//! throttled refresh before the token is rejected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Minimum spacing between refreshes forced by unknown key ids
const FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Failures while obtaining signing keys
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// Network or decode error while fetching the key set
    #[error("JWKS fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("JWKS endpoint returned HTTP {0}")]
    Status(u16),

    /// The key set held no key usable for signature verification
    #[error("JWKS contains no usable signing keys")]
    NoUsableKeys,
}

/// Maps a key id to the public key that verifies it.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Find the verification key for `kid`; `None` means reject.
    async fn resolve(&self, kid: &str) -> Option<DecodingKey>;
}

struct JwksSource {
    url: String,
    http: reqwest::Client,
}

/// Key resolver backed by a JWKS document
pub struct JwksKeyResolver {
    keys: RwLock<Arc<HashMap<String, DecodingKey>>>,
    source: Option<JwksSource>,
    last_forced: Mutex<Option<Instant>>,
}

impl JwksKeyResolver {
    /// Build a static resolver from an already parsed key set.
    pub fn from_jwk_set(jwks: &JwkSet) -> Self {
        Self {
            keys: RwLock::new(Arc::new(keys_from_set(jwks))),
            source: None,
            last_forced: Mutex::new(None),
        }
    }

    /// Fetch the key set from `url` and keep the source for later refreshes.
    pub async fn fetch(url: &str, http: reqwest::Client) -> Result<Self, JwksError> {
        if !url.starts_with("https://") {
            warn!(url = %url, "JWKS endpoint is not HTTPS");
        }
        let source = JwksSource {
            url: url.to_string(),
            http,
        };
        let keys = source.load().await?;
        if keys.is_empty() {
            return Err(JwksError::NoUsableKeys);
        }
        info!(url = %url, keys = keys.len(), "Loaded signing keys");
        Ok(Self {
            keys: RwLock::new(Arc::new(keys)),
            source: Some(source),
            last_forced: Mutex::new(None),
        })
    }

    /// Re-fetch the key set and swap it in. A failed fetch keeps the old keys.
    pub async fn refresh(&self) -> Result<usize, JwksError> {
        let Some(source) = &self.source else {
            return Ok(self.len());
        };
        let keys = source.load().await?;
        if keys.is_empty() {
            return Err(JwksError::NoUsableKeys);
        }
        let count = keys.len();
        *self.keys.write() = Arc::new(keys);
        debug!(keys = count, "Refreshed signing keys");
        Ok(count)
    }

    /// Number of usable keys
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether no key is loaded
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    fn lookup(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().get(kid).cloned()
    }

    fn may_force_refresh(&self) -> bool {
        if self.source.is_none() {
            return false;
        }
        let mut last = self.last_forced.lock();
        let allowed = last.is_none_or(|at| at.elapsed() >= FORCED_REFRESH_INTERVAL);
        if allowed {
            *last = Some(Instant::now());
        }
        allowed
    }
}

#[async_trait]
impl KeyResolver for JwksKeyResolver {
    async fn resolve(&self, kid: &str) -> Option<DecodingKey> {
        if let Some(key) = self.lookup(kid) {
            return Some(key);
        }
        if !self.may_force_refresh() {
            return None;
        }

        debug!(kid = %kid, "Unknown key id, refreshing JWKS");
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "JWKS refresh on unknown key id failed");
            return None;
        }
        self.lookup(kid)
    }
}

impl JwksSource {
    async fn load(&self) -> Result<HashMap<String, DecodingKey>, JwksError> {
        let resp = self.http.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(JwksError::Status(resp.status().as_u16()));
        }
        let jwks: JwkSet = resp.json().await?;
        Ok(keys_from_set(&jwks))
    }
}

/// Index the verification keys in `jwks` by `kid`.
///
/// Keys without a `kid` and symmetric keys are skipped: a shared secret must
/// never be accepted as a verification key.
fn keys_from_set(jwks: &JwkSet) -> HashMap<String, DecodingKey> {
    let mut keys = HashMap::new();
    for jwk in &jwks.keys {
        let Some(kid) = jwk.common.key_id.as_deref() else {
            continue;
        };
        let key = match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKeyPair(okp) => DecodingKey::from_ed_components(&okp.x).ok(),
            AlgorithmParameters::OctetKey(_) => None,
        };
        match key {
            Some(key) => {
                keys.insert(kid.to_string(), key);
            }
            None => debug!(kid = %kid, "Skipping JWK unusable for verification"),
        }
    }
    keys
}

/// Spawn the periodic JWKS refresh task.
pub fn spawn_refresher(
    resolver: Arc<JwksKeyResolver>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = resolver.refresh().await {
                        warn!(error = %e, "Periodic JWKS refresh failed, keeping previous keys");
                    }
                }
                _ = shutdown.recv() => {
                    info!("JWKS refresher shutting down");
                    break;
                }
            }
        }
    })
}
