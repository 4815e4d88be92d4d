//! Single-use login nonces.
//!
//! Every login attempt gets a fresh nonce that the ID token must echo back.
//! A nonce is redeemable exactly once, and only within its lifetime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use rand::RngExt;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Issues and redeems nonces.
pub trait NonceStore: Send + Sync + 'static {
    /// Mint a new nonce, valid for the store's lifetime.
    fn issue(&self) -> String;

    /// Redeem `nonce`. True only for the first call within its lifetime.
    fn consume_once(&self, nonce: &str) -> bool;

    /// Drop expired entries, returning how many were removed.
    fn sweep(&self) -> usize;
}

/// Process-local nonce store
pub struct InMemoryNonceStore {
    live: Mutex<HashMap<String, Instant>>,
    lifetime: Duration,
}

impl InMemoryNonceStore {
    /// Create a store whose nonces expire after `lifetime`
    pub fn new(lifetime: Duration) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            lifetime,
        }
    }

    /// Number of nonces awaiting redemption, expired ones included
    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    /// Whether no nonce is outstanding
    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }
}

impl NonceStore for InMemoryNonceStore {
    fn issue(&self) -> String {
        let bytes: [u8; 16] = rand::rng().random();
        let nonce = URL_SAFE_NO_PAD.encode(bytes);
        let deadline = Instant::now() + self.lifetime;
        self.live.lock().insert(nonce.clone(), deadline);
        nonce
    }

    fn consume_once(&self, nonce: &str) -> bool {
        // Removal and the deadline check happen under one lock
        match self.live.lock().remove(nonce) {
            Some(deadline) => Instant::now() < deadline,
            None => false,
        }
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut live = self.live.lock();
        let before = live.len();
        live.retain(|_, deadline| *deadline > now);
        before - live.len()
    }
}

/// Spawn the background task that sweeps expired nonces until shutdown.
pub fn spawn_sweeper(
    store: Arc<dyn NonceStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = store.sweep();
                    if removed > 0 {
                        debug!(removed, "Swept expired nonces");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Nonce sweeper shutting down");
                    break;
                }
            }
        }
    })
}
