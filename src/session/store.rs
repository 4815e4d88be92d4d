//! Session storage backends.
//!
//! A backend holds opaque serialized session records keyed by session id.
//! Records carry their own deadline; expired records read as absent and are
//! removed lazily or by the reaper task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use rand::RngExt;
use tracing::debug;

use crate::Result;

/// Length of an encoded session id (32 random bytes, base64url)
pub const SESSION_ID_LEN: usize = 43;

/// Fresh, unguessable session id
pub fn generate_session_id() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Whether `id` has the shape of an id this process hands out
pub fn is_well_formed_id(id: &str) -> bool {
    id.len() == SESSION_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Key-value backend for session records
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Fetch a live record
    async fn get(&self, id: &str) -> Result<Option<String>>;

    /// Insert or replace a record, live for `ttl`
    async fn put(&self, id: &str, record: String, ttl: Duration) -> Result<()>;

    /// Delete a record; deleting an absent id is not an error
    async fn remove(&self, id: &str) -> Result<()>;

    /// Drop expired records, returning how many were removed
    async fn reap_expired(&self) -> usize;
}

struct StoredSession {
    record: String,
    expires_at: Instant,
}

/// Process-local session backend
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: DashMap<String, StoredSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<String>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(id) {
            if entry.expires_at > now {
                return Ok(Some(entry.record.clone()));
            }
        }
        // Expired: evict lazily
        self.entries.remove_if(id, |_, s| s.expires_at <= now);
        Ok(None)
    }

    async fn put(&self, id: &str, record: String, ttl: Duration) -> Result<()> {
        self.entries.insert(
            id.to_string(),
            StoredSession {
                record,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.entries.remove(id);
        Ok(())
    }

    async fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, s| s.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

/// Spawn a background task that reaps expired sessions every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.reap_expired().await;
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session reaper shutting down");
                    break;
                }
            }
        }
    })
}
