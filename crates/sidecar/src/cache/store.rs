//! TTL store of proxied responses plus the striped lock table that keeps
//! identical concurrent requests from all reaching Vault.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Number of request lock stripes.
pub const LOCK_STRIPES: usize = 256;

/// Errors from cache construction.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache TTL must be greater than zero")]
    ZeroTtl,
}

/// A complete upstream response, as replayed on a cache hit.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

struct Entry {
    response: CachedResponse,
    inserted: Instant,
}

/// Fingerprint-keyed response store with lazy TTL expiry.
///
/// The map is safe to use without the stripe locks; the locks only serialise
/// the fetch-or-forward sequence of identical requests.
pub struct ResponseCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
    default_on: bool,
    locks: Box<[Mutex<()>]>,
}

impl ResponseCache {
    /// Create a cache whose entries live for `ttl`. With `default_on`, every
    /// eligible request is cached unless it opts out.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ZeroTtl`] when `ttl` is zero.
    pub fn new(ttl: Duration, default_on: bool) -> Result<Self, CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::ZeroTtl);
        }
        Ok(Self {
            entries: DashMap::new(),
            ttl,
            default_on,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn default_on(&self) -> bool {
        self.default_on
    }

    /// Look up `key`. An expired entry is evicted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !self.is_stale(&entry, now) {
                return Some(entry.response.clone());
            }
        }
        // Only evict if still stale: a concurrent `set` may have refreshed it.
        self.entries.remove_if(key, |_, e| self.is_stale(e, now));
        None
    }

    /// Store `response` under `key`, replacing any entry and restarting its TTL.
    pub fn set(&self, key: &str, response: CachedResponse) {
        self.entries.insert(
            key.to_owned(),
            Entry {
                response,
                inserted: Instant::now(),
            },
        );
    }

    /// Drop the entry for `key`, if any.
    #[allow(dead_code)]
    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !self.is_stale(e, now));
        before.saturating_sub(self.entries.len())
    }

    /// The stripe lock guarding `key`.
    pub fn lock_for(&self, key: &str) -> &Mutex<()> {
        &self.locks[stripe_index(key)]
    }

    fn is_stale(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted) >= self.ttl
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("default_on", &self.default_on)
            .finish()
    }
}

fn stripe_index(key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % LOCK_STRIPES as u64) as usize
}

/// Periodically purge expired entries so keys that are never read again do
/// not accumulate. Runs every TTL until `cancel` fires.
pub fn spawn_sweeper(cache: Arc<ResponseCache>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cache.ttl());
        // First tick fires immediately; nothing can have expired yet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        debug!(purged, remaining = cache.len(), "purged expired cache entries");
                    }
                }
            }
        }
    })
}
