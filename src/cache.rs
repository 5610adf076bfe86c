use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::models::credential::CredentialRecord;

/// Entry stored in the LRU with its insertion timestamp.
struct CacheEntry {
    record: Arc<CredentialRecord>,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.inserted_at.elapsed() >= ttl)
    }
}

/// Bounded token → credentials cache with least-recently-used eviction.
///
/// Recency is updated on both `get` and `put`, so every operation takes the
/// lock exclusively. The lock is synchronous and is never held across an
/// await point: backend lookups happen entirely outside of it.
///
/// An optional TTL drops entries on access once they are older than the TTL.
pub struct CredentialCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    ttl: Option<Duration>,
}

impl CredentialCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::with_ttl(capacity, None)
    }

    pub fn with_ttl(capacity: NonZeroUsize, ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Look up a token and mark it most recently used.
    pub fn get(&self, token: &str) -> Option<Arc<CredentialRecord>> {
        let mut cache = self.inner.lock();
        let expired = cache.peek(token)?.is_expired(self.ttl);
        if expired {
            cache.pop(token);
            tracing::debug!(token = %token, "cached credentials expired");
            return None;
        }
        cache.get(token).map(|entry| entry.record.clone())
    }

    /// Look up without touching recency. Expired entries are reported absent.
    pub fn peek(&self, token: &str) -> Option<Arc<CredentialRecord>> {
        let cache = self.inner.lock();
        cache
            .peek(token)
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| entry.record.clone())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.peek(token).is_some()
    }

    /// Insert or replace the record under its own token, evicting the least
    /// recently used entry when full. Invalid records are refused.
    pub fn put(&self, record: Arc<CredentialRecord>) -> bool {
        if let Err(reason) = record.validate() {
            tracing::warn!(token = %record.token, reason = %reason, "refusing to cache invalid credentials");
            return false;
        }

        let token = record.token.clone();
        let entry = CacheEntry {
            record,
            inserted_at: Instant::now(),
        };
        let displaced = self.inner.lock().push(token.clone(), entry);

        if let Some((evicted, _)) = displaced.filter(|(k, _)| *k != token) {
            tracing::debug!(token = %evicted, "evicted least recently used credentials");
        }
        true
    }

    pub fn remove(&self, token: &str) -> bool {
        self.inner.lock().pop(token).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}
