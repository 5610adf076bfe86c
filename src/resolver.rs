//! Token → credentials resolution.
//!
//! `Resolver::resolve` is the single entry point the ingestion pipeline
//! uses. Each call is one pass through:
//!
//! ```text
//! validate token -> cache -> (miss) backend lookup -> validate -> cache put
//! ```
//!
//! Errors are classified and returned, never swallowed and never retried
//! here; retry policy belongs to the caller.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::cache::CredentialCache;
use crate::credentials::{BackendError, CredentialBackend};
use crate::metrics::Metrics;
use crate::models::credential::CredentialRecord;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    /// Empty or malformed token. Caller bug; never retryable.
    #[error("invalid token")]
    InvalidToken,

    /// The store has no record for the token.
    #[error("unknown token {token}")]
    UnknownToken { token: String },

    /// The store returned a record that failed validation.
    #[error("malformed credentials for token {token}: {reason}")]
    MalformedRecord { token: String, reason: String },

    /// Transient store or transport fault.
    #[error("credential backend unavailable for token {token}: {reason}")]
    BackendUnavailable { token: String, reason: String },
}

impl ResolveError {
    /// Whether the caller may retry later (with its own backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::BackendUnavailable { .. })
    }

    /// Caller-facing "this token does not resolve" class.
    /// `MalformedRecord` belongs here; only logs tell it apart.
    pub fn is_unknown(&self) -> bool {
        matches!(
            self,
            ResolveError::UnknownToken { .. } | ResolveError::MalformedRecord { .. }
        )
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::InvalidToken => "invalid_token",
            ResolveError::UnknownToken { .. } => "unknown_token",
            ResolveError::MalformedRecord { .. } => "malformed_record",
            ResolveError::BackendUnavailable { .. } => "backend_unavailable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub cache_capacity: NonZeroUsize,
    /// Optional expiry on top of capacity eviction.
    pub cache_ttl: Option<Duration>,
    /// Upper bound on a single backend lookup.
    pub backend_timeout: Duration,
    /// Collapse concurrent misses for the same token into one lookup.
    pub coalesce_misses: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: NonZeroUsize::new(1000).unwrap_or(NonZeroUsize::MIN),
            cache_ttl: None,
            backend_timeout: Duration::from_secs(5),
            coalesce_misses: true,
        }
    }
}

#[derive(Debug, Default)]
struct ResolverStats {
    lookups: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    backend_calls: AtomicU64,
    invalid_tokens: AtomicU64,
    unknown_tokens: AtomicU64,
    malformed_records: AtomicU64,
    backend_failures: AtomicU64,
}

/// Point-in-time copy of the resolver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub backend_calls: u64,
    pub invalid_tokens: u64,
    pub unknown_tokens: u64,
    pub malformed_records: u64,
    pub backend_failures: u64,
    pub cached: usize,
    pub capacity: usize,
}

pub struct Resolver {
    backend: Arc<dyn CredentialBackend>,
    cache: CredentialCache,
    /// Per-token slots serializing backend lookups for cold tokens.
    in_flight: DashMap<String, Arc<AsyncMutex<()>>>,
    config: ResolverConfig,
    stats: ResolverStats,
    metrics: Option<Metrics>,
}

impl Resolver {
    pub fn new(backend: Arc<dyn CredentialBackend>, config: ResolverConfig) -> Self {
        Self {
            backend,
            cache: CredentialCache::with_ttl(config.cache_capacity, config.cache_ttl),
            in_flight: DashMap::new(),
            config,
            stats: ResolverStats::default(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    /// Drop a cached record so the next resolve goes to the store.
    pub fn invalidate(&self, token: &str) -> bool {
        self.cache.remove(token)
    }

    #[tracing::instrument(skip(self, token))]
    pub async fn resolve(&self, token: &str) -> Result<Arc<CredentialRecord>, ResolveError> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);

        if !is_well_formed(token) {
            self.stats.invalid_tokens.fetch_add(1, Ordering::Relaxed);
            self.record_outcome("invalid_token");
            return Err(ResolveError::InvalidToken);
        }

        if let Some(record) = self.cache.get(token) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            self.record_outcome("hit");
            return Ok(record);
        }

        let result = if self.config.coalesce_misses {
            self.resolve_coalesced(token).await
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            self.fetch_and_populate(token).await
        };

        if let Err(e) = &result {
            self.count_failure(e);
        }
        result
    }

    /// Miss path with one lookup per token at a time. Waiters re-check the
    /// cache once they own the slot, so a burst of cold requests costs a
    /// single backend call when the first one succeeds.
    async fn resolve_coalesced(
        &self,
        token: &str,
    ) -> Result<Arc<CredentialRecord>, ResolveError> {
        let slot = self
            .in_flight
            .entry(token.to_string())
            .or_default()
            .clone();

        let result = {
            let _guard = slot.lock().await;
            match self.cache.get(token) {
                Some(record) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    self.record_outcome("coalesced_hit");
                    Ok(record)
                }
                None => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    self.fetch_and_populate(token).await
                }
            }
        };

        drop(slot);
        self.in_flight
            .remove_if(token, |_, slot| Arc::strong_count(slot) == 1);
        result
    }

    async fn fetch_and_populate(
        &self,
        token: &str,
    ) -> Result<Arc<CredentialRecord>, ResolveError> {
        self.stats.backend_calls.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let outcome =
            tokio::time::timeout(self.config.backend_timeout, self.backend.request(token)).await;

        let elapsed = started.elapsed();
        if let Some(m) = &self.metrics {
            m.observe_backend_lookup(elapsed.as_secs_f64());
        }

        let record = match outcome {
            Err(_) => {
                tracing::warn!(
                    token = %token,
                    backend = self.backend.kind(),
                    timeout_ms = self.config.backend_timeout.as_millis() as u64,
                    "credential lookup timed out"
                );
                return Err(ResolveError::BackendUnavailable {
                    token: token.to_string(),
                    reason: format!(
                        "lookup timed out after {}ms",
                        self.config.backend_timeout.as_millis()
                    ),
                });
            }
            Ok(Err(BackendError::NotFound)) => {
                tracing::info!(token = %token, "no credentials for token");
                return Err(ResolveError::UnknownToken {
                    token: token.to_string(),
                });
            }
            Ok(Err(BackendError::Invalid(reason))) => {
                tracing::warn!(token = %token, reason = %reason, "stored credentials are invalid");
                return Err(ResolveError::MalformedRecord {
                    token: token.to_string(),
                    reason,
                });
            }
            Ok(Err(BackendError::Unavailable(reason))) => {
                tracing::warn!(
                    token = %token,
                    backend = self.backend.kind(),
                    reason = %reason,
                    "credential backend unavailable"
                );
                return Err(ResolveError::BackendUnavailable {
                    token: token.to_string(),
                    reason,
                });
            }
            Ok(Ok(record)) => record,
        };

        if let Err(reason) = record.validate() {
            tracing::warn!(token = %token, reason = %reason, "backend returned invalid credentials");
            return Err(ResolveError::MalformedRecord {
                token: token.to_string(),
                reason,
            });
        }

        // The adapter keys by the requested token; the cache keys by the
        // record's token. Keep them identical.
        let mut record = record;
        if record.token != token {
            record.token = token.to_string();
        }

        tracing::debug!(
            token = %token,
            name = %record.name,
            destination = %record.destination_type,
            host = ?record.secrets.host(),
            elapsed_ms = elapsed.as_millis() as u64,
            "resolved credentials"
        );

        let record = Arc::new(record);
        self.cache.put(record.clone());
        self.record_outcome("miss");
        Ok(record)
    }

    fn count_failure(&self, err: &ResolveError) {
        let counter = match err {
            ResolveError::InvalidToken => return,
            ResolveError::UnknownToken { .. } => &self.stats.unknown_tokens,
            ResolveError::MalformedRecord { .. } => &self.stats.malformed_records,
            ResolveError::BackendUnavailable { .. } => &self.stats.backend_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.record_outcome(err.kind());
    }

    fn record_outcome(&self, outcome: &str) {
        if let Some(m) = &self.metrics {
            m.record_resolution(outcome);
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        let s = &self.stats;
        StatsSnapshot {
            lookups: s.lookups.load(Ordering::Relaxed),
            hits: s.hits.load(Ordering::Relaxed),
            misses: s.misses.load(Ordering::Relaxed),
            backend_calls: s.backend_calls.load(Ordering::Relaxed),
            invalid_tokens: s.invalid_tokens.load(Ordering::Relaxed),
            unknown_tokens: s.unknown_tokens.load(Ordering::Relaxed),
            malformed_records: s.malformed_records.load(Ordering::Relaxed),
            backend_failures: s.backend_failures.load(Ordering::Relaxed),
            cached: self.cache.len(),
            capacity: self.cache.capacity(),
        }
    }
}

fn is_well_formed(token: &str) -> bool {
    !token.is_empty() && !token.chars().any(|c| c.is_whitespace() || c.is_control())
}
