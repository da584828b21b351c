//! Cache-aside resolution ("get or compute and store").

use super::backend::KeyValueStore;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// TTL applied to resolved values; `0` stores without expiry.
    pub default_ttl_secs: u64,
    /// Run at most one `compute` per key at a time within this process.
    ///
    /// Off by default: concurrent misses on one key each compute and the last
    /// write wins.
    pub coalesce_misses: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 0,
            coalesce_misses: false,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_default_ttl_secs(mut self, secs: u64) -> Self {
        self.default_ttl_secs = secs;
        self
    }
    pub fn with_coalesce_misses(mut self, enabled: bool) -> Self {
        self.coalesce_misses = enabled;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub compute_failures: u64,
    pub write_failures: u64,
}

impl ResolverStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    compute_failures: AtomicU64,
    write_failures: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> ResolverStats {
        ResolverStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            compute_failures: self.compute_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

type KeyGate = Arc<tokio::sync::Mutex<()>>;

/// Wraps a [`KeyValueStore`] with the cache-aside contract used by every stage.
///
/// - hit: the stored value is returned and `compute` is never called;
/// - miss: `compute` runs on the caller's task and its result is stored
///   before being returned;
/// - compute failure: the error propagates and nothing is written, so the
///   next call retries the miss.
#[derive(Clone)]
pub struct CacheAsideResolver {
    store: Arc<dyn KeyValueStore>,
    config: ResolverConfig,
    stats: Arc<AtomicStats>,
    inflight: Arc<Mutex<HashMap<String, KeyGate>>>,
}

impl CacheAsideResolver {
    pub fn new(store: Arc<dyn KeyValueStore>, config: ResolverConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(AtomicStats::default()),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats.to_stats()
    }

    /// Resolve `key` with the configured default TTL.
    pub async fn resolve<F, Fut>(&self, key: &str, compute: F) -> Result<String>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<String>> + Send,
    {
        let ttl = super::backend::ttl_from_secs(self.config.default_ttl_secs);
        self.resolve_with_ttl(key, ttl, compute).await
    }

    /// Resolve `key`, storing a miss with an explicit TTL.
    pub async fn resolve_with_ttl<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<String>> + Send,
    {
        if let Some(hit) = self.lookup(key).await? {
            return Ok(hit);
        }

        if !self.config.coalesce_misses {
            return self.compute_and_store(key, ttl, compute).await;
        }

        let gate = self.gate_for(key)?;
        let outcome = {
            let _held = gate.lock().await;
            // Whoever held the gate before us may have filled the key.
            match self.store.get(key).await? {
                Some(hit) => {
                    debug!(key, "cache hit after waiting on in-flight miss");
                    Ok(hit)
                }
                None => self.compute_and_store(key, ttl, compute).await,
            }
        };
        self.release_gate(key, gate);
        outcome
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>> {
        match self.store.get(key).await? {
            Some(hit) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit");
                Ok(Some(hit))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache miss");
                Ok(None)
            }
        }
    }

    async fn compute_and_store<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<String>> + Send,
    {
        let value = match compute().await {
            Ok(v) => v,
            Err(e) => {
                self.stats.compute_failures.fetch_add(1, Ordering::Relaxed);
                debug!(key, error = %e, "cache miss not resolved; nothing written");
                return Err(e);
            }
        };

        // The value is already paid for; a failed write costs a future miss,
        // not this request.
        match self.store.set(key, &value, ttl).await {
            Ok(()) => {
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cached resolved value");
            }
            Err(e) => {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "unable to cache resolved value");
            }
        }
        Ok(value)
    }

    fn gate_for(&self, key: &str) -> Result<KeyGate> {
        let mut inflight = self.inflight.lock().map_err(|_| registry_poisoned())?;
        Ok(inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    fn release_gate(&self, key: &str, gate: KeyGate) {
        if let Ok(mut inflight) = self.inflight.lock() {
            // Two references left: the registry's and ours. Nobody is waiting.
            if Arc::strong_count(&gate) == 2 {
                inflight.remove(key);
            }
        }
    }
}

fn registry_poisoned() -> Error {
    Error::backend(
        "in-flight registry lock poisoned",
        ErrorContext::new().with_source("resolver"),
    )
}
