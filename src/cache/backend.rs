//! Key/value backend contract and the in-process implementation.

use super::key::KeyPattern;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Convert a seconds-based TTL where `0` means "no expiry".
pub fn ttl_from_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// Storage contract shared by every backend.
///
/// A `ttl` of `None` (or a zero duration) stores the value without expiry.
/// Reads reflect the latest completed write; a value is never observable
/// half-written.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Current value, or `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditional upsert.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write only if the key is absent (or expired). Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Atomically decrement an integer value, keeping its expiry.
    ///
    /// Fails with [`Error::NotFound`] on a missing key and
    /// [`Error::InvalidCounter`] when the value is not an integer.
    async fn decrement(&self, key: &str) -> Result<i64>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All live keys matching `pattern`, in no particular order.
    async fn list_keys(&self, pattern: &KeyPattern) -> Result<Vec<String>>;

    /// Liveness probe for the backing store.
    async fn health_check(&self) -> Result<bool>;

    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct StoreEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.filter(|d| !d.is_zero()).map(|d| Instant::now() + d);
        Self { value, expires_at }
    }
    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Instant::now() >= at)
    }
}

/// Process-local store backed by a lock-guarded map.
///
/// Non-persistent. Each operation takes the lock once, so individual writes
/// are atomic, but nothing is held across a caller's get/compute/set sequence.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, StoreEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoreEntry>>> {
        self.entries.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoreEntry>>> {
        self.entries.write().map_err(|_| poisoned())
    }

    /// Drop expired entries. Reads already ignore them; this only reclaims memory.
    pub fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        Ok(before - entries.len())
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.values().filter(|e| !e.is_expired()).count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn poisoned() -> Error {
    Error::backend(
        "memory store lock poisoned",
        ErrorContext::new().with_source("memory"),
    )
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.read()?;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.write()?;
        entries.insert(key.to_string(), StoreEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.write()?;
        if entries.get(key).map_or(false, |e| !e.is_expired()) {
            return Ok(false);
        }
        entries.insert(key.to_string(), StoreEntry::new(value.to_string(), ttl));
        Ok(true)
    }

    async fn decrement(&self, key: &str) -> Result<i64> {
        let mut entries = self.write()?;
        let entry = match entries.get_mut(key) {
            Some(e) if !e.is_expired() => e,
            _ => return Err(Error::not_found(key)),
        };
        let current: i64 = entry.value.parse().map_err(|_| Error::InvalidCounter {
            key: key.to_string(),
            value: entry.value.clone(),
        })?;
        let next = current.checked_sub(1).ok_or_else(|| Error::InvalidCounter {
            key: key.to_string(),
            value: entry.value.clone(),
        })?;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.write()?;
        Ok(entries.remove(key).map_or(false, |e| !e.is_expired()))
    }

    async fn list_keys(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        let entries = self.read()?;
        Ok(entries
            .iter()
            .filter(|(k, e)| !e.is_expired() && pattern.matches(k))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.entries.read().is_ok())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let store = MemoryStore::new();
        store
            .set("sessions:a", "", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(store.get("sessions:a").await.unwrap(), Some(String::new()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("sessions:a").await.unwrap(), None);
        assert!(store
            .list_keys(&KeyPattern::parse("sessions:*"))
            .await
            .unwrap()
            .is_empty());
        // An expired key counts as absent for conditional writes.
        assert!(store.set_if_absent("sessions:a", "x", None).await.unwrap());
        assert_eq!(store.purge_expired().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_decrement_keeps_expiry() {
        let store = MemoryStore::new();
        store
            .set("quotas:a", "2", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(store.decrement("quotas:a").await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.decrement("quotas:a").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        assert_eq!(ttl_from_secs(0), None);
        assert_eq!(ttl_from_secs(5), Some(Duration::from_secs(5)));
        assert!(StoreEntry::new("v".into(), Some(Duration::ZERO)).expires_at.is_none());
    }
}
