//! Recently processed recipes, reconstructed from the key space.

use crate::cache::{CacheKey, KeyValueStore, Namespace};
use crate::Result;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::debug;

/// Read-only view over `suggestions-json:*`.
#[derive(Clone)]
pub struct RecentIndex {
    store: Arc<dyn KeyValueStore>,
}

impl RecentIndex {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Every identifier with a cached suggestion set, sorted.
    pub async fn identifiers(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .store
            .list_keys(&Namespace::SuggestionsJson.pattern())
            .await?
            .iter()
            .filter_map(|k| CacheKey::parse(k))
            .filter(|k| k.namespace() == Namespace::SuggestionsJson)
            .map(|k| k.id().to_string())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Up to `n` identifiers, drawn uniformly at random.
    pub async fn sample_recent(&self, n: usize) -> Result<Vec<String>> {
        let mut ids = self.identifiers().await?;
        ids.shuffle(&mut rand::rng());
        ids.truncate(n);
        debug!(requested = n, returned = ids.len(), "sampled recent identifiers");
        Ok(ids)
    }

    /// [`sample_recent`](Self::sample_recent) rendered as a JSON array of strings.
    pub async fn sample_recent_json(&self, n: usize) -> Result<String> {
        Ok(serde_json::to_string(&self.sample_recent(n).await?)?)
    }
}
