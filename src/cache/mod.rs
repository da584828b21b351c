//! 缓存模块：键值存储后端、缓存旁路解析与键空间设计。
//!
//! # Cache Module
//!
//! Every pipeline artifact, account record and quota counter lives in one
//! key/value store. This module defines that store, the key space laid over
//! it, and the cache-aside resolver each pipeline stage goes through.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`KeyValueStore`] | Backend contract: get/set/set-if-absent/decrement/delete/list/health |
//! | [`MemoryStore`] | In-process backend, lives for the process lifetime |
//! | [`RedisStore`] | Networked backend shared across processes |
//! | [`CacheAsideResolver`] | "get or compute and store" over any backend |
//! | [`Namespace`] / [`CacheKey`] | `<namespace>:<id>` key construction |
//! | [`KeyPattern`] | Prefix + trailing `*` pattern, identical on every backend |
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use wine_pairing::cache::{CacheAsideResolver, MemoryStore, Namespace, ResolverConfig};
//!
//! # tokio_test::block_on(async {
//! let resolver = CacheAsideResolver::new(Arc::new(MemoryStore::new()), ResolverConfig::default());
//! let key = Namespace::Parsed.key("https://example.test/stew");
//! let text = resolver
//!     .resolve(key.as_str(), || async { Ok("Beef Stew...".to_string()) })
//!     .await?;
//! assert_eq!(text, "Beef Stew...");
//! # Ok::<(), wine_pairing::Error>(())
//! # }).unwrap();
//! ```

mod backend;
mod key;
mod redis;
mod resolver;

pub use backend::{ttl_from_secs, KeyValueStore, MemoryStore};
pub use key::{derive_id, find_url, hash_content, CacheKey, KeyPattern, Namespace};
pub use self::redis::RedisStore;
pub use resolver::{CacheAsideResolver, ResolverConfig, ResolverStats};

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Redis,
}

impl std::str::FromStr for StoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-process" | "inprocess" => Ok(StoreKind::Memory),
            "redis" | "networked" => Ok(StoreKind::Redis),
            other => Err(Error::configuration(
                format!("unknown store kind '{}'", other),
                ErrorContext::new()
                    .with_field_path("store.kind")
                    .with_details("expected 'memory' or 'redis'"),
            )),
        }
    }
}

/// Backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub host: String,
    pub port: u16,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            host: "localhost".to_string(),
            port: 6379,
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn redis(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: StoreKind::Redis,
            host: host.into(),
            port,
        }
    }
}

/// Open the backend described by `config`.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.kind {
        StoreKind::Memory => {
            info!(backend = "memory", "using in-process store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Redis => {
            info!(backend = "redis", host = %config.host, port = config.port, "connecting to store");
            Ok(Arc::new(RedisStore::connect(&config.host, config.port).await?))
        }
    }
}
