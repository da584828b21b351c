//! Runtime configuration.
//!
//! Loaded once at startup from an optional YAML file, overlaid with
//! environment variables, validated, then passed to constructors.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `WINE_STORE` | `store.kind` (`memory` or `redis`) |
//! | `REDIS_HOST` / `REDIS_PORT` | `store.host` / `store.port` |
//! | `WINE_MAX_QUOTA` | `quota.max_quota` |
//! | `WINE_QUOTA_LIFESPAN_SECS` | `quota.lifespan_secs` |
//! | `WINE_COALESCE_MISSES` | `resolver.coalesce_misses` |
//! | `WINE_HTTP_TIMEOUT_SECS` | `fetch.timeout_secs` |
//! | `WINE_MODEL` | `model.model` |
//! | `ANTHROPIC_BASE_URL` | `model.base_url` |

use crate::cache::{ResolverConfig, StoreConfig, StoreKind};
use crate::collaborators::{FetchConfig, ModelConfig};
use crate::quota::QuotaConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const DEFAULT_REDIS_PORT: u16 = 6379;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub quota: QuotaConfig,
    pub session_lifespan_secs: u64,
    pub resolver: ResolverConfig,
    pub recent_sample_size: usize,
    pub fetch: FetchConfig,
    pub model: ModelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            quota: QuotaConfig::default(),
            session_lifespan_secs: 60 * 60 * 24 * 7,
            resolver: ResolverConfig::default(),
            recent_sample_size: 3,
            fetch: FetchConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded configuration file");
        Self::from_yaml_str(&text)
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Optional file, then environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(kind) = var("WINE_STORE") {
            self.store.kind = StoreKind::from_str(&kind)?;
        }
        if let Some(host) = var("REDIS_HOST") {
            self.store.host = host;
        }
        if let Some(port) = var("REDIS_PORT") {
            self.store.port = port.parse().unwrap_or(DEFAULT_REDIS_PORT);
        }
        if let Some(max) = var("WINE_MAX_QUOTA") {
            self.quota.max_quota = parse_var("WINE_MAX_QUOTA", &max)?;
        }
        if let Some(secs) = var("WINE_QUOTA_LIFESPAN_SECS") {
            self.quota.lifespan_secs = parse_var("WINE_QUOTA_LIFESPAN_SECS", &secs)?;
        }
        if let Some(flag) = var("WINE_COALESCE_MISSES") {
            self.resolver.coalesce_misses = parse_flag("WINE_COALESCE_MISSES", &flag)?;
        }
        if let Some(secs) = var("WINE_HTTP_TIMEOUT_SECS") {
            self.fetch.timeout_secs = parse_var("WINE_HTTP_TIMEOUT_SECS", &secs)?;
        }
        if let Some(model) = var("WINE_MODEL") {
            self.model.model = model;
        }
        if let Some(url) = var("ANTHROPIC_BASE_URL") {
            self.model.base_url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.quota.validate()?;
        if self.store.kind == StoreKind::Redis && self.store.host.trim().is_empty() {
            return Err(Error::configuration(
                "redis host cannot be empty",
                ErrorContext::new().with_field_path("store.host"),
            ));
        }
        if self.recent_sample_size == 0 {
            return Err(Error::configuration(
                "recent sample size must be at least 1",
                ErrorContext::new().with_field_path("recent_sample_size"),
            ));
        }
        if self.session_lifespan_secs == 0 {
            return Err(Error::configuration(
                "session lifespan must be non-zero",
                ErrorContext::new().with_field_path("session_lifespan_secs"),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::configuration(
            format!("invalid value for {}", name),
            ErrorContext::new()
                .with_field_path(name)
                .with_details(value.to_string())
                .with_source("env"),
        )
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => parse_var::<bool>(name, value),
    }
}
