//! # wine-pairing
//!
//! 缓存优先、配额受控的食谱摘要与配酒建议流水线。
//!
//! Cached, quota-gated recipe summarization and wine pairing. A recipe URL or
//! pasted recipe text is fetched, normalized, summarized by a language model
//! and turned into pairing suggestions; every intermediate artifact is cached
//! so repeated requests cost nothing.
//!
//! ## Core Ideas
//!
//! - **Cache-aside everywhere**: each stage is a single "get or compute and
//!   store" resolution against one key/value store
//! - **Stable identifiers**: a URL is its own identifier, free text is keyed by
//!   its SHA-256, so the same input always reuses the same entries
//! - **Pay on miss**: only a suggestion miss that reached the model is charged
//!   against the account's quota
//! - **Pluggable backends**: in-process map or Redis, same contract
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wine_pairing::{Config, RecipePipeline};
//!
//! #[tokio::main]
//! async fn main() -> wine_pairing::Result<()> {
//!     let config = Config::from_env()?;
//!     let pipeline = RecipePipeline::from_config(&config).await?;
//!
//!     let suggestions = pipeline
//!         .suggest("local", "https://example.test/beef-stew")
//!         .await?;
//!     println!("{suggestions}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Key/value backends, key space, cache-aside resolver |
//! | [`quota`] | Per-account usage counters |
//! | [`accounts`] | Account email and session records |
//! | [`pipeline`] | The four-stage recipe pipeline |
//! | [`recent`] | Sampling of previously processed recipes |
//! | [`collaborators`] | Fetcher and model service seams with HTTP implementations |
//! | [`tools`] | Tools offered to the model in the tool-augmented flow |
//! | [`types`] | Recipe inputs, summaries, suggestions, tool calls |
//! | [`config`] | YAML and environment configuration |

pub mod accounts;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod pipeline;
pub mod quota;
pub mod recent;
pub mod tools;
pub mod types;

// Re-export main types for convenience
pub use accounts::{AccountDetails, AccountRegistry};
pub use cache::{CacheAsideResolver, KeyValueStore, MemoryStore, RedisStore};
pub use config::Config;
pub use pipeline::RecipePipeline;
pub use quota::{QuotaConfig, QuotaLedger};
pub use recent::RecentIndex;
pub use types::{RecipeInput, Suggestion, SuggestionsResponse, Summary};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
