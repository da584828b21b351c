//! 外部协作者：网页抓取与语言模型服务的抽象接口。
//!
//! Collaborator seams consumed by the pipeline. The pipeline only ever sees
//! the traits; concrete implementations talk HTTP.
//!
//! | Trait | Implementation | Contract |
//! |-------|----------------|----------|
//! | [`ContentFetcher`] | [`HttpFetcher`] | `fetch(url) -> bytes`, `normalize(url, raw) -> text` |
//! | [`ModelService`] | [`AnthropicModel`] | `summarize(text)`, `suggest(summary)`, tool-augmented suggest |
//!
//! Trait objects are `Send + Sync` so a single instance can serve many
//! concurrent requests behind an `Arc`.

pub mod anthropic;
pub mod http;

use crate::tools::Toolbox;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;

pub use anthropic::{AnthropicModel, ModelConfig};
pub use http::{html_to_text, FetchConfig, HttpFetcher};

/// Raw page retrieval and HTML to text conversion.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch the raw body of `url`. Unusable statuses are [`Error::Fetch`].
    async fn fetch(&self, url: &str) -> Result<Bytes>;

    /// Convert fetched content into the text handed to the model.
    async fn normalize(&self, url: &str, raw: &str) -> Result<String>;
}

/// Language model calls used by the pipeline stages.
///
/// Implementations return the model's text verbatim; parsing and validation
/// happen in the pipeline.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Summarize recipe text into a `{"ok", "summary", "abortReason"}` envelope.
    async fn summarize(&self, text: &str) -> Result<String>;

    /// Produce a JSON array of pairing suggestions for a summary.
    async fn suggest(&self, summary: &str) -> Result<String>;

    /// Produce a `SuggestionsResponse` document, calling back into `tools`
    /// for fetching and caching as the model sees fit.
    async fn suggest_with_tools(&self, input: &str, tools: &Toolbox) -> Result<String> {
        let _ = (input, tools);
        Err(Error::compute(
            "suggestions-json",
            format!("model service '{}' does not support tool use", self.name()),
        ))
    }

    fn name(&self) -> &str {
        "model"
    }
}
