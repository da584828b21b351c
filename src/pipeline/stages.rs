//! Upstream stages: raw → parsed → summarized.
//!
//! Each stage resolves its own key and, only on a miss, the stage it depends
//! on. A hit at any stage never touches the stages above it.

use crate::cache::{CacheAsideResolver, Namespace};
use crate::collaborators::{ContentFetcher, ModelService};
use crate::types::{RecipeInput, Summary};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::info;

pub(crate) const RAW: &str = "raw";
pub(crate) const PARSED: &str = "parsed";
pub(crate) const SUMMARIZED: &str = "summarized";

#[derive(Clone)]
pub(crate) struct Stages {
    pub(crate) resolver: CacheAsideResolver,
    pub(crate) fetcher: Arc<dyn ContentFetcher>,
    pub(crate) model: Arc<dyn ModelService>,
}

impl Stages {
    /// `raw:<id>`: the page body for a URL, or the text as given.
    pub(crate) async fn raw(&self, input: &RecipeInput) -> Result<String> {
        let key = Namespace::Raw.key(&input.id());
        self.resolver
            .resolve(key.as_str(), || async move {
                match input {
                    RecipeInput::Url(url) => {
                        let body = self.fetcher.fetch(url).await?;
                        info!(stage = RAW, bytes = body.len(), "fetched raw content");
                        Ok(String::from_utf8_lossy(&body).into_owned())
                    }
                    RecipeInput::Text(text) => Ok(text.clone()),
                }
            })
            .await
    }

    /// `parsed:<id>`: the normalized text handed to the model.
    pub(crate) async fn parsed(&self, input: &RecipeInput) -> Result<String> {
        let key = Namespace::Parsed.key(&input.id());
        self.resolver
            .resolve(key.as_str(), || async move {
                let raw = self.raw(input).await?;
                let text = match input {
                    RecipeInput::Url(url) => self.fetcher.normalize(url, &raw).await?,
                    RecipeInput::Text(_) => normalize_whitespace(&raw),
                };
                info!(stage = PARSED, chars = text.len(), "normalized content");
                Ok(text)
            })
            .await
    }

    /// `summarized:<id>`: the model's summary. A declined summary is an error
    /// and is not cached.
    pub(crate) async fn summarized(&self, input: &RecipeInput) -> Result<String> {
        let key = Namespace::Summarized.key(&input.id());
        self.resolver
            .resolve(key.as_str(), || async move {
                let parsed = self.parsed(input).await?;
                let out = self.model.summarize(&parsed).await?;
                let summary = Summary::parse(&out).map_err(|e| {
                    Error::compute(SUMMARIZED, format!("unparsable summary response: {}", e))
                })?;
                let text = summary.into_text()?;
                info!(stage = SUMMARIZED, "summarized recipe");
                Ok(text)
            })
            .await
    }
}

pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
