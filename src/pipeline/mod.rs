//! 食谱流水线模块：按缓存旁路方式逐级产出原文、文本、摘要与配酒建议。
//!
//! # Recipe Pipeline
//!
//! Every recipe identifier moves through the same four cached stages, each a
//! single cache-aside resolution keyed by the identifier in its own namespace:
//!
//! ```text
//! Unfetched → raw:<id> → parsed:<id> → summarized:<id> → suggestions-json:<id>
//!               │            │               │                   │
//!            Fetcher     Normalize       Model.summarize    quota charge +
//!         (or the text) (or whitespace)                     Model.suggest
//! ```
//!
//! Requesting a later stage derives every missing upstream stage in order; a
//! failure at any stage leaves that stage and everything after it uncached.
//!
//! ## Quota
//!
//! The summary and suggestion entry points run the account's gate check before
//! any cache lookup. Only a suggestion miss whose model call produced a usable
//! result is charged, once, inside the compute step and before the value is
//! stored. Hits cost nothing.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RecipePipeline`] | Entry points: summarize, suggest, tool-augmented suggest, recent, health |
//! | `stages` | The raw / parsed / summarized resolutions shared by the flows |

mod stages;

use crate::accounts::AccountRegistry;
use crate::cache::{open_store, CacheAsideResolver, KeyValueStore, Namespace};
use crate::collaborators::{AnthropicModel, ContentFetcher, HttpFetcher, ModelService};
use crate::config::Config;
use crate::quota::QuotaLedger;
use crate::recent::RecentIndex;
use crate::tools::Toolbox;
use crate::types::{extract_json, RecipeInput, Suggestion, SuggestionsResponse};
use crate::{Error, Result};
use stages::Stages;
use std::sync::Arc;
use tracing::{info, info_span, Instrument, Span};
use uuid::Uuid;

const SUGGESTIONS: &str = "suggestions-json";

pub struct RecipePipeline {
    stages: Stages,
    ledger: QuotaLedger,
    toolbox: Toolbox,
    recent: RecentIndex,
    accounts: AccountRegistry,
    recent_sample_size: usize,
}

impl RecipePipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn ContentFetcher>,
        model: Arc<dyn ModelService>,
    ) -> Self {
        let resolver = CacheAsideResolver::new(store.clone(), config.resolver.clone());
        let ledger = QuotaLedger::new(store.clone(), config.quota.clone());
        Self {
            toolbox: Toolbox::new(resolver.clone(), fetcher.clone()),
            recent: RecentIndex::new(store.clone()),
            accounts: AccountRegistry::new(store, ledger.clone(), config.session_lifespan_secs),
            stages: Stages {
                resolver,
                fetcher,
                model,
            },
            ledger,
            recent_sample_size: config.recent_sample_size,
        }
    }

    /// Open the configured store and build the HTTP collaborators.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config.store).await?;
        let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
        let model = Arc::new(AnthropicModel::new(config.model.clone())?);
        Ok(Self::new(config, store, fetcher, model))
    }

    pub fn resolver(&self) -> &CacheAsideResolver {
        &self.stages.resolver
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        self.stages.resolver.store()
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    pub fn recent(&self) -> &RecentIndex {
        &self.recent
    }

    pub fn toolbox(&self) -> &Toolbox {
        &self.toolbox
    }

    /// Summary text for a URL or recipe text.
    pub async fn summarize(&self, account_id: &str, input: &str) -> Result<String> {
        let input = RecipeInput::parse(input)?;
        let span = request_span("summarize", account_id, &input);
        async {
            self.ledger.check(account_id).await?;
            self.stages.summarized(&input).await
        }
        .instrument(span)
        .await
    }

    /// Suggestions JSON array for a URL or recipe text, deriving any missing
    /// upstream stage.
    pub async fn suggest(&self, account_id: &str, input: &str) -> Result<String> {
        let input = RecipeInput::parse(input)?;
        let span = request_span("suggest", account_id, &input);
        async {
            self.ledger.check(account_id).await?;
            let input = &input;
            let key = Namespace::SuggestionsJson.key(&input.id());
            self.stages
                .resolver
                .resolve(key.as_str(), || async move {
                    let summary = self.stages.summarized(input).await?;
                    let out = self.stages.model.suggest(&summary).await?;
                    let json = extract_json(&out);
                    let suggestions = Suggestion::parse_list(json).map_err(|e| {
                        Error::compute(SUGGESTIONS, format!("unparsable suggestions: {}", e))
                    })?;
                    self.ledger.charge(account_id).await?;
                    info!(stage = SUGGESTIONS, count = suggestions.len(), "generated suggestions");
                    Ok(json.to_string())
                })
                .await
        }
        .instrument(span)
        .await
    }

    /// Suggestions through the tool-augmented model flow. The final
    /// `SuggestionsResponse` document is cached under `suggestions-json:<id>`;
    /// intermediate stages are whatever the model chose to populate.
    pub async fn suggest_with_tools(&self, account_id: &str, input: &str) -> Result<String> {
        let input = RecipeInput::parse(input)?;
        let span = request_span("suggest_with_tools", account_id, &input);
        async {
            self.ledger.check(account_id).await?;
            let input = &input;
            let key = Namespace::SuggestionsJson.key(&input.id());
            self.stages
                .resolver
                .resolve(key.as_str(), || async move {
                    let out = self
                        .stages
                        .model
                        .suggest_with_tools(input.as_str(), &self.toolbox)
                        .await?;
                    let json = extract_json(&out);
                    let response = SuggestionsResponse::parse(json).map_err(|e| match e {
                        abort @ Error::ModelAbort { .. } => abort,
                        other => Error::compute(
                            SUGGESTIONS,
                            format!("unparsable agent response: {}", other),
                        ),
                    })?;
                    self.ledger.charge(account_id).await?;
                    info!(
                        stage = SUGGESTIONS,
                        count = response.suggestions.len(),
                        "agent produced suggestions"
                    );
                    Ok(json.to_string())
                })
                .await
        }
        .instrument(span)
        .await
    }

    /// A random sample of identifiers with cached suggestions, as a JSON array.
    pub async fn recent_json(&self) -> Result<String> {
        self.recent.sample_recent_json(self.recent_sample_size).await
    }

    pub async fn health(&self) -> Result<bool> {
        self.store().health_check().await
    }
}

fn request_span(operation: &'static str, account_id: &str, input: &RecipeInput) -> Span {
    let id = input.id();
    info_span!(
        "pipeline",
        operation,
        request_id = %Uuid::new_v4(),
        account_id,
        id = %id,
    )
}
