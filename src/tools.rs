//! 模型工具集：让模型在工具调用流程中回调抓取与缓存原语。
//!
//! # Toolbox
//!
//! The tool-augmented flow hands control to the model, which calls back into
//! the same cache-aside primitives the deterministic pipeline uses:
//!
//! | Tool | Arguments | Effect |
//! |------|-----------|--------|
//! | `FetchSite` | `URL` | resolves `raw:<URL>` then `parsed:<URL>`, returns the text |
//! | `CacheGet` | `key` | `{"ok": bool, "value": string}` |
//! | `CacheWrite` | `key`, `value` | upsert without expiry |
//! | `HashRecipeSummary` | `content` | hex identifier for free text |
//!
//! Tool failures are reported back to the model as error results; they never
//! abort the agent run by themselves. The model may only read pipeline
//! artifacts and may only write the stages it produces itself.

use crate::cache::{derive_id, CacheAsideResolver, CacheKey, Namespace};
use crate::collaborators::ContentFetcher;
use crate::types::{ToolCall, ToolDefinition, ToolResult};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tool {
    FetchSite,
    CacheGet,
    CacheWrite,
    HashRecipeSummary,
}

impl Tool {
    const ALL: [Tool; 4] = [
        Tool::FetchSite,
        Tool::CacheGet,
        Tool::CacheWrite,
        Tool::HashRecipeSummary,
    ];

    fn name(self) -> &'static str {
        match self {
            Tool::FetchSite => "FetchSite",
            Tool::CacheGet => "CacheGet",
            Tool::CacheWrite => "CacheWrite",
            Tool::HashRecipeSummary => "HashRecipeSummary",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    fn definition(self) -> ToolDefinition {
        let (description, input_schema) = match self {
            Tool::FetchSite => (
                "Given a URL, fetch the site and return its readable text",
                string_params(&[("URL", "The URL of the site to fetch")]),
            ),
            Tool::CacheGet => (
                "Given a key, read a value from the application cache",
                string_params(&[("key", "The key of the cache item to read")]),
            ),
            Tool::CacheWrite => (
                "Given a key and a value, write the value to the application cache",
                string_params(&[
                    ("key", "The key of the cache item to write"),
                    ("value", "The value to store"),
                ]),
            ),
            Tool::HashRecipeSummary => (
                "Generate a stable hash of recipe text to use as its cache identifier",
                string_params(&[("content", "The recipe text to hash")]),
            ),
        };
        ToolDefinition {
            name: self.name().to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

fn string_params(params: &[(&str, &str)]) -> serde_json::Value {
    let properties: serde_json::Map<String, serde_json::Value> = params
        .iter()
        .map(|(name, description)| {
            (
                name.to_string(),
                json!({ "type": "string", "description": description }),
            )
        })
        .collect();
    let required: Vec<&str> = params.iter().map(|(name, _)| *name).collect();
    json!({ "type": "object", "properties": properties, "required": required })
}

/// `CacheGet` result payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLookup {
    pub ok: bool,
    pub value: String,
}

#[derive(Clone)]
pub struct Toolbox {
    resolver: CacheAsideResolver,
    fetcher: Arc<dyn ContentFetcher>,
}

impl Toolbox {
    pub fn new(resolver: CacheAsideResolver, fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self { resolver, fetcher }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        Tool::ALL.into_iter().map(Tool::definition).collect()
    }

    /// Run one tool call. Never fails: problems become error results.
    pub async fn call(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = Tool::from_name(&call.name) else {
            warn!(tool = %call.name, "model requested unknown tool");
            return ToolResult::error(&call.id, format!("unknown tool '{}'", call.name));
        };

        let outcome = match tool {
            Tool::FetchSite => match required_arg(call, "URL") {
                Ok(url) => self.fetch_site(url).await,
                Err(e) => Err(e),
            },
            Tool::CacheGet => match required_arg(call, "key") {
                Ok(key) => self.cache_get(key).await,
                Err(e) => Err(e),
            },
            Tool::CacheWrite => match required_arg(call, "key") {
                Ok(key) => {
                    let value = call.arguments.get("value").and_then(|v| v.as_str()).unwrap_or("");
                    self.cache_write(key, value).await
                }
                Err(e) => Err(e),
            },
            Tool::HashRecipeSummary => required_arg(call, "content").map(derive_id),
        };

        match outcome {
            Ok(content) => ToolResult::ok(&call.id, content),
            Err(message) => {
                debug!(tool = tool.name(), error = %message, "tool call failed");
                ToolResult::error(&call.id, message)
            }
        }
    }

    /// Resolve the raw and parsed stages for `url`.
    pub async fn fetch_site(&self, url: &str) -> std::result::Result<String, String> {
        info!(url, "tool fetch");
        self.resolve_parsed(url)
            .await
            .map_err(|e| format!("unable to fetch site: {}", e))
    }

    async fn resolve_parsed(&self, url: &str) -> Result<String> {
        let fetcher = &self.fetcher;
        let raw = self
            .resolver
            .resolve(Namespace::Raw.key(url).as_str(), || async move {
                let body = fetcher.fetch(url).await?;
                Ok(String::from_utf8_lossy(&body).into_owned())
            })
            .await?;
        self.resolver
            .resolve(Namespace::Parsed.key(url).as_str(), || async move {
                fetcher.normalize(url, &raw).await
            })
            .await
    }

    async fn cache_get(&self, key: &str) -> std::result::Result<String, String> {
        readable(key)?;
        let lookup = match self.resolver.store().get(key).await {
            Ok(Some(value)) => CacheLookup { ok: true, value },
            Ok(None) => CacheLookup::default(),
            Err(e) => return Err(format!("error reading cache: {}", e)),
        };
        serde_json::to_string(&lookup).map_err(|e| e.to_string())
    }

    async fn cache_write(&self, key: &str, value: &str) -> std::result::Result<String, String> {
        writable(key)?;
        match self.resolver.store().set(key, value, None).await {
            Ok(()) => {
                info!(key, "tool cache write");
                Ok("successfully written".to_string())
            }
            Err(e) => {
                warn!(key, error = %e, "tool cache write failed");
                Err(format!("unable to write cache: {}", e))
            }
        }
    }
}

fn required_arg<'a>(call: &'a ToolCall, name: &str) -> std::result::Result<&'a str, String> {
    call.arguments
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("argument '{}' is required", name))
}

fn namespace_of(key: &str) -> std::result::Result<Namespace, String> {
    CacheKey::parse(key)
        .map(|k| k.namespace())
        .ok_or_else(|| format!("'{}' is not a namespaced cache key", key))
}

fn readable(key: &str) -> std::result::Result<(), String> {
    match namespace_of(key)? {
        Namespace::Raw | Namespace::Parsed | Namespace::Summarized | Namespace::SuggestionsJson => {
            Ok(())
        }
        ns => Err(format!("namespace '{}' is not readable by tools", ns)),
    }
}

fn writable(key: &str) -> std::result::Result<(), String> {
    match namespace_of(key)? {
        Namespace::Raw | Namespace::Parsed | Namespace::Summarized => Ok(()),
        ns => Err(format!("namespace '{}' is not writable by tools", ns)),
    }
}
