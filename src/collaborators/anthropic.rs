//! Anthropic Messages API 模型服务: 摘要、配酒建议与工具调用循环
//!
//! Anthropic Messages API model service. Requests are plain JSON bodies:
//! - the prompt goes in as a single user message;
//! - `max_tokens` is required;
//! - tool definitions are sent as `tools`, and `tool_use` content blocks are
//!   answered with `tool_result` blocks until the model produces text.

use super::ModelService;
use crate::tools::Toolbox;
use crate::types::{ToolCall, ToolDefinition, ToolResult};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const STAGE: &str = "model";

const SUMMARIZE_PROMPT: &str = r#"Summarize the recipe below for someone choosing a wine to serve with it.

<RECIPE>
{recipe}
</RECIPE>

Write one paragraph covering the dominant flavors, the cooking methods, the
key ingredients in order of flavor impact, the sauce or seasoning profile and
how heavy the dish is.

Reply with JSON only, in exactly this shape:
{"ok": true, "abortReason": "", "summary": "..."}

If the content is not a recipe, is unsafe, or is too unclear to summarize,
reply {"ok": false, "abortReason": "<short reason>", "summary": ""}."#;

const SUGGEST_PROMPT: &str = r#"Suggest approachable wines for the dish described below. Prefer wines that
most shops carry and explain each pairing in plain words.

<RECIPE_SUMMARY>
{summary}
</RECIPE_SUMMARY>

Reply with a JSON array of 5 to 10 objects and nothing else:
[{"style": "...", "region": "...", "description": "one sentence about the wine", "pairingNote": "one sentence on why it works"}]"#;

const TOOLS_PROMPT: &str = r#"Suggest wine pairings for the user's recipe input, using the tools to fetch
pages and to reuse cached work.

<USER_INPUT>
{input}
</USER_INPUT>

1. Decide whether the input is a URL or recipe text. If it is not about food,
   stop and report the error "Content is not about food or recipes".
2. For a URL, call FetchSite to get the page text. The identifier is the URL.
   For recipe text, call HashRecipeSummary; the identifier is the hash.
3. Call CacheGet("summarized:<identifier>"). On a miss, write a one-paragraph
   summary of flavors, cooking methods, key ingredients and dish weight, then
   store it with CacheWrite("summarized:<identifier>", summary).
4. Suggest 5 to 10 accessible wines that match the dish.

The final answer must be this JSON document and nothing else:
{"suggestions": [{"style": "...", "region": "...", "description": "...", "pairingNote": "..."}], "summary": "...", "error": null}
On failure set "suggestions" to [] and "error" to a short message."#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Tool rounds allowed before the agent run is abandoned.
    pub max_tool_iterations: usize,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            max_tokens: 4096,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tool_iterations: 3,
            timeout_secs: 120,
        }
    }
}

/// Parsed non-streaming Messages API response.
#[derive(Debug, Clone)]
struct ModelReply {
    text: String,
    tool_calls: Vec<ToolCall>,
    stop_reason: Option<String>,
    content: Value,
}

pub struct AnthropicModel {
    client: reqwest::Client,
    config: ModelConfig,
    api_key: String,
}

impl AnthropicModel {
    /// Build a model client, reading the API key from `config.api_key_env`.
    pub fn new(config: ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            Error::configuration(
                "model API key is not set",
                ErrorContext::new()
                    .with_field_path("model.api_key_env")
                    .with_details(config.api_key_env.clone()),
            )
        })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                Error::configuration(
                    format!("unable to build HTTP client: {}", e),
                    ErrorContext::new().with_field_path("model"),
                )
            })?;
        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn build_request(&self, messages: &[Value], tools: &[ToolDefinition]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }

    fn parse_response(body: &Value) -> Result<ModelReply> {
        let content = body.get("content").cloned().unwrap_or(Value::Null);
        let blocks = content.as_array().ok_or_else(|| {
            Error::compute(STAGE, "model response carries no content blocks")
        })?;

        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => tool_calls.push(serde_json::from_value(block.clone())?),
                _ => {}
            }
        }

        Ok(ModelReply {
            text,
            tool_calls,
            stop_reason: body
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(String::from),
            content,
        })
    }

    async fn send(&self, body: &Value) -> Result<ModelReply> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(String::from)
                })
                .unwrap_or(text);
            return Err(Error::compute(
                STAGE,
                format!("model API returned {}: {}", status.as_u16(), message),
            ));
        }
        Self::parse_response(&serde_json::from_str(&text)?)
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let messages = [json!({ "role": "user", "content": prompt })];
        let reply = self.send(&self.build_request(&messages, &[])).await?;
        debug!(stop_reason = ?reply.stop_reason, chars = reply.text.len(), "model replied");
        if reply.text.trim().is_empty() {
            return Err(Error::compute(STAGE, "model returned no text"));
        }
        Ok(reply.text)
    }
}

fn tool_result_block(result: &ToolResult) -> Value {
    json!({
        "type": "tool_result",
        "tool_use_id": result.tool_use_id,
        "content": result.content,
        "is_error": result.is_error,
    })
}

#[async_trait]
impl ModelService for AnthropicModel {
    async fn summarize(&self, text: &str) -> Result<String> {
        self.complete(SUMMARIZE_PROMPT.replace("{recipe}", text)).await
    }

    async fn suggest(&self, summary: &str) -> Result<String> {
        self.complete(SUGGEST_PROMPT.replace("{summary}", summary))
            .await
    }

    async fn suggest_with_tools(&self, input: &str, tools: &Toolbox) -> Result<String> {
        let definitions = tools.definitions();
        let mut messages = vec![json!({
            "role": "user",
            "content": TOOLS_PROMPT.replace("{input}", input),
        })];

        let mut rounds = 0;
        loop {
            let reply = self.send(&self.build_request(&messages, &definitions)).await?;
            if reply.tool_calls.is_empty() {
                if reply.text.trim().is_empty() {
                    return Err(Error::compute(STAGE, "agent finished without an answer"));
                }
                return Ok(reply.text);
            }
            if rounds == self.config.max_tool_iterations {
                return Err(Error::compute(
                    STAGE,
                    format!("agent still calling tools after {} rounds", rounds),
                ));
            }
            rounds += 1;

            let mut results = Vec::with_capacity(reply.tool_calls.len());
            for call in &reply.tool_calls {
                info!(tool = %call.name, round = rounds, "model requested tool");
                results.push(tool_result_block(&tools.call(call).await));
            }
            messages.push(json!({ "role": "assistant", "content": reply.content }));
            messages.push(json!({ "role": "user", "content": results }));
        }
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
