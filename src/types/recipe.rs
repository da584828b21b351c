//! Recipe inputs and the model artifacts derived from them.

use crate::cache::{derive_id, find_url};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// What a caller asked about: a recipe page or pasted recipe text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeInput {
    Url(String),
    Text(String),
}

impl RecipeInput {
    /// Classify raw user input. Surrounding whitespace is ignored; empty
    /// input is rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidInput("input cannot be empty".into()));
        }
        Ok(match find_url(input) {
            Some(url) => RecipeInput::Url(url.to_string()),
            None => RecipeInput::Text(input.to_string()),
        })
    }

    /// Identifier shared by every pipeline namespace for this input.
    pub fn id(&self) -> String {
        derive_id(self.as_str())
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecipeInput::Url(s) | RecipeInput::Text(s) => s,
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, RecipeInput::Url(_))
    }
}

/// Summary envelope returned by the model. The model may decline with
/// `ok: false` and a reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Summary {
    pub ok: bool,
    pub summary: String,
    pub abort_reason: String,
}

impl Summary {
    pub fn parse(output: &str) -> Result<Self> {
        Ok(serde_json::from_str(extract_json(output))?)
    }

    /// The summary text, or [`Error::ModelAbort`] when the model declined.
    pub fn into_text(self) -> Result<String> {
        if !self.ok {
            let reason = if self.abort_reason.is_empty() {
                "no reason given".to_string()
            } else {
                self.abort_reason
            };
            return Err(Error::ModelAbort { reason });
        }
        if self.summary.trim().is_empty() {
            return Err(Error::ModelAbort {
                reason: "empty summary".into(),
            });
        }
        Ok(self.summary)
    }
}

/// One wine pairing recommendation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub style: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vintage_range: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pairing_note: String,
}

impl Suggestion {
    /// Parse a JSON array of suggestions.
    pub fn parse_list(output: &str) -> Result<Vec<Suggestion>> {
        Ok(serde_json::from_str(extract_json(output))?)
    }
}

/// Final answer of the tool-augmented flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<Suggestion>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SuggestionsResponse {
    /// Parse and reject answers in which the model reported an error.
    pub fn parse(output: &str) -> Result<Self> {
        let parsed: SuggestionsResponse = serde_json::from_str(extract_json(output))?;
        match parsed.error.as_deref().map(str::trim) {
            Some(reason) if !reason.is_empty() => Err(Error::ModelAbort {
                reason: reason.to_string(),
            }),
            _ => Ok(parsed),
        }
    }
}

/// Slice out the JSON document of a model reply.
///
/// Handles a Markdown code fence around the document and leading chatter
/// before the first `{` or `[`.
pub fn extract_json(output: &str) -> &str {
    let trimmed = output.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the info string ("json") on the opening fence line.
        let body = rest.split_once('\n').map_or("", |(_, body)| body);
        return body.trim_end().trim_end_matches("```").trim();
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }
    match (trimmed.find(['{', '[']), trimmed.rfind(['}', ']'])) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}
