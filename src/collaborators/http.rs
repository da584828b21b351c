//! HTTP page fetcher and HTML normalizer.

use super::ContentFetcher;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use bytes::Bytes;
use html_escape::decode_html_entities;
use lol_html::html_content::ContentType;
use lol_html::{comments, doc_comments, element, rewrite_str, RewriteStrSettings};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("wine-pairing/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| {
                Error::configuration(
                    format!("unable to build HTTP client: {}", e),
                    ErrorContext::new().with_field_path("fetch"),
                )
            })?;
        Ok(Self { client })
    }

    /// Bare `www.` inputs are recognized as URLs but carry no scheme.
    fn request_url(url: &str) -> Result<url::Url> {
        let candidate = if url.contains("://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        };
        url::Url::parse(&candidate).map_err(|e| Error::Fetch {
            url: url.to_string(),
            status: None,
            message: format!("invalid URL: {}", e),
        })
    }
}

/// Statuses whose body is still worth reading. Many recipe sites answer
/// bot-like clients with 4xx pages that carry the full recipe.
fn is_usable_status(status: u16) -> bool {
    (200..=501).contains(&status)
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let target = Self::request_url(url)?;
        info!(url, "fetching recipe page");
        let resp = self
            .client
            .get(target)
            .send()
            .await
            .map_err(|e| Error::Fetch {
                url: url.to_string(),
                status: None,
                message: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        if !is_usable_status(status) {
            return Err(Error::Fetch {
                url: url.to_string(),
                status: Some(status),
                message: format!("unexpected status {}", status),
            });
        }
        let body = resp.bytes().await?;
        debug!(url, status, bytes = body.len(), "fetched recipe page");
        Ok(body)
    }

    async fn normalize(&self, url: &str, raw: &str) -> Result<String> {
        let text = html_to_text(raw)?;
        if text.is_empty() {
            return Err(Error::compute(
                "parsed",
                format!("no readable text in content from {}", url),
            ));
        }
        Ok(text)
    }
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern compiles"));

/// Elements whose content is never visible text.
const NON_CONTENT: [&str; 4] = ["script", "style", "noscript", "template"];

/// Reduce an HTML document to its visible text on a single line.
///
/// Plain text passes through with its entities decoded and whitespace collapsed.
pub fn html_to_text(html: &str) -> Result<String> {
    let stripped = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("*", |el| {
                    if NON_CONTENT.contains(&el.tag_name().to_ascii_lowercase().as_str()) {
                        el.remove();
                    } else {
                        // Keep adjacent blocks from running together.
                        el.before(" ", ContentType::Text);
                        el.after(" ", ContentType::Text);
                        el.remove_and_keep_content();
                    }
                    Ok(())
                }),
                comments!("*", |c| {
                    c.remove();
                    Ok(())
                }),
            ],
            document_content_handlers: vec![doc_comments!(|c| {
                c.remove();
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| Error::compute("parsed", format!("unreadable HTML: {}", e)))?;
    let decoded = decode_html_entities(&stripped);
    Ok(WHITESPACE.replace_all(&decoded, " ").trim().to_string())
}
