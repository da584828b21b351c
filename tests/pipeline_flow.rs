//! End-to-end pipeline behavior against in-memory fakes.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wine_pairing::cache::{KeyValueStore, MemoryStore, ResolverConfig};
use wine_pairing::collaborators::{ContentFetcher, ModelService};
use wine_pairing::tools::Toolbox;
use wine_pairing::types::ToolCall;
use wine_pairing::{Config, Error, RecipePipeline, Result, Suggestion};

const STEW_URL: &str = "https://example.test/stew";
const STEW_SUMMARY: &str = r#"{"ok":true,"summary":"A hearty beef stew...","abortReason":""}"#;
const STEW_SUGGESTIONS: &str = r#"[{"style":"Cabernet Sauvignon","region":"Washington State","description":"Full-bodied red with dark fruit and moderate tannins.","pairingNote":"Structure complements the rich beef."}]"#;

#[derive(Default)]
struct FakeFetcher {
    fetches: AtomicUsize,
    normalizations: AtomicUsize,
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if url.contains("unreachable") {
            return Err(Error::Fetch {
                url: url.to_string(),
                status: Some(503),
                message: "service unavailable".into(),
            });
        }
        Ok(Bytes::from_static(b"<html>Beef Stew...</html>"))
    }

    async fn normalize(&self, _url: &str, raw: &str) -> Result<String> {
        self.normalizations.fetch_add(1, Ordering::SeqCst);
        assert_eq!(raw, "<html>Beef Stew...</html>");
        Ok("Beef Stew...".to_string())
    }
}

struct FakeModel {
    summary: Mutex<String>,
    suggestions: Mutex<String>,
    agent_answer: Mutex<String>,
    summarize_calls: AtomicUsize,
    suggest_calls: AtomicUsize,
    agent_calls: AtomicUsize,
    delay: Duration,
}

impl FakeModel {
    fn new() -> Self {
        Self {
            summary: Mutex::new(STEW_SUMMARY.to_string()),
            suggestions: Mutex::new(STEW_SUGGESTIONS.to_string()),
            agent_answer: Mutex::new(String::new()),
            summarize_calls: AtomicUsize::new(0),
            suggest_calls: AtomicUsize::new(0),
            agent_calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn set_summary(&self, s: &str) {
        *self.summary.lock().unwrap() = s.to_string();
    }

    fn set_agent_answer(&self, s: &str) {
        *self.agent_answer.lock().unwrap() = s.to_string();
    }
}

#[async_trait]
impl ModelService for FakeModel {
    async fn summarize(&self, text: &str) -> Result<String> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        assert!(!text.is_empty());
        Ok(self.summary.lock().unwrap().clone())
    }

    async fn suggest(&self, summary: &str) -> Result<String> {
        self.suggest_calls.fetch_add(1, Ordering::SeqCst);
        assert!(!summary.is_empty());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.suggestions.lock().unwrap().clone())
    }

    async fn suggest_with_tools(&self, input: &str, tools: &Toolbox) -> Result<String> {
        self.agent_calls.fetch_add(1, Ordering::SeqCst);
        // Act like an agent: fetch through the tools, then answer.
        let fetched = tools
            .call(&ToolCall {
                id: "tu_1".into(),
                name: "FetchSite".into(),
                arguments: serde_json::json!({ "URL": input }),
            })
            .await;
        assert!(!fetched.is_error, "{}", fetched.content);
        Ok(self.agent_answer.lock().unwrap().clone())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    fetcher: Arc<FakeFetcher>,
    model: Arc<FakeModel>,
    pipeline: RecipePipeline,
}

fn harness_with(config: Config, model: FakeModel) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(FakeFetcher::default());
    let model = Arc::new(model);
    let pipeline = RecipePipeline::new(&config, store.clone(), fetcher.clone(), model.clone());
    Harness {
        store,
        fetcher,
        model,
        pipeline,
    }
}

fn harness() -> Harness {
    harness_with(Config::default(), FakeModel::new())
}

async fn value(store: &MemoryStore, key: &str) -> Option<String> {
    store.get(key).await.unwrap()
}

#[tokio::test]
async fn stew_end_to_end() {
    let h = harness();
    h.pipeline.ledger().ensure_provisioned("acct").await.unwrap();
    let before = h.pipeline.ledger().remaining("acct").await.unwrap();

    let out = h.pipeline.suggest("acct", STEW_URL).await.unwrap();
    assert_eq!(out, STEW_SUGGESTIONS);

    assert_eq!(
        value(&h.store, "raw:https://example.test/stew").await.as_deref(),
        Some("<html>Beef Stew...</html>")
    );
    assert_eq!(
        value(&h.store, "parsed:https://example.test/stew").await.as_deref(),
        Some("Beef Stew...")
    );
    assert_eq!(
        value(&h.store, "summarized:https://example.test/stew").await.as_deref(),
        Some("A hearty beef stew...")
    );
    let cached = value(&h.store, "suggestions-json:https://example.test/stew")
        .await
        .unwrap();
    assert_eq!(cached, STEW_SUGGESTIONS);
    let parsed = Suggestion::parse_list(&cached).unwrap();
    assert_eq!(parsed[0].style, "Cabernet Sauvignon");
    assert_eq!(parsed[0].region, "Washington State");

    assert_eq!(h.pipeline.ledger().remaining("acct").await.unwrap(), before - 1);
}

#[tokio::test]
async fn suggestion_hit_does_not_charge_or_call_collaborators() {
    let h = harness();
    h.pipeline.suggest("acct", STEW_URL).await.unwrap();
    assert_eq!(h.pipeline.ledger().remaining("acct").await.unwrap(), 9);

    for _ in 0..3 {
        assert_eq!(h.pipeline.suggest("acct", STEW_URL).await.unwrap(), STEW_SUGGESTIONS);
    }
    assert_eq!(h.pipeline.ledger().remaining("acct").await.unwrap(), 9);
    assert_eq!(h.fetcher.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(h.fetcher.normalizations.load(Ordering::SeqCst), 1);
    assert_eq!(h.model.summarize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.model.suggest_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn summary_is_reused_by_suggestions_and_never_charged() {
    let h = harness();
    let summary = h.pipeline.summarize("acct", STEW_URL).await.unwrap();
    assert_eq!(summary, "A hearty beef stew...");
    assert_eq!(h.pipeline.ledger().remaining("acct").await.unwrap(), 10);

    h.pipeline.suggest("acct", STEW_URL).await.unwrap();
    assert_eq!(h.model.summarize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.fetcher.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(h.pipeline.ledger().remaining("acct").await.unwrap(), 9);
}

#[tokio::test]
async fn fetch_failure_creates_no_downstream_entries() {
    let h = harness();
    let url = "https://unreachable.test/stew";
    let err = h.pipeline.suggest("acct", url).await.unwrap_err();
    assert!(matches!(err, Error::Fetch { status: Some(503), .. }));

    for ns in ["raw", "parsed", "summarized", "suggestions-json"] {
        assert_eq!(value(&h.store, &format!("{ns}:{url}")).await, None, "{ns}");
    }
    assert_eq!(h.model.summarize_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.pipeline.ledger().remaining("acct").await.unwrap(), 10);
}

#[tokio::test]
async fn model_abort_is_not_cached_and_retries_cleanly() {
    let h = harness();
    h.model
        .set_summary(r#"{"ok":false,"summary":"","abortReason":"Not a recipe"}"#);

    let err = h.pipeline.suggest("acct", STEW_URL).await.unwrap_err();
    match err {
        Error::ModelAbort { reason } => assert_eq!(reason, "Not a recipe"),
        other => panic!("expected ModelAbort, got {other:?}"),
    }
    assert_eq!(value(&h.store, "summarized:https://example.test/stew").await, None);
    assert_eq!(value(&h.store, "suggestions-json:https://example.test/stew").await, None);
    assert_eq!(h.pipeline.ledger().remaining("acct").await.unwrap(), 10);
    // Upstream stages that did succeed stay cached.
    assert!(value(&h.store, "parsed:https://example.test/stew").await.is_some());

    h.model.set_summary(STEW_SUMMARY);
    h.pipeline.suggest("acct", STEW_URL).await.unwrap();
    assert_eq!(h.model.summarize_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.fetcher.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_quota_is_rejected_before_any_lookup() {
    let h = harness();
    h.pipeline.suggest("acct", STEW_URL).await.unwrap();
    h.store.set("quotas:acct", "0", None).await.unwrap();

    let stats_before = h.pipeline.resolver().stats();
    let err = h.pipeline.suggest("acct", STEW_URL).await.unwrap_err();
    assert!(err.is_quota_exhausted());
    assert!(!err.is_retryable());
    // Even a cached answer is not looked up.
    let stats_after = h.pipeline.resolver().stats();
    assert_eq!(stats_after.hits, stats_before.hits);
    assert_eq!(stats_after.misses, stats_before.misses);

    assert!(h.pipeline.summarize("acct", STEW_URL).await.unwrap_err().is_quota_exhausted());
    // Other accounts are unaffected.
    assert_eq!(h.pipeline.suggest("other", STEW_URL).await.unwrap(), STEW_SUGGESTIONS);
}

#[tokio::test]
async fn free_text_uses_content_hash_identifier() {
    let h = harness();
    let text = "Brown 2 lb beef chuck, add carrots, onions and red wine, braise 3 hours.";
    h.pipeline.suggest("acct", text).await.unwrap();

    let id = wine_pairing::cache::hash_content(text);
    assert_eq!(value(&h.store, &format!("raw:{id}")).await.as_deref(), Some(text));
    assert!(value(&h.store, &format!("suggestions-json:{id}")).await.is_some());
    assert_eq!(h.fetcher.fetches.load(Ordering::SeqCst), 0);

    let ids = h.pipeline.recent().identifiers().await.unwrap();
    assert_eq!(ids, vec![id]);
}

#[tokio::test]
async fn recent_sample_only_names_cached_suggestions() {
    let h = harness();
    for i in 0..5 {
        h.pipeline
            .suggest("acct", &format!("https://example.test/recipe/{i}"))
            .await
            .unwrap();
    }
    h.pipeline
        .summarize("acct", "https://example.test/summary-only")
        .await
        .unwrap();

    let sample: Vec<String> = serde_json::from_str(&h.pipeline.recent_json().await.unwrap()).unwrap();
    assert_eq!(sample.len(), 3);
    for id in &sample {
        assert!(id.starts_with("https://example.test/recipe/"));
        assert!(value(&h.store, &format!("suggestions-json:{id}")).await.is_some());
    }
}

#[tokio::test]
async fn tool_flow_caches_final_document_and_charges_once() {
    let h = harness();
    let answer = r#"{"suggestions":[{"style":"Zinfandel","region":"Lodi","description":"Jammy red.","pairingNote":"Stands up to the braise."}],"summary":"A hearty beef stew...","error":null}"#;
    h.model.set_agent_answer(&format!("```json\n{answer}\n```"));

    let out = h.pipeline.suggest_with_tools("acct", STEW_URL).await.unwrap();
    assert_eq!(out, answer);
    assert_eq!(
        value(&h.store, "suggestions-json:https://example.test/stew").await.as_deref(),
        Some(answer)
    );
    // The agent's FetchSite call went through the shared cache.
    assert_eq!(
        value(&h.store, "parsed:https://example.test/stew").await.as_deref(),
        Some("Beef Stew...")
    );
    assert_eq!(h.pipeline.ledger().remaining("acct").await.unwrap(), 9);

    h.pipeline.suggest_with_tools("acct", STEW_URL).await.unwrap();
    assert_eq!(h.model.agent_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.pipeline.ledger().remaining("acct").await.unwrap(), 9);
}

#[tokio::test]
async fn tool_flow_error_answer_is_an_abort() {
    let h = harness();
    h.model.set_agent_answer(
        r#"{"suggestions":[],"summary":"","error":"Content is not about food or recipes"}"#,
    );
    let err = h
        .pipeline
        .suggest_with_tools("acct", "https://example.test/news")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ModelAbort { .. }));
    assert_eq!(value(&h.store, "suggestions-json:https://example.test/news").await, None);
    assert_eq!(h.pipeline.ledger().remaining("acct").await.unwrap(), 10);
}

#[tokio::test]
async fn concurrent_misses_without_coalescing_may_overspend() {
    let h = harness_with(
        Config::default(),
        FakeModel::new().with_delay(Duration::from_millis(50)),
    );
    let pipeline = Arc::new(h.pipeline);
    pipeline.summarize("acct", STEW_URL).await.unwrap();

    let (a, b) = tokio::join!(
        pipeline.suggest("acct", STEW_URL),
        pipeline.suggest("acct", STEW_URL)
    );
    assert_eq!(a.unwrap(), STEW_SUGGESTIONS);
    assert_eq!(b.unwrap(), STEW_SUGGESTIONS);
    // Both requests missed and both paid.
    assert_eq!(h.model.suggest_calls.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.ledger().remaining("acct").await.unwrap(), 8);
}

#[tokio::test]
async fn quota_lost_during_model_call_keeps_the_result() {
    let h = harness_with(
        Config::default(),
        FakeModel::new().with_delay(Duration::from_millis(300)),
    );
    let (out, removed) = tokio::join!(h.pipeline.suggest("acct", STEW_URL), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.store.delete("quotas:acct").await.unwrap()
    });
    assert!(removed);
    assert_eq!(out.unwrap(), STEW_SUGGESTIONS);
    assert_eq!(
        value(&h.store, "suggestions-json:https://example.test/stew").await.as_deref(),
        Some(STEW_SUGGESTIONS)
    );
    assert_eq!(value(&h.store, "quotas:acct").await.as_deref(), Some("9"));
}

#[tokio::test]
async fn coalesced_misses_charge_once() {
    let mut config = Config::default();
    config.resolver = ResolverConfig::new().with_coalesce_misses(true);
    let h = harness_with(config, FakeModel::new().with_delay(Duration::from_millis(50)));
    let pipeline = Arc::new(h.pipeline);
    pipeline.summarize("acct", STEW_URL).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let p = pipeline.clone();
        handles.push(tokio::spawn(async move { p.suggest("acct", STEW_URL).await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), STEW_SUGGESTIONS);
    }
    assert_eq!(h.model.suggest_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.ledger().remaining("acct").await.unwrap(), 9);
}

#[tokio::test]
async fn accounts_share_the_store() {
    let h = harness();
    h.pipeline
        .accounts()
        .login("acct", "cook@example.test")
        .await
        .unwrap();
    h.pipeline.suggest("acct", STEW_URL).await.unwrap();

    let details = h.pipeline.accounts().details("acct").await.unwrap();
    assert_eq!(details.email, "cook@example.test");
    assert_eq!(details.quota, 9);
    assert!(h.pipeline.health().await.unwrap());
}
