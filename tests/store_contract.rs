//! Backend contract suite. Every `KeyValueStore` must pass the same checks.
//!
//! The Redis run needs a server: `REDIS_URL=redis://127.0.0.1:6379/ cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;
use wine_pairing::cache::{KeyPattern, KeyValueStore, MemoryStore, RedisStore};
use wine_pairing::Error;

/// Unique identifier prefix so runs against a shared server never collide.
fn scope() -> String {
    format!("contract-{}-", uuid::Uuid::new_v4().simple())
}

async fn run_contract(store: Arc<dyn KeyValueStore>) {
    let p = scope();
    let k = |ns: &str, id: &str| format!("{ns}:{p}{id}");

    // get / set / overwrite
    assert_eq!(store.get(&k("raw", "a")).await.unwrap(), None);
    store.set(&k("raw", "a"), "<html>v1</html>", None).await.unwrap();
    assert_eq!(
        store.get(&k("raw", "a")).await.unwrap().as_deref(),
        Some("<html>v1</html>")
    );
    store.set(&k("raw", "a"), "<html>v2</html>", None).await.unwrap();
    assert_eq!(
        store.get(&k("raw", "a")).await.unwrap().as_deref(),
        Some("<html>v2</html>")
    );

    // set_if_absent
    assert!(store.set_if_absent(&k("quotas", "a"), "10", None).await.unwrap());
    assert!(!store.set_if_absent(&k("quotas", "a"), "99", None).await.unwrap());
    assert_eq!(store.get(&k("quotas", "a")).await.unwrap().as_deref(), Some("10"));

    // decrement
    assert_eq!(store.decrement(&k("quotas", "a")).await.unwrap(), 9);
    assert_eq!(store.get(&k("quotas", "a")).await.unwrap().as_deref(), Some("9"));
    assert!(store
        .decrement(&k("quotas", "missing"))
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(store.get(&k("quotas", "missing")).await.unwrap(), None);
    store.set(&k("quotas", "bad"), "ten", None).await.unwrap();
    assert!(matches!(
        store.decrement(&k("quotas", "bad")).await.unwrap_err(),
        Error::InvalidCounter { .. }
    ));
    store.set(&k("quotas", "zero"), "0", None).await.unwrap();
    assert_eq!(store.decrement(&k("quotas", "zero")).await.unwrap(), -1);

    // delete
    assert!(store.delete(&k("raw", "a")).await.unwrap());
    assert!(!store.delete(&k("raw", "a")).await.unwrap());
    assert_eq!(store.get(&k("raw", "a")).await.unwrap(), None);

    // list_keys: trailing `*` is a prefix scan, glob characters are literal
    for id in ["x", "y", "q?z", "qaz"] {
        store.set(&k("suggestions-json", id), "[]", None).await.unwrap();
    }
    store.set(&k("summarized", "x"), "s", None).await.unwrap();

    let mut listed = store
        .list_keys(&KeyPattern::parse(&format!("suggestions-json:{p}*")))
        .await
        .unwrap();
    listed.sort();
    let mut expected = vec![
        k("suggestions-json", "q?z"),
        k("suggestions-json", "qaz"),
        k("suggestions-json", "x"),
        k("suggestions-json", "y"),
    ];
    expected.sort();
    assert_eq!(listed, expected);

    let literal = store
        .list_keys(&KeyPattern::parse(&format!("suggestions-json:{p}q?*")))
        .await
        .unwrap();
    assert_eq!(literal, vec![k("suggestions-json", "q?z")]);

    let exact = store
        .list_keys(&KeyPattern::exact(k("summarized", "x")))
        .await
        .unwrap();
    assert_eq!(exact, vec![k("summarized", "x")]);

    assert!(store.health_check().await.unwrap());
}

async fn run_expiry_contract(store: Arc<dyn KeyValueStore>) {
    let p = scope();
    let short = Some(Duration::from_millis(150));

    store.set(&format!("sessions:{p}a"), "", short).await.unwrap();
    store.set(&format!("raw:{p}forever"), "v", Some(Duration::ZERO)).await.unwrap();
    store.set(&format!("quotas:{p}a"), "3", short).await.unwrap();
    assert_eq!(store.decrement(&format!("quotas:{p}a")).await.unwrap(), 2);
    assert_eq!(
        store.get(&format!("sessions:{p}a")).await.unwrap().as_deref(),
        Some("")
    );

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(store.get(&format!("sessions:{p}a")).await.unwrap(), None);
    // Decrement kept the counter's expiry.
    assert_eq!(store.get(&format!("quotas:{p}a")).await.unwrap(), None);
    assert_eq!(
        store.get(&format!("raw:{p}forever")).await.unwrap().as_deref(),
        Some("v")
    );
    assert!(store
        .list_keys(&KeyPattern::parse(&format!("sessions:{p}*")))
        .await
        .unwrap()
        .is_empty());
    // Expired keys are absent for conditional writes.
    assert!(store
        .set_if_absent(&format!("quotas:{p}a"), "10", None)
        .await
        .unwrap());
}

#[tokio::test]
async fn memory_store_contract() {
    run_contract(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn memory_store_expiry_contract() {
    run_expiry_contract(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn memory_store_concurrent_decrements_are_atomic() {
    let store = Arc::new(MemoryStore::new());
    store.set("quotas:shared", "100", None).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.decrement("quotas:shared").await.unwrap()
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(store.get("quotas:shared").await.unwrap().as_deref(), Some("50"));
}

async fn redis_store() -> Arc<dyn KeyValueStore> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".into());
    Arc::new(RedisStore::connect_url(&url).await.unwrap())
}

#[tokio::test]
#[ignore = "requires a Redis server at REDIS_URL"]
async fn redis_store_contract() {
    run_contract(redis_store().await).await;
}

#[tokio::test]
#[ignore = "requires a Redis server at REDIS_URL"]
async fn redis_store_expiry_contract() {
    run_expiry_contract(redis_store().await).await;
}
