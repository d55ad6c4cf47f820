use super::*;
use std::time::Duration;

use tokio::time::timeout;

fn store() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

fn body(text: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("text".into(), serde_json::json!(text));
    fields
}

fn texts(docs: &[Document]) -> Vec<String> {
    docs.iter()
        .filter_map(|d| d.fields.get("text").and_then(serde_json::Value::as_str).map(str::to_string))
        .collect()
}

async fn next_snapshot(sub: &mut Subscription) -> Vec<Document> {
    timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("snapshot within timeout")
        .expect("subscription open")
        .expect("query ok")
}

// =============================================================================
// Filters and ordering
// =============================================================================

#[test]
fn filter_eq_matches_exact_value() {
    let fields = body("hi");
    assert!(Filter::eq("text", "hi").matches(&fields));
    assert!(!Filter::eq("text", "hey").matches(&fields));
    assert!(!Filter::eq("missing", "hi").matches(&fields));
}

#[test]
fn filter_array_contains() {
    let mut fields = Fields::new();
    fields.insert("participants".into(), serde_json::json!(["alice", "bob"]));
    assert!(Filter::array_contains("participants", "bob").matches(&fields));
    assert!(!Filter::array_contains("participants", "carol").matches(&fields));
    assert!(!Filter::array_contains("text", "bob").matches(&body("bob")));
}

#[test]
fn order_breaks_timestamp_ties_by_seq() {
    let a = Document { id: "a".into(), seq: 1, ts: 100, fields: Fields::new() };
    let b = Document { id: "b".into(), seq: 2, ts: 100, fields: Fields::new() };
    assert_eq!(OrderBy::oldest_first().compare(&a, &b), Ordering::Less);
    assert_eq!(OrderBy::newest_first().compare(&a, &b), Ordering::Greater);
}

#[test]
fn field_order_puts_missing_last_when_descending() {
    let mut with = Fields::new();
    with.insert("updated_at".into(), serde_json::json!(5));
    let a = Document { id: "a".into(), seq: 1, ts: 1, fields: with };
    let b = Document { id: "b".into(), seq: 2, ts: 1, fields: Fields::new() };
    assert_eq!(OrderBy::field_desc("updated_at").compare(&a, &b), Ordering::Less);
}

#[test]
fn collection_paths() {
    assert_eq!(CollectionPath::messages("r1").as_str(), "rooms/r1/messages");
    assert_eq!(CollectionPath::coaching_turns("r1", "u1").to_string(), "rooms/r1/coaching/u1/turns");
    assert_ne!(CollectionPath::coaching_turns("r1", "u1"), CollectionPath::coaching_turns("r1", "u2"));
}

#[test]
fn to_fields_rejects_non_objects() {
    assert!(matches!(to_fields(&"plain"), Err(StoreError::Decode(_))));
    assert!(to_fields(&serde_json::json!({"a": 1})).is_ok());
}

#[test]
fn store_error_codes() {
    use crate::frame::ErrorCode;
    let unavailable = StoreError::Unavailable("down".into());
    assert_eq!(unavailable.error_code(), "E_STORE_UNAVAILABLE");
    assert!(unavailable.retryable());
    let missing = StoreError::NotFound { collection: "rooms".into(), id: "x".into() };
    assert_eq!(missing.error_code(), "E_NOT_FOUND");
    assert!(!missing.retryable());
}

// =============================================================================
// subscribe
// =============================================================================

#[tokio::test]
async fn subscribe_delivers_current_result_first() {
    let store = store();
    let path = CollectionPath::messages("r1");
    store.append(&path, body("hi"), None).await.expect("append");

    let mut sub = subscribe(store.clone(), Query::new(path), 8);
    let first = next_snapshot(&mut sub).await;
    assert_eq!(texts(&first), vec!["hi"]);
}

#[tokio::test]
async fn subscribe_empty_collection_yields_empty_snapshot() {
    let mut sub = subscribe(store(), Query::new(CollectionPath::messages("nobody")), 8);
    assert!(next_snapshot(&mut sub).await.is_empty());
}

#[tokio::test]
async fn subscribe_redelivers_full_result_after_append() {
    let store = store();
    let path = CollectionPath::messages("r1");
    let mut sub = subscribe(store.clone(), Query::new(path.clone()), 8);
    assert!(next_snapshot(&mut sub).await.is_empty());

    store.append(&path, body("hi"), None).await.expect("append");
    assert_eq!(texts(&next_snapshot(&mut sub).await), vec!["hi"]);

    store.append(&path, body("hey"), None).await.expect("append");
    assert_eq!(texts(&next_snapshot(&mut sub).await), vec!["hi", "hey"]);
}

#[tokio::test]
async fn subscribe_ignores_other_collections() {
    let store = store();
    let path = CollectionPath::messages("r1");
    let mut sub = subscribe(store.clone(), Query::new(path.clone()), 8);
    assert!(next_snapshot(&mut sub).await.is_empty());

    store
        .append(&CollectionPath::messages("r2"), body("elsewhere"), None)
        .await
        .expect("append");
    store.append(&path, body("here"), None).await.expect("append");

    assert_eq!(texts(&next_snapshot(&mut sub).await), vec!["here"]);
}

#[tokio::test]
async fn two_subscribers_observe_the_same_order() {
    let store = store();
    let path = CollectionPath::messages("r1");
    let mut a = subscribe(store.clone(), Query::new(path.clone()), 8);
    let mut b = subscribe(store.clone(), Query::new(path.clone()), 8);
    next_snapshot(&mut a).await;
    next_snapshot(&mut b).await;

    store.append(&path, body("one"), None).await.expect("append");
    store.append(&path, body("two"), None).await.expect("append");

    let mut last_a = Vec::new();
    while last_a.len() < 2 {
        last_a = texts(&next_snapshot(&mut a).await);
    }
    let mut last_b = Vec::new();
    while last_b.len() < 2 {
        last_b = texts(&next_snapshot(&mut b).await);
    }
    assert_eq!(last_a, vec!["one", "two"]);
    assert_eq!(last_a, last_b);
}

#[tokio::test]
async fn cancelled_subscription_yields_nothing_more() {
    let store = store();
    let path = CollectionPath::messages("r1");
    let mut sub = subscribe(store.clone(), Query::new(path.clone()), 8);
    next_snapshot(&mut sub).await;

    sub.cancel();
    store.append(&path, body("late"), None).await.expect("append");

    assert!(sub.next().await.is_none());
}

/// Store whose reads never finish. Signals when a read starts and when the
/// pending read is dropped.
struct StalledReads {
    inner: MemoryStore,
    started: Arc<tokio::sync::Notify>,
    abandoned: Arc<tokio::sync::Notify>,
}

struct NotifyOnDrop(Arc<tokio::sync::Notify>);

impl Drop for NotifyOnDrop {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

#[async_trait::async_trait]
impl Store for StalledReads {
    async fn append(&self, c: &CollectionPath, f: Fields, t: Option<&Touch>) -> Result<Document, StoreError> {
        self.inner.append(c, f, t).await
    }

    async fn put(&self, c: &CollectionPath, id: &str, f: Fields) -> Result<Document, StoreError> {
        self.inner.put(c, id, f).await
    }

    async fn update(&self, c: &CollectionPath, id: &str, f: Fields) -> Result<Document, StoreError> {
        self.inner.update(c, id, f).await
    }

    async fn get(&self, c: &CollectionPath, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(c, id).await
    }

    async fn query(&self, _query: &Query) -> Result<Vec<Document>, StoreError> {
        let _abandon = NotifyOnDrop(self.abandoned.clone());
        self.started.notify_one();
        std::future::pending().await
    }

    fn watch(&self) -> broadcast::Receiver<CollectionPath> {
        self.inner.watch()
    }
}

#[tokio::test]
async fn cancel_abandons_an_in_flight_read() {
    let started = Arc::new(tokio::sync::Notify::new());
    let abandoned = Arc::new(tokio::sync::Notify::new());
    let store: Arc<dyn Store> =
        Arc::new(StalledReads { inner: MemoryStore::new(), started: started.clone(), abandoned: abandoned.clone() });

    let mut sub = subscribe(store, Query::new(CollectionPath::messages("r1")), 8);
    timeout(Duration::from_secs(2), started.notified()).await.expect("read started");

    sub.cancel();
    timeout(Duration::from_secs(2), abandoned.notified()).await.expect("read dropped after cancel");
    assert!(sub.next().await.is_none());
}

#[tokio::test]
async fn subscribe_respects_filters_and_limit() {
    let store = store();
    let path = CollectionPath::messages("r1");
    for text in ["a", "b", "c"] {
        store.append(&path, body(text), None).await.expect("append");
    }

    let query = Query::new(path)
        .with_order(OrderBy::newest_first())
        .with_limit(2);
    let mut sub = subscribe(store.clone(), query, 8);
    assert_eq!(texts(&next_snapshot(&mut sub).await), vec!["c", "b"]);
}
