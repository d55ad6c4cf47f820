//! Store adapter: ordered document collections with change notifications.
//!
//! DESIGN
//! ======
//! Everything above this module talks to an `Arc<dyn Store>`: a generic
//! ordered-document store addressed by collection path. The adapter owns the
//! clock. Every appended document is stamped with `ts` (milliseconds since
//! epoch) and `seq` (insertion order) at write time, and `(ts, seq)` is the
//! one total order used for reads and live feeds.
//!
//! Live feeds are built on top of `Store::watch`, a broadcast of collection
//! paths that changed. A subscription re-runs its query on every matching
//! notification and delivers the whole ordered result, never a delta.
//!
//! TRADE-OFFS
//! ==========
//! Re-querying on every change is O(collection) per write. Rooms and coaching
//! channels are small, and full snapshots keep consumers free of diff logic.

pub mod memory;
pub mod postgres;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Document body. Alias to reduce noise in signatures.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Capacity of the in-process change notification hub.
pub(crate) const CHANGE_HUB_CAPACITY: usize = 1024;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
    #[error("document decode failed: {0}")]
    Decode(String),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
            Self::NotFound { .. } => "E_NOT_FOUND",
            Self::Decode(_) => "E_DECODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

// =============================================================================
// ADDRESSING
// =============================================================================

/// Slash-separated collection address, e.g. `rooms/{room_id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    #[must_use]
    pub fn rooms() -> Self {
        Self("rooms".into())
    }

    #[must_use]
    pub fn users() -> Self {
        Self("users".into())
    }

    #[must_use]
    pub fn messages(room_id: &str) -> Self {
        Self(format!("rooms/{room_id}/messages"))
    }

    /// Private coaching turns of one user inside one room.
    #[must_use]
    pub fn coaching_turns(room_id: &str, user_id: &str) -> Self {
        Self(format!("rooms/{room_id}/coaching/{user_id}/turns"))
    }

    /// Rebuild a path received from a notification payload.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A field on another document to advance to the timestamp of a new append.
#[derive(Debug, Clone)]
pub struct Touch {
    pub collection: CollectionPath,
    pub id: String,
    pub field: String,
}

// =============================================================================
// DOCUMENT
// =============================================================================

/// A stored document with its adapter-assigned identity and ordering keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    /// Insertion order. Breaks `ts` ties.
    pub seq: i64,
    /// Adapter clock at write time, milliseconds since Unix epoch.
    pub ts: i64,
    pub fields: Fields,
}

impl Document {
    #[must_use]
    pub fn i64_field(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(serde_json::Value::as_i64)
    }

    /// Deserialize the document body into a typed record.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(serde_json::Value::Object(self.fields.clone()))
            .map_err(|e| StoreError::Decode(format!("{}: {e}", self.id)))
    }
}

/// Serialize a typed record into a document body.
///
/// # Errors
///
/// Returns `Decode` if `value` does not serialize to a JSON object.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Decode(format!("expected object, got {other}"))),
        Err(e) => Err(StoreError::Decode(e.to_string())),
    }
}

// =============================================================================
// QUERY
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: serde_json::Value },
    /// Field is an array containing `value`.
    ArrayContains { field: String, value: serde_json::Value },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Eq { field: field.into(), value: value.into() }
    }

    pub fn array_contains(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::ArrayContains { field: field.into(), value: value.into() }
    }

    pub(crate) fn matches(&self, fields: &Fields) -> bool {
        match self {
            Self::Eq { field, value } => fields.get(field) == Some(value),
            Self::ArrayContains { field, value } => fields
                .get(field)
                .and_then(|v| v.as_array())
                .is_some_and(|items| items.contains(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    /// Adapter timestamp, ties broken by insertion order.
    Timestamp,
    /// A numeric or string body field, ties broken by insertion order.
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub key: OrderKey,
    pub direction: Direction,
}

impl OrderBy {
    #[must_use]
    pub fn oldest_first() -> Self {
        Self { key: OrderKey::Timestamp, direction: Direction::Asc }
    }

    #[must_use]
    pub fn newest_first() -> Self {
        Self { key: OrderKey::Timestamp, direction: Direction::Desc }
    }

    pub fn field_desc(field: impl Into<String>) -> Self {
        Self { key: OrderKey::Field(field.into()), direction: Direction::Desc }
    }

    pub(crate) fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let primary = match &self.key {
            OrderKey::Timestamp => a.ts.cmp(&b.ts),
            OrderKey::Field(field) => compare_values(a.fields.get(field), b.fields.get(field)),
        };
        let ordering = primary.then(a.seq.cmp(&b.seq));
        match self.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

/// Missing sorts before present; numbers compare numerically, strings lexically.
fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.as_str().unwrap_or("").cmp(b.as_str().unwrap_or("")),
        },
    }
}

/// A read over one collection.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order: OrderBy,
    pub limit: Option<usize>,
}

impl Query {
    /// All documents of `collection`, oldest first.
    #[must_use]
    pub fn new(collection: CollectionPath) -> Self {
        Self { collection, filters: Vec::new(), order: OrderBy::oldest_first(), limit: None }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Ordered document store with change notifications.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Append a new document with an adapter-assigned id, `ts` and `seq`.
    ///
    /// When `touch` is given, the referenced field is advanced to the new
    /// document's `ts` in the same write. It is never moved backwards.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the write could not be made durable, `NotFound` if the
    /// touch target does not exist. Nothing is written on error.
    async fn append(
        &self,
        collection: &CollectionPath,
        fields: Fields,
        touch: Option<&Touch>,
    ) -> Result<Document, StoreError>;

    /// Create or replace a document under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the write fails.
    async fn put(&self, collection: &CollectionPath, id: &str, fields: Fields) -> Result<Document, StoreError>;

    /// Shallow-merge `patch` into an existing document.
    ///
    /// # Errors
    ///
    /// `NotFound` if the document does not exist, `Unavailable` if the write fails.
    async fn update(&self, collection: &CollectionPath, id: &str, patch: Fields) -> Result<Document, StoreError>;

    /// # Errors
    ///
    /// `Unavailable` if the read fails.
    async fn get(&self, collection: &CollectionPath, id: &str) -> Result<Option<Document>, StoreError>;

    /// # Errors
    ///
    /// `Unavailable` if the read fails.
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Change notifications: the path of every collection written to.
    fn watch(&self) -> broadcast::Receiver<CollectionPath>;
}

/// Current adapter clock as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// One delivery of a live feed: the whole ordered result, or the read error.
pub type Snapshot = Result<Vec<Document>, StoreError>;

/// Live, cancellable feed of query snapshots.
///
/// The consumer owns the lifetime. `cancel` or drop stops the background
/// task; `next` returns `None` from then on, even if snapshots were buffered.
pub struct Subscription {
    rx: mpsc::Receiver<Snapshot>,
    token: CancellationToken,
}

impl Subscription {
    /// Wait for the next snapshot. `None` once cancelled or the store closed.
    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            () = self.token.cancelled() => None,
            snapshot = self.rx.recv() => snapshot,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Open a live feed over `query`.
///
/// The current result is delivered immediately, then again after every write
/// to the query's collection. A lagging notification stream collapses into a
/// single re-query.
pub fn subscribe(store: Arc<dyn Store>, query: Query, buffer: usize) -> Subscription {
    let (tx, rx) = mpsc::channel::<Snapshot>(buffer.max(1));
    let token = CancellationToken::new();
    // Register before the first read so no write slips between the two.
    let mut changes = store.watch();
    let task_token = token.clone();

    tokio::spawn(async move {
        let collection = query.collection.clone();
        let mut stale = true;

        loop {
            if stale {
                stale = false;
                let snapshot = tokio::select! {
                    () = task_token.cancelled() => break,
                    snapshot = store.query(&query) => snapshot,
                };
                if let Err(e) = &snapshot {
                    warn!(%collection, error = %e, "subscription: query failed");
                }
                tokio::select! {
                    () = task_token.cancelled() => break,
                    sent = tx.send(snapshot) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }

            tokio::select! {
                () = task_token.cancelled() => break,
                changed = changes.recv() => match changed {
                    Ok(path) => stale = path == collection,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(%collection, skipped, "subscription: notifications lagged; re-querying");
                        stale = true;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!(%collection, "subscription: closed");
    });

    Subscription { rx, token }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
