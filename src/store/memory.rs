//! In-process store backed by a `RwLock<HashMap>`.
//!
//! Used when no database is configured and by unit tests. Writes hold the
//! lock for the whole append-plus-touch, so readers never observe a message
//! without its room having been advanced.

use std::collections::HashMap;

use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use super::{CHANGE_HUB_CAPACITY, CollectionPath, Document, Fields, Query, Store, StoreError, Touch, now_ms};

pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    changes: broadcast::Sender<CollectionPath>,
}

#[derive(Default)]
struct MemoryInner {
    /// Documents per collection, in insertion order.
    collections: HashMap<CollectionPath, Vec<Document>>,
    next_seq: i64,
    last_ts: i64,
}

impl MemoryInner {
    /// Next `(seq, ts)` pair. `ts` never goes backwards, even if the wall clock does.
    fn stamp(&mut self) -> (i64, i64) {
        self.next_seq += 1;
        self.last_ts = self.last_ts.max(now_ms());
        (self.next_seq, self.last_ts)
    }

    fn find_mut(&mut self, collection: &CollectionPath, id: &str) -> Option<&mut Document> {
        self.collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_HUB_CAPACITY);
        Self { inner: RwLock::new(MemoryInner::default()), changes }
    }

    fn notify(&self, collection: &CollectionPath) {
        // No receivers is fine: nobody is subscribed yet.
        let _ = self.changes.send(collection.clone());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn append(
        &self,
        collection: &CollectionPath,
        fields: Fields,
        touch: Option<&Touch>,
    ) -> Result<Document, StoreError> {
        let doc = {
            let mut inner = self.inner.write().await;

            // Check the touch target before writing anything.
            if let Some(t) = touch {
                if inner.find_mut(&t.collection, &t.id).is_none() {
                    return Err(StoreError::NotFound { collection: t.collection.to_string(), id: t.id.clone() });
                }
            }

            let (seq, ts) = inner.stamp();
            let doc = Document { id: Uuid::new_v4().to_string(), seq, ts, fields };
            inner
                .collections
                .entry(collection.clone())
                .or_default()
                .push(doc.clone());

            if let Some(t) = touch {
                if let Some(target) = inner.find_mut(&t.collection, &t.id) {
                    let current = target.i64_field(&t.field).unwrap_or(i64::MIN);
                    target
                        .fields
                        .insert(t.field.clone(), serde_json::json!(current.max(ts)));
                }
            }
            doc
        };

        self.notify(collection);
        if let Some(t) = touch {
            self.notify(&t.collection);
        }
        Ok(doc)
    }

    async fn put(&self, collection: &CollectionPath, id: &str, fields: Fields) -> Result<Document, StoreError> {
        let doc = {
            let mut inner = self.inner.write().await;
            if let Some(existing) = inner.find_mut(collection, id) {
                existing.fields = fields;
                existing.clone()
            } else {
                let (seq, ts) = inner.stamp();
                let doc = Document { id: id.to_string(), seq, ts, fields };
                inner
                    .collections
                    .entry(collection.clone())
                    .or_default()
                    .push(doc.clone());
                doc
            }
        };
        self.notify(collection);
        Ok(doc)
    }

    async fn update(&self, collection: &CollectionPath, id: &str, patch: Fields) -> Result<Document, StoreError> {
        let doc = {
            let mut inner = self.inner.write().await;
            let Some(existing) = inner.find_mut(collection, id) else {
                return Err(StoreError::NotFound { collection: collection.to_string(), id: id.to_string() });
            };
            existing.fields.extend(patch);
            existing.clone()
        };
        self.notify(collection);
        Ok(doc)
    }

    async fn get(&self, collection: &CollectionPath, id: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
            .cloned())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let inner = self.inner.read().await;
        let Some(docs) = inner.collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|d| query.filters.iter().all(|f| f.matches(&d.fields)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| query.order.compare(a, b));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    fn watch(&self) -> broadcast::Receiver<CollectionPath> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
