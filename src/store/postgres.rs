//! Postgres-backed store.
//!
//! DESIGN
//! ======
//! All collections share one `documents` table keyed by `(collection, id)`.
//! `seq` is a `BIGSERIAL` and `ts` is taken from the database clock inside
//! the insert, so every process writing to the same database agrees on one
//! order per collection.
//!
//! Each write transaction also calls `pg_notify` with the collection path.
//! A `PgListener` task forwards those notifications into the local change
//! hub, which means subscriptions see writes from other processes too.
//!
//! ERROR HANDLING
//! ==============
//! Every sqlx error surfaces as `StoreError::Unavailable`. A failed append
//! drops its transaction, so the message row and the touched field are
//! written together or not at all.

use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{PgPool, QueryBuilder};
use tokio::sync::broadcast;
use tracing::{error, info};
use uuid::Uuid;

use super::{
    CHANGE_HUB_CAPACITY, CollectionPath, Direction, Document, Fields, Filter, OrderKey, Query, Store, StoreError,
    Touch,
};

/// `LISTEN`/`NOTIFY` channel carrying collection paths.
const NOTIFY_CHANNEL: &str = "document_changes";
const LISTENER_RETRY_MS: u64 = 1000;

/// Database clock as milliseconds since epoch.
const DB_NOW_MS: &str = "(extract(epoch FROM clock_timestamp()) * 1000)::bigint";

type DocumentRow = (String, i64, i64, Json<Fields>);

fn row_to_document((id, seq, ts, Json(fields)): DocumentRow) -> Document {
    Document { id, seq, ts, fields }
}

pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<CollectionPath>,
}

impl PgStore {
    /// Wrap a migrated pool and start forwarding change notifications.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_HUB_CAPACITY);
        tokio::spawn(run_listener(pool.clone(), changes.clone()));
        Self { pool, changes }
    }
}

async fn run_listener(pool: PgPool, changes: broadcast::Sender<CollectionPath>) {
    loop {
        if let Err(e) = listen(&pool, &changes).await {
            error!(error = %e, "store: change listener failed; reconnecting");
        }
        tokio::time::sleep(Duration::from_millis(LISTENER_RETRY_MS)).await;
    }
}

async fn listen(pool: &PgPool, changes: &broadcast::Sender<CollectionPath>) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(NOTIFY_CHANNEL).await?;
    info!(channel = NOTIFY_CHANNEL, "store: listening for changes");

    loop {
        let notification = listener.recv().await?;
        let _ = changes.send(CollectionPath::from_raw(notification.payload()));
    }
}

async fn notify<'e, E>(executor: E, collection: &CollectionPath) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(NOTIFY_CHANNEL)
        .bind(collection.as_str())
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn append(
        &self,
        collection: &CollectionPath,
        fields: Fields,
        touch: Option<&Touch>,
    ) -> Result<Document, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "INSERT INTO documents (collection, id, ts, data)
             VALUES ($1, $2, {DB_NOW_MS}, $3)
             RETURNING id, seq, ts, data"
        ))
        .bind(collection.as_str())
        .bind(Uuid::new_v4().to_string())
        .bind(Json(&fields))
        .fetch_one(tx.as_mut())
        .await?;
        let doc = row_to_document(row);

        if let Some(t) = touch {
            let touched = sqlx::query(
                "UPDATE documents
                 SET data = jsonb_set(
                     data,
                     ARRAY[$3::text],
                     to_jsonb(GREATEST(COALESCE((data->>$3)::bigint, $4), $4))
                 )
                 WHERE collection = $1 AND id = $2",
            )
            .bind(t.collection.as_str())
            .bind(&t.id)
            .bind(&t.field)
            .bind(doc.ts)
            .execute(tx.as_mut())
            .await?;

            if touched.rows_affected() == 0 {
                // Dropping `tx` rolls the insert back.
                return Err(StoreError::NotFound { collection: t.collection.to_string(), id: t.id.clone() });
            }
            notify(tx.as_mut(), &t.collection).await?;
        }

        notify(tx.as_mut(), collection).await?;
        tx.commit().await?;
        Ok(doc)
    }

    async fn put(&self, collection: &CollectionPath, id: &str, fields: Fields) -> Result<Document, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "INSERT INTO documents (collection, id, ts, data)
             VALUES ($1, $2, {DB_NOW_MS}, $3)
             ON CONFLICT (collection, id) DO UPDATE SET data = EXCLUDED.data
             RETURNING id, seq, ts, data"
        ))
        .bind(collection.as_str())
        .bind(id)
        .bind(Json(&fields))
        .fetch_one(tx.as_mut())
        .await?;
        notify(tx.as_mut(), collection).await?;
        tx.commit().await?;
        Ok(row_to_document(row))
    }

    async fn update(&self, collection: &CollectionPath, id: &str, patch: Fields) -> Result<Document, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, DocumentRow>(
            "UPDATE documents SET data = data || $3
             WHERE collection = $1 AND id = $2
             RETURNING id, seq, ts, data",
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(Json(&patch))
        .fetch_optional(tx.as_mut())
        .await?;

        let Some(row) = row else {
            return Err(StoreError::NotFound { collection: collection.to_string(), id: id.to_string() });
        };
        notify(tx.as_mut(), collection).await?;
        tx.commit().await?;
        Ok(row_to_document(row))
    }

    async fn get(&self, collection: &CollectionPath, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, seq, ts, data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_document))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut builder = QueryBuilder::new("SELECT id, seq, ts, data FROM documents WHERE collection = ");
        builder.push_bind(query.collection.as_str());

        for filter in &query.filters {
            match filter {
                Filter::Eq { field, value } => {
                    builder.push(" AND data->");
                    builder.push_bind(field.as_str());
                    builder.push(" = ");
                    builder.push_bind(Json(value.clone()));
                }
                Filter::ArrayContains { field, value } => {
                    builder.push(" AND data->");
                    builder.push_bind(field.as_str());
                    builder.push(" @> ");
                    builder.push_bind(Json(serde_json::json!([value])));
                }
            }
        }

        // Missing fields sort as the smallest value, matching the memory store.
        let (direction, nulls) = match query.order.direction {
            Direction::Asc => ("ASC", "NULLS FIRST"),
            Direction::Desc => ("DESC", "NULLS LAST"),
        };
        match &query.order.key {
            OrderKey::Timestamp => {
                builder.push(format!(" ORDER BY ts {direction}, seq {direction}"));
            }
            OrderKey::Field(field) => {
                builder.push(" ORDER BY data->");
                builder.push_bind(field.as_str());
                builder.push(format!(" {direction} {nulls}, seq {direction}"));
            }
        }

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build_query_as::<DocumentRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_document).collect())
    }

    fn watch(&self) -> broadcast::Receiver<CollectionPath> {
        self.changes.subscribe()
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
