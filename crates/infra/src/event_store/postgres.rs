//! Postgres-backed event store (`events` table).
//!
//! Sequence numbers are assigned inside a transaction from the stream's
//! current maximum. Two writers racing for the same stream collide on the
//! `(tenant_id, aggregate_id, sequence_number)` unique key; the loser gets
//! [`EventStoreError::Concurrency`], same as a stale expected version.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use storefront_core::{AggregateId, ExpectedVersion, TenantId};

use super::stream::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

const SCHEMA: &str = include_str!("../../migrations/0002_events.sql");

const EVENT_COLUMNS: &str = "event_id, tenant_id, aggregate_id, aggregate_type, sequence_number, \
     event_type, event_version, occurred_at, payload";

pub struct PostgresEventStore {
    pool: PgPool,
    handle: Handle,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    /// Create `events` and its index if missing.
    pub async fn ensure_schema(pool: &PgPool) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    pub async fn load_stream_async(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE tenant_id = $1 AND aggregate_id = $2 ORDER BY sequence_number"
        );
        let rows = sqlx::query(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(*aggregate_id.as_uuid())
            .fetch_all(&self.pool)
            .instrument(info_span!("event_store", operation = "load_stream", %tenant_id, %aggregate_id))
            .await
            .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter().map(decode_event_row).collect()
    }

    pub async fn append_async(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(vec![]);
        };
        let (tenant_id, aggregate_id) = (first.tenant_id, first.aggregate_id);
        let aggregate_type = first.aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id != tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let span = info_span!(
            "event_store",
            operation = "append",
            %tenant_id,
            %aggregate_id,
            events = events.len(),
        );

        async move {
            let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;

            let (current, existing_type) = stream_head(&mut tx, tenant_id, aggregate_id).await?;
            if let Some(existing_type) = existing_type.filter(|t| *t != aggregate_type) {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{existing_type}', attempted append with '{aggregate_type}'"
                )));
            }
            if !expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "expected {expected_version:?}, found {current}"
                )));
            }

            let mut committed = Vec::with_capacity(events.len());
            for (e, sequence_number) in events.into_iter().zip(current + 1..) {
                let seq = i64::try_from(sequence_number)
                    .map_err(|_| EventStoreError::InvalidAppend("sequence_number overflow".to_string()))?;
                sqlx::query(
                    r#"
                    INSERT INTO events (
                        event_id, tenant_id, aggregate_id, aggregate_type, sequence_number,
                        event_type, event_version, occurred_at, payload
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(e.event_id)
                .bind(*tenant_id.as_uuid())
                .bind(*aggregate_id.as_uuid())
                .bind(&e.aggregate_type)
                .bind(seq)
                .bind(&e.event_type)
                .bind(i32::try_from(e.event_version).unwrap_or(i32::MAX))
                .bind(e.occurred_at)
                .bind(&e.payload)
                .execute(&mut *tx)
                .await
                .map_err(|err| map_sqlx_error("insert_event", err))?;

                committed.push(StoredEvent {
                    event_id: e.event_id,
                    tenant_id: e.tenant_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                });
            }

            // Dropping `tx` on an early return rolls it back.
            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
            debug!(committed = committed.len(), "events appended");
            Ok(committed)
        }
        .instrument(span)
        .await
    }

    async fn load_where(
        &self,
        operation: &'static str,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let filter = if tenant_id.is_some() { "WHERE tenant_id = $1" } else { "" };
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events {filter} \
             ORDER BY tenant_id, aggregate_id, sequence_number"
        );
        let mut query = sqlx::query(&sql);
        if let Some(tenant_id) = tenant_id {
            query = query.bind(*tenant_id.as_uuid());
        }
        let rows = query
            .fetch_all(&self.pool)
            .instrument(info_span!("event_store", operation))
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        rows.iter().map(decode_event_row).collect()
    }
}

/// Current version and aggregate type of a stream, `(0, None)` when empty.
async fn stream_head(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(sequence_number), 0) AS current_version,
               MAX(aggregate_type) AS aggregate_type
        FROM events
        WHERE tenant_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(*tenant_id.as_uuid())
    .bind(*aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("stream_head", e))?;

    let current: i64 = row.try_get("current_version").map_err(|e| map_sqlx_error("stream_head", e))?;
    let aggregate_type: Option<String> = row.try_get("aggregate_type").map_err(|e| map_sqlx_error("stream_head", e))?;
    Ok((u64::try_from(current).unwrap_or_default(), aggregate_type))
}

fn decode_event_row(row: &PgRow) -> Result<StoredEvent, EventStoreError> {
    let decode = || -> Result<StoredEvent, sqlx::Error> {
        let tenant_id: Uuid = row.try_get("tenant_id")?;
        let aggregate_id: Uuid = row.try_get("aggregate_id")?;
        let sequence_number: i64 = row.try_get("sequence_number")?;
        let event_version: i32 = row.try_get("event_version")?;

        Ok(StoredEvent {
            event_id: row.try_get("event_id")?,
            tenant_id: TenantId::from_uuid(tenant_id),
            aggregate_id: AggregateId::from_uuid(aggregate_id),
            aggregate_type: row.try_get("aggregate_type")?,
            sequence_number: u64::try_from(sequence_number).unwrap_or_default(),
            event_type: row.try_get("event_type")?,
            event_version: u32::try_from(event_version).unwrap_or_default(),
            occurred_at: row.try_get("occurred_at")?,
            payload: row.try_get("payload")?,
        })
    };

    decode().map_err(|e| EventStoreError::InvalidAppend(format!("failed to decode event row: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let msg = format!("database error in {operation}: {}", db.message());
            match db.code().as_deref() {
                // unique_violation: another writer took this sequence number
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Backend(msg),
            }
        }
        _ => EventStoreError::Backend(format!("{operation}: {err}")),
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        crate::blocking::block_on(&self.handle, self.append_async(events, expected_version))
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        crate::blocking::block_on(&self.handle, self.load_stream_async(tenant_id, aggregate_id))
    }

    fn load_tenant(&self, tenant_id: TenantId) -> Result<Vec<StoredEvent>, EventStoreError> {
        crate::blocking::block_on(&self.handle, self.load_where("load_tenant", Some(tenant_id)))
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        crate::blocking::block_on(&self.handle, self.load_where("load_all", None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;

    /// Skipped unless `DATABASE_URL` points at a scratch database.
    async fn store() -> Option<PostgresEventStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.unwrap();
        PostgresEventStore::ensure_schema(&pool).await.unwrap();
        Some(PostgresEventStore::new(pool, Handle::current()))
    }

    fn event(tenant_id: TenantId, aggregate_id: AggregateId) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: "products.product".to_string(),
            event_type: "products.product.created".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({ "name": "Test Product" }),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn append_load_and_conflict() {
        let Some(store) = store().await else {
            return;
        };
        let t = TenantId::new();
        let a = AggregateId::new();

        let first = store.append(vec![event(t, a)], ExpectedVersion::Exact(0)).unwrap();
        let next = store
            .append(vec![event(t, a), event(t, a)], ExpectedVersion::Exact(1))
            .unwrap();
        assert_eq!(first[0].sequence_number, 1);
        assert_eq!(next.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![2, 3]);

        let loaded = store.load_stream(t, a).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].payload, json!({ "name": "Test Product" }));
        assert_eq!(store.load_tenant(t).unwrap().len(), 3);
        assert!(store.load_stream(TenantId::new(), a).unwrap().is_empty());

        let err = store.append(vec![event(t, a)], ExpectedVersion::Exact(1)).unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }
}
