//! Postgres-backed event store implementation.
//!
//! Streams live in the `events` table, keyed by `(tenant_id, aggregate_id,
//! sequence_number)`. A batch of stream appends runs in one transaction so a
//! document transition and all of its cross-document effects commit together.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (check constraint violation) | `23514` | `InvalidAppend` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / network / other | N/A | `Backend` |

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::RuntimeFlavor;
use tracing::{Span, instrument};

use tallyerp_core::{AggregateId, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, stream_identity};

/// Schema for the event and tolerance tables.
pub const SCHEMA: &str = include_str!("schema.sql");

/// Postgres-backed append-only event store.
///
/// Every query includes `tenant_id` in the WHERE clause. Optimistic
/// concurrency is checked per stream inside the batch transaction; if another
/// transaction commits between the check and the insert, the primary key on
/// `(tenant_id, aggregate_id, sequence_number)` turns the race into a
/// concurrency error.
///
/// The `EventStore` calls block the calling thread, so the store must be used
/// from a multi-threaded tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            aggregate_id = %aggregate_id.as_uuid(),
            event_count = tracing::field::Empty
        ),
        err
    )]
    pub async fn load_stream_async(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                tenant_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE tenant_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        let mut stored_events = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = StoredEventRow::from_row(&row)
                .map_err(|e| EventStoreError::Backend(format!("failed to decode event row: {e}")))?;
            stored_events.push(stored.into());
        }

        Span::current().record("event_count", stored_events.len());
        Ok(stored_events)
    }

    /// Append a batch of stream writes in a single transaction.
    #[instrument(skip(self, batch), fields(streams = batch.len()), err)]
    pub async fn append_batch_async(
        &self,
        batch: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut planned = Vec::with_capacity(batch.len());
        let mut seen = HashSet::new();
        for append in batch {
            let Some((tenant_id, aggregate_id, aggregate_type)) = stream_identity(&append.events)? else {
                continue;
            };
            if !seen.insert((tenant_id, aggregate_id)) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {aggregate_id} appears twice in one batch"
                )));
            }
            planned.push((tenant_id, aggregate_id, aggregate_type, append));
        }

        if planned.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut committed = Vec::new();
        for (tenant_id, aggregate_id, aggregate_type, append) in planned {
            let (current_version, existing_type) =
                check_stream_version(&mut tx, tenant_id, aggregate_id).await?;

            if let Some(existing_type) = existing_type {
                if existing_type != aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{existing_type}', attempted append with '{aggregate_type}'"
                    )));
                }
            }

            if !append.expected_version.matches(current_version) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {aggregate_id}: expected {:?}, found {current_version}",
                    append.expected_version
                )));
            }

            let mut next_sequence = current_version + 1;
            for event in append.events {
                sqlx::query(
                    r#"
                    INSERT INTO events (
                        event_id,
                        tenant_id,
                        aggregate_id,
                        aggregate_type,
                        sequence_number,
                        event_type,
                        event_version,
                        occurred_at,
                        payload
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(event.event_id)
                .bind(tenant_id.as_uuid())
                .bind(aggregate_id.as_uuid())
                .bind(&aggregate_type)
                .bind(next_sequence as i64)
                .bind(&event.event_type)
                .bind(event.event_version as i32)
                .bind(event.occurred_at)
                .bind(&event.payload)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        EventStoreError::Concurrency(format!(
                            "concurrent append detected: sequence_number {next_sequence} already exists"
                        ))
                    } else {
                        map_sqlx_error("insert_event", e)
                    }
                })?;

                committed.push(StoredEvent {
                    event_id: event.event_id,
                    tenant_id: event.tenant_id,
                    aggregate_id: event.aggregate_id,
                    aggregate_type: event.aggregate_type,
                    sequence_number: next_sequence,
                    event_type: event.event_type,
                    event_version: event.event_version,
                    occurred_at: event.occurred_at,
                    payload: event.payload,
                });
                next_sequence += 1;
            }
        }

        // Dropping `tx` on any early return above rolls the batch back.
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }
}

/// Run an async store operation from the synchronous `EventStore` boundary.
///
/// Must be called from a multi-threaded tokio runtime. A current-thread
/// runtime cannot block in place, so the call fails with `Backend` instead.
pub(crate) fn block_on<F, T, E>(future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<EventStoreError>,
{
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        E::from(EventStoreError::Backend(
            "Postgres store requires a tokio runtime".to_string(),
        ))
    })?;
    if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
        return Err(E::from(EventStoreError::Backend(
            "Postgres store requires a multi-threaded tokio runtime".to_string(),
        )));
    }
    tokio::task::block_in_place(|| handle.block_on(future))
}

/// Returns `(current_version, aggregate_type)`; version 0 and `None` for a new stream.
async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) AS current_version,
            MAX(aggregate_type) AS aggregate_type
        FROM events
        WHERE tenant_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: Option<i64> = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Backend(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Backend(format!("failed to read aggregate_type: {e}")))?;

    Ok((current_version.unwrap_or(0) as u64, aggregate_type))
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

#[derive(Debug)]
struct StoredEventRow {
    event_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    aggregate_id: uuid::Uuid,
    aggregate_type: String,
    sequence_number: i64,
    event_type: String,
    event_version: i32,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            event_id: row.try_get("event_id")?,
            tenant_id: row.try_get("tenant_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            occurred_at: row.try_get("occurred_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            event_id: row.event_id,
            tenant_id: TenantId::from_uuid(row.tenant_id),
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            sequence_number: row.sequence_number as u64,
            event_type: row.event_type,
            event_version: row.event_version as u32,
            occurred_at: row.occurred_at,
            payload: row.payload,
        }
    }
}

impl EventStore for PostgresEventStore {
    fn append_batch(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.append_batch_async(batch))
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.load_stream_async(tenant_id, aggregate_id))
    }
}
