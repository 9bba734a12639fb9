//! Postgres-backed outbox store.
//!
//! Enqueue is an upsert on the `(event_name, origin, origin_id)` unique
//! index, so a concurrent producer and a re-arm of a dead row both land on
//! the same row. Rows with a NULL origin component never collide under the
//! index, matching the "no dedup identity" case.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use fincore_core::OutboxEventId;
use fincore_outbox::{NewOutboxEvent, OutboxEvent, OutboxStatus};

use super::store::{OutboxStore, OutboxStoreError};

/// Postgres implementation of [`OutboxStore`].
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self, event), fields(event_name = %event.event_name), err)]
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent, OutboxStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO event_outbox (
                event_name, payload, status, attempts, max_attempts,
                origin, origin_id, next_attempt_at
            )
            VALUES ($1, $2, 'pending', 0, $3, $4, $5, NOW())
            ON CONFLICT (event_name, origin, origin_id) DO UPDATE SET
                payload = EXCLUDED.payload,
                status = 'pending',
                last_error = NULL,
                max_attempts = EXCLUDED.max_attempts,
                next_attempt_at = NOW(),
                updated_at = NOW()
            RETURNING id, event_name, payload, status, attempts, max_attempts,
                      last_error, origin, origin_id, created_at, updated_at,
                      sent_at, next_attempt_at
            "#,
        )
        .bind(&event.event_name)
        .bind(&event.payload)
        .bind(event.max_attempts)
        .bind(&event.origin)
        .bind(event.origin_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        let parsed = OutboxRow::from_row(&row)
            .map_err(|e| OutboxStoreError::Persistence(format!("bad outbox row: {e}")))?;
        parsed.try_into()
    }

    async fn get(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, OutboxStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, event_name, payload, status, attempts, max_attempts,
                   last_error, origin, origin_id, created_at, updated_at,
                   sent_at, next_attempt_at
            FROM event_outbox
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|row| {
            let parsed = OutboxRow::from_row(&row)
                .map_err(|e| OutboxStoreError::Persistence(format!("bad outbox row: {e}")))?;
            OutboxEvent::try_from(parsed)
        })
        .transpose()
    }

    #[instrument(skip(self, event), fields(outbox_id = %event.id, status = %event.status), err)]
    async fn update(&self, event: &OutboxEvent) -> Result<(), OutboxStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE event_outbox SET
                payload = $2,
                status = $3,
                attempts = $4,
                max_attempts = $5,
                last_error = $6,
                sent_at = $7,
                next_attempt_at = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(event.id.get())
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.attempts)
        .bind(event.max_attempts)
        .bind(&event.last_error)
        .bind(event.sent_at)
        .bind(event.next_attempt_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(OutboxStoreError::NotFound(event.id));
        }
        Ok(())
    }

    async fn select_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEventId>, OutboxStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM event_outbox
            WHERE status IN ('pending', 'failed')
              AND attempts < max_attempts
              AND next_attempt_at <= $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_due", e))?;

        rows.iter()
            .map(|row| {
                let id: i64 = row
                    .try_get("id")
                    .map_err(|e| OutboxStoreError::Persistence(format!("missing id: {e}")))?;
                Ok(OutboxEventId::new(id))
            })
            .collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxStoreError {
    OutboxStoreError::Persistence(format!("{operation}: {err}"))
}

// SQLx row type

#[derive(Debug)]
struct OutboxRow {
    id: i64,
    event_name: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    origin: Option<String>,
    origin_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    next_attempt_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for OutboxRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxRow {
            id: row.try_get("id")?,
            event_name: row.try_get("event_name")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            last_error: row.try_get("last_error")?,
            origin: row.try_get("origin")?,
            origin_id: row.try_get("origin_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            sent_at: row.try_get("sent_at")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
        })
    }
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = OutboxStoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OutboxStatus>()
            .map_err(|e| OutboxStoreError::Persistence(format!("bad outbox status: {e}")))?;
        Ok(OutboxEvent {
            id: OutboxEventId::new(row.id),
            event_name: row.event_name,
            payload: row.payload,
            status,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            origin: row.origin,
            origin_id: row.origin_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
            next_attempt_at: row.next_attempt_at,
        })
    }
}
