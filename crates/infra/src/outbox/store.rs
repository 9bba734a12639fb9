//! Outbox store abstraction.
//!
//! Producers only `enqueue` (insert or re-arm); status transitions go
//! through `update` and are owned exclusively by the dispatcher. Rows are
//! never deleted; `sent` and `dead` are retained for audit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use fincore_core::OutboxEventId;
use fincore_outbox::{NewOutboxEvent, OutboxEvent};

#[derive(Debug, Error)]
pub enum OutboxStoreError {
    #[error("outbox event not found: {0}")]
    NotFound(OutboxEventId),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new row, or re-arm the existing row with the same
    /// `(event_name, origin, origin_id)` identity: reset to `pending`,
    /// replace the payload, clear the error, make it due now.
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent, OutboxStoreError>;

    async fn get(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, OutboxStoreError>;

    /// Persist a dispatcher-owned transition.
    async fn update(&self, event: &OutboxEvent) -> Result<(), OutboxStoreError>;

    /// Ids of rows eligible for delivery at `now`, oldest first.
    async fn select_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEventId>, OutboxStoreError>;
}

#[async_trait]
impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent, OutboxStoreError> {
        (**self).enqueue(event).await
    }

    async fn get(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, OutboxStoreError> {
        (**self).get(id).await
    }

    async fn update(&self, event: &OutboxEvent) -> Result<(), OutboxStoreError> {
        (**self).update(event).await
    }

    async fn select_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEventId>, OutboxStoreError> {
        (**self).select_due(limit, now).await
    }
}
