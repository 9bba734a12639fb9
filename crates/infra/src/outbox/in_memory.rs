//! In-memory outbox store for tests/dev.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fincore_core::OutboxEventId;
use fincore_outbox::{NewOutboxEvent, OutboxEvent, OutboxStatus};

use super::store::{OutboxStore, OutboxStoreError};

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<OutboxEvent>,
    next_id: i64,
}

/// In-memory outbox store, mirroring the Postgres upsert semantics:
/// dedup applies only when both origin components are present (NULLs never
/// collide under the unique index).
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    inner: RwLock<Inner>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent, OutboxStoreError> {
        let mut inner = self.inner.write().unwrap();
        let now = Utc::now();

        if let Some(key) = event.dedup_key() {
            let existing = inner.rows.iter_mut().find(|row| {
                row.event_name == key.0
                    && row.origin.as_deref() == Some(key.1)
                    && row.origin_id == Some(key.2)
            });
            if let Some(row) = existing {
                row.payload = event.payload;
                row.status = OutboxStatus::Pending;
                row.last_error = None;
                row.max_attempts = event.max_attempts;
                row.next_attempt_at = now;
                row.updated_at = now;
                return Ok(row.clone());
            }
        }

        inner.next_id += 1;
        let row = OutboxEvent {
            id: OutboxEventId::new(inner.next_id),
            event_name: event.event_name,
            payload: event.payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            max_attempts: event.max_attempts,
            last_error: None,
            origin: event.origin,
            origin_id: event.origin_id,
            created_at: now,
            updated_at: now,
            sent_at: None,
            next_attempt_at: now,
        };
        inner.rows.push(row.clone());
        Ok(row)
    }

    async fn get(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, OutboxStoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.rows.iter().find(|row| row.id == id).cloned())
    }

    async fn update(&self, event: &OutboxEvent) -> Result<(), OutboxStoreError> {
        let mut inner = self.inner.write().unwrap();
        let row = inner
            .rows
            .iter_mut()
            .find(|row| row.id == event.id)
            .ok_or(OutboxStoreError::NotFound(event.id))?;
        *row = event.clone();
        Ok(())
    }

    async fn select_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEventId>, OutboxStoreError> {
        let inner = self.inner.read().unwrap();
        let mut due: Vec<_> = inner.rows.iter().filter(|row| row.is_due(now)).collect();
        // FIFO within the eligible set; ids break creation-time ties.
        due.sort_by_key(|row| (row.created_at, row.id));
        Ok(due.into_iter().take(limit).map(|row| row.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn rearm_collapses_to_one_row_and_resets_state() {
        let store = InMemoryOutboxStore::new();

        let first = store
            .enqueue(
                NewOutboxEvent::new("finance/payable.created", json!({"v": 1}))
                    .with_origin("finance.payables", 42),
            )
            .await
            .unwrap();

        // Drive the row to dead.
        let mut dead = first.clone();
        dead.status = OutboxStatus::Dead;
        dead.attempts = dead.max_attempts;
        dead.last_error = Some("gone".to_string());
        store.update(&dead).await.unwrap();

        let rearmed = store
            .enqueue(
                NewOutboxEvent::new("finance/payable.created", json!({"v": 2}))
                    .with_origin("finance.payables", 42),
            )
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(rearmed.id, first.id);
        assert_eq!(rearmed.status, OutboxStatus::Pending);
        assert_eq!(rearmed.last_error, None);
        assert_eq!(rearmed.payload, json!({"v": 2}));
    }

    #[tokio::test]
    async fn rows_without_a_full_origin_never_collide() {
        let store = InMemoryOutboxStore::new();

        store
            .enqueue(NewOutboxEvent::new("finance/payable.created", json!({})))
            .await
            .unwrap();
        store
            .enqueue(NewOutboxEvent::new("finance/payable.created", json!({})))
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn select_due_is_fifo_and_skips_future_rows() {
        let store = InMemoryOutboxStore::new();

        let a = store
            .enqueue(NewOutboxEvent::new("a", json!({})))
            .await
            .unwrap();
        let b = store
            .enqueue(NewOutboxEvent::new("b", json!({})))
            .await
            .unwrap();
        let mut later = store
            .enqueue(NewOutboxEvent::new("c", json!({})))
            .await
            .unwrap();
        later.next_attempt_at = Utc::now() + chrono::Duration::minutes(10);
        store.update(&later).await.unwrap();

        let due = store.select_due(10, Utc::now()).await.unwrap();
        assert_eq!(due, vec![a.id, b.id]);
    }
}
