//! Outbox dispatcher and drainer.
//!
//! The dispatcher owns every status transition. Transport failures are
//! recovered locally by the backoff state machine (recorded, never
//! re-thrown); a row that exhausts its attempts is parked as `dead` for
//! operator tooling to find.
//!
//! Draining is pull-based: an external scheduler calls `process_pending`
//! periodically. Dispatch of a given row is not mutually exclusive across
//! drainers; run a single active drainer at a time.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use fincore_core::OutboxEventId;
use fincore_outbox::{EventTransport, OutboxEvent, OutboxStatus};

use super::store::{OutboxStore, OutboxStoreError};

/// Default batch size for one drain pass.
pub const DEFAULT_DRAIN_LIMIT: usize = 20;

/// Hard ceiling on one drain pass.
pub const MAX_DRAIN_LIMIT: usize = 200;

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub id: OutboxEventId,
    pub event_name: String,
    pub status: OutboxStatus,
    pub sent: bool,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error: Option<String>,
}

impl DispatchResult {
    fn from_event(event: &OutboxEvent, sent: bool) -> Self {
        Self {
            id: event.id,
            event_name: event.event_name.clone(),
            status: event.status,
            sent,
            attempts: event.attempts,
            max_attempts: event.max_attempts,
            error: event.last_error.clone(),
        }
    }
}

/// Tally of one drain pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub dead: usize,
    pub results: Vec<DispatchResult>,
}

/// Sends outbox rows to the external bus and records the outcome.
#[derive(Debug, Clone)]
pub struct OutboxDispatcher<S, T> {
    store: S,
    transport: T,
}

impl<S, T> OutboxDispatcher<S, T>
where
    S: OutboxStore,
    T: EventTransport,
{
    pub fn new(store: S, transport: T) -> Self {
        Self { store, transport }
    }

    /// Dispatch one row by id.
    ///
    /// A row already in `sent` is a success no-op. A missing row is
    /// `NotFound`.
    #[instrument(skip(self), fields(outbox_id = %id), err)]
    pub async fn dispatch(&self, id: OutboxEventId) -> Result<DispatchResult, OutboxStoreError> {
        let mut event = self
            .store
            .get(id)
            .await?
            .ok_or(OutboxStoreError::NotFound(id))?;

        if event.status == OutboxStatus::Sent {
            return Ok(DispatchResult::from_event(&event, true));
        }

        let now = Utc::now();
        match self.transport.send(&event.event_name, &event.payload).await {
            Ok(()) => {
                event.mark_sent(now);
                self.store.update(&event).await?;
                info!(event_name = %event.event_name, attempts = event.attempts, "outbox event sent");
                Ok(DispatchResult::from_event(&event, true))
            }
            Err(err) => {
                event.mark_failed(&err.to_string(), now);
                self.store.update(&event).await?;
                warn!(
                    event_name = %event.event_name,
                    attempts = event.attempts,
                    status = %event.status,
                    next_attempt_at = %event.next_attempt_at,
                    "outbox dispatch failed"
                );
                Ok(DispatchResult::from_event(&event, false))
            }
        }
    }

    /// Drain up to `limit` due rows (clamped to 1..=200, default 20),
    /// oldest first, one at a time.
    #[instrument(skip(self), err)]
    pub async fn process_pending(
        &self,
        limit: Option<usize>,
    ) -> Result<DrainReport, OutboxStoreError> {
        let limit = limit.unwrap_or(DEFAULT_DRAIN_LIMIT).clamp(1, MAX_DRAIN_LIMIT);
        let due = self.store.select_due(limit, Utc::now()).await?;

        let mut results = Vec::with_capacity(due.len());
        for id in due {
            results.push(self.dispatch(id).await?);
        }

        let sent = results.iter().filter(|r| r.sent).count();
        let failed = results
            .iter()
            .filter(|r| !r.sent && r.status == OutboxStatus::Failed)
            .count();
        let dead = results
            .iter()
            .filter(|r| !r.sent && r.status == OutboxStatus::Dead)
            .count();

        info!(processed = results.len(), sent, failed, dead, "outbox drain complete");

        Ok(DrainReport {
            processed: results.len(),
            sent,
            failed,
            dead,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use fincore_outbox::{InMemoryTransport, NewOutboxEvent};

    use crate::outbox::InMemoryOutboxStore;

    type TestDispatcher = OutboxDispatcher<Arc<InMemoryOutboxStore>, Arc<InMemoryTransport>>;

    fn setup() -> (TestDispatcher, Arc<InMemoryOutboxStore>, Arc<InMemoryTransport>) {
        fincore_observability::init();
        let store = InMemoryOutboxStore::arc();
        let transport = InMemoryTransport::arc();
        (
            OutboxDispatcher::new(store.clone(), transport.clone()),
            store,
            transport,
        )
    }

    #[tokio::test]
    async fn dispatch_sends_and_records_success() {
        let (dispatcher, store, transport) = setup();
        let row = store
            .enqueue(NewOutboxEvent::new("finance/payable.created", json!({"id": 42})))
            .await
            .unwrap();

        let result = dispatcher.dispatch(row.id).await.unwrap();
        assert!(result.sent);
        assert_eq!(result.status, OutboxStatus::Sent);
        assert_eq!(result.attempts, 1);
        assert_eq!(transport.delivered_count(), 1);

        let stored = store.get(row.id).await.unwrap().unwrap();
        assert!(stored.sent_at.is_some());
        assert_eq!(stored.last_error, None);
    }

    #[tokio::test]
    async fn dispatch_of_a_sent_row_is_a_no_op() {
        let (dispatcher, store, transport) = setup();
        let row = store
            .enqueue(NewOutboxEvent::new("finance/payable.created", json!({})))
            .await
            .unwrap();

        dispatcher.dispatch(row.id).await.unwrap();
        let again = dispatcher.dispatch(row.id).await.unwrap();

        assert!(again.sent);
        assert_eq!(again.attempts, 1);
        assert_eq!(transport.delivered_count(), 1);
    }

    #[tokio::test]
    async fn dispatch_of_a_missing_row_is_not_found() {
        let (dispatcher, _store, _transport) = setup();
        let err = dispatcher
            .dispatch(OutboxEventId::new(777))
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn failure_records_backoff_and_error() {
        let (dispatcher, store, transport) = setup();
        transport.fail_with("bus unreachable");
        let row = store
            .enqueue(NewOutboxEvent::new("finance/payable.created", json!({})))
            .await
            .unwrap();

        let before = Utc::now();
        let result = dispatcher.dispatch(row.id).await.unwrap();

        assert!(!result.sent);
        assert_eq!(result.status, OutboxStatus::Failed);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error.as_deref(), Some("event bus rejected the send: bus unreachable"));

        let stored = store.get(row.id).await.unwrap().unwrap();
        assert!(stored.next_attempt_at >= before + chrono::Duration::minutes(2));
    }

    #[tokio::test]
    async fn exhausted_rows_go_dead_and_leave_the_drain_set() {
        let (dispatcher, store, transport) = setup();
        transport.fail_with("bus unreachable");
        let row = store
            .enqueue(
                NewOutboxEvent::new("finance/payable.created", json!({})).with_max_attempts(2),
            )
            .await
            .unwrap();

        dispatcher.dispatch(row.id).await.unwrap();

        // Make the row due again despite the backoff.
        let mut stored = store.get(row.id).await.unwrap().unwrap();
        stored.next_attempt_at = Utc::now();
        store.update(&stored).await.unwrap();

        let result = dispatcher.dispatch(row.id).await.unwrap();
        assert_eq!(result.status, OutboxStatus::Dead);

        let report = dispatcher.process_pending(None).await.unwrap();
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn drain_dispatches_only_due_rows() {
        let (dispatcher, store, _transport) = setup();

        let mut due_ids = Vec::new();
        for i in 0..3 {
            let row = store
                .enqueue(NewOutboxEvent::new(format!("due/{i}"), json!({})))
                .await
                .unwrap();
            due_ids.push(row.id);
        }
        for i in 0..2 {
            let mut row = store
                .enqueue(NewOutboxEvent::new(format!("future/{i}"), json!({})))
                .await
                .unwrap();
            row.next_attempt_at = Utc::now() + chrono::Duration::minutes(30);
            store.update(&row).await.unwrap();
        }

        let report = dispatcher.process_pending(Some(5)).await.unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.sent, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.dead, 0);
        let dispatched: Vec<_> = report.results.iter().map(|r| r.id).collect();
        assert_eq!(dispatched, due_ids);

        for i in 0..2 {
            let untouched = store
                .get(fincore_core::OutboxEventId::new((4 + i) as i64))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(untouched.status, OutboxStatus::Pending);
            assert_eq!(untouched.attempts, 0);
        }
    }

    #[tokio::test]
    async fn drain_limit_is_clamped() {
        let (dispatcher, store, _transport) = setup();
        for i in 0..3 {
            store
                .enqueue(NewOutboxEvent::new(format!("e/{i}"), json!({})))
                .await
                .unwrap();
        }

        // Zero is bumped to one.
        let report = dispatcher.process_pending(Some(0)).await.unwrap();
        assert_eq!(report.processed, 1);
    }

    #[tokio::test]
    async fn drain_tallies_mixed_outcomes() {
        let (dispatcher, store, transport) = setup();
        transport.fail_with("bus unreachable");

        store
            .enqueue(NewOutboxEvent::new("will-fail", json!({})))
            .await
            .unwrap();
        store
            .enqueue(NewOutboxEvent::new("will-die", json!({})).with_max_attempts(1))
            .await
            .unwrap();

        let report = dispatcher.process_pending(None).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.dead, 1);
    }
}
