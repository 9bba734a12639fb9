//! Critical event emitter: direct send with a durable fallback.
//!
//! A critical event must never be lost. The emitter first tries the bus
//! directly; when that fails the event is parked in the outbox so a later
//! drain pass delivers it. The caller gets a success either way.

use serde::Serialize;
use tracing::{info, instrument, warn};

use fincore_core::OutboxEventId;
use fincore_outbox::{EventTransport, NewOutboxEvent, OutboxStatus};

use super::store::{OutboxStore, OutboxStoreError};

/// What happened to an emitted critical event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmitOutcome {
    /// True when the direct send reached the bus.
    pub sent: bool,
    /// Set when the event was parked in the outbox instead.
    pub outbox_id: Option<OutboxEventId>,
    pub status: OutboxStatus,
    pub error: Option<String>,
}

/// Emits events that must survive a bus outage.
#[derive(Debug, Clone)]
pub struct CriticalEventEmitter<S, T> {
    store: S,
    transport: T,
}

impl<S, T> CriticalEventEmitter<S, T>
where
    S: OutboxStore,
    T: EventTransport,
{
    pub fn new(store: S, transport: T) -> Self {
        Self { store, transport }
    }

    /// Try the bus, fall back to the outbox on failure.
    ///
    /// Returns `Err` only when the fallback enqueue itself fails; a bus
    /// rejection alone is absorbed.
    #[instrument(skip(self, event), fields(event_name = %event.event_name), err)]
    pub async fn emit(&self, event: NewOutboxEvent) -> Result<EmitOutcome, OutboxStoreError> {
        match self.transport.send(&event.event_name, &event.payload).await {
            Ok(()) => {
                info!("critical event sent directly");
                Ok(EmitOutcome {
                    sent: true,
                    outbox_id: None,
                    status: OutboxStatus::Sent,
                    error: None,
                })
            }
            Err(err) => {
                let error = err.to_string();
                warn!(error = %error, "direct send failed, parking event in outbox");
                let row = self.store.enqueue(event).await?;
                Ok(EmitOutcome {
                    sent: false,
                    outbox_id: Some(row.id),
                    status: row.status,
                    error: Some(error),
                })
            }
        }
    }
}
