//! Transport abstraction for the external event bus.
//!
//! The subsystem owns no wire format: a transport takes an event name and an
//! opaque JSON payload and either delivers it or fails. Timeouts are the
//! transport's concern, not the outbox's.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by the external bus (rejected send, timeout, etc.).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("event bus rejected the send: {0}")]
    Rejected(String),
}

/// Send-one-event primitive.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportError>;
}

#[async_trait]
impl<T> EventTransport for Arc<T>
where
    T: EventTransport + ?Sized,
{
    async fn send(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportError> {
        (**self).send(event_name, payload).await
    }
}

/// In-memory transport for tests/dev: records delivered events and can be
/// switched into a failing mode.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    delivered: Mutex<Vec<(String, serde_json::Value)>>,
    failure: Mutex<Option<String>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every subsequent send fail with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().unwrap() = Some(reason.into());
    }

    /// Return to the delivering mode.
    pub fn heal(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn delivered(&self) -> Vec<(String, serde_json::Value)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl EventTransport for InMemoryTransport {
    async fn send(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportError> {
        if let Some(reason) = self.failure.lock().unwrap().clone() {
            return Err(TransportError::Rejected(reason));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((event_name.to_string(), payload.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_delivered_events() {
        let transport = InMemoryTransport::new();
        transport
            .send("finance/payable.created", &serde_json::json!({"id": 1}))
            .await
            .unwrap();

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "finance/payable.created");
    }

    #[tokio::test]
    async fn failing_mode_rejects_and_heal_recovers() {
        let transport = InMemoryTransport::new();
        transport.fail_with("bus down");

        let err = transport
            .send("finance/payable.created", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Rejected("bus down".to_string()));
        assert_eq!(transport.delivered_count(), 0);

        transport.heal();
        transport
            .send("finance/payable.created", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(transport.delivered_count(), 1);
    }
}
