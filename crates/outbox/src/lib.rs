//! `fincore-outbox` — transactional outbox domain model.
//!
//! Status state machine, retry backoff, and the transport abstraction for the
//! external event bus. Durable storage and draining live in `fincore-infra`.

pub mod event;
pub mod transport;

pub use event::{
    DEFAULT_MAX_ATTEMPTS, MAX_ERROR_LEN, NewOutboxEvent, OutboxEvent, OutboxStatus, retry_delay,
};
pub use transport::{EventTransport, InMemoryTransport, TransportError};
