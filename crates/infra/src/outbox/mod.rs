//! Outbox storage and draining: store abstraction, in-memory and Postgres
//! stores, the dispatcher, and the critical event emitter.

pub mod dispatcher;
pub mod emitter;
pub mod in_memory;
pub mod postgres;
pub mod store;

pub use dispatcher::{DispatchResult, DrainReport, OutboxDispatcher};
pub use emitter::{CriticalEventEmitter, EmitOutcome};
pub use in_memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;
pub use store::{OutboxStore, OutboxStoreError};
