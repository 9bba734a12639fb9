//! Ledger posting: store abstraction, in-memory and Postgres stores, and the
//! posting engine.

pub mod engine;
pub mod in_memory;
pub mod postgres;
pub mod store;

pub use engine::PostingEngine;
pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use store::{CreatedPayable, LedgerStore, PostingError, PostingInsert, PostingResult};
