//! Infrastructure layer: stores, the posting engine, and outbox draining.

pub mod outbox;
pub mod posting;
pub mod schema;
