//! Duality Event Store: SQLite persistence core.
//!
//! Provides the append-only campaign journal, the exactly-once projection
//! applier, the transactional outbox and plain accessors for the numeric
//! projections the rules context reads and writes.

pub mod checkpoint;
pub mod convert;
pub mod error;
pub mod journal;
pub mod outbox;
pub mod page;
pub mod projections;
pub mod retry;
pub mod schema;
pub mod store;
