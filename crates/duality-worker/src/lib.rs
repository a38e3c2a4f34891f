//! Duality outbox worker.
//!
//! Drains the projection-apply outbox, delivering each event to the rules
//! projector through the exactly-once applier, or exercising the retry path
//! only when running in shadow mode.

pub mod config;
pub mod error;
pub mod worker;
