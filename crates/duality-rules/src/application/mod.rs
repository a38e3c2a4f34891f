//! Application layer: command handlers, query handlers and the projector.

pub mod command_handlers;
pub mod projector;
pub mod query_handlers;
