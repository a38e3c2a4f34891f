//! Domain layer: events, commands and pure outcome rules.

pub mod commands;
pub mod events;
pub mod outcome;
