//! Duality Core: shared domain abstractions.
//!
//! This crate defines the event envelope, the error taxonomy and the small
//! traits that the journal, the projection pipeline and the rules context
//! all depend on. It contains no infrastructure code.

pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod registry;
