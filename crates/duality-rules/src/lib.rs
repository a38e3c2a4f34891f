//! Duality: Daggerheart rules context.
//!
//! Responsible for applying resolved roll outcomes (Hope, Stress and GM
//! Fear changes) to campaign state, naming the events those changes
//! produce, and projecting those events onto the numeric read models.

pub mod application;
pub mod domain;
