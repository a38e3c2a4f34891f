//! Test projectors: `Projector` doubles for the exactly-once applier.

use std::sync::Mutex;

use async_trait::async_trait;
use duality_core::error::DomainError;
use duality_core::event::StoredEvent;
use duality_event_store::checkpoint::Projector;
use sqlx::SqliteConnection;

/// A projector that records every event it is asked to apply.
#[derive(Debug, Default)]
pub struct RecordingProjector {
    applied: Mutex<Vec<(String, u64)>>,
}

impl RecordingProjector {
    /// Creates an empty recording projector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(campaign_id, seq)` for every applied event, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn applied(&self) -> Vec<(String, u64)> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl Projector for RecordingProjector {
    async fn apply(
        &self,
        _conn: &mut SqliteConnection,
        event: &StoredEvent,
    ) -> Result<(), DomainError> {
        self.applied
            .lock()
            .unwrap()
            .push((event.campaign_id.clone(), event.seq));
        Ok(())
    }
}

/// A projector that always fails. Useful for testing rollback paths.
#[derive(Debug)]
pub struct FailingProjector;

#[async_trait]
impl Projector for FailingProjector {
    async fn apply(
        &self,
        _conn: &mut SqliteConnection,
        _event: &StoredEvent,
    ) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("projection unavailable".into()))
    }
}
