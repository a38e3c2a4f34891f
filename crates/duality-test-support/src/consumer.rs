//! Test outbox consumers.

use std::sync::Mutex;

use async_trait::async_trait;
use duality_core::error::DomainError;
use duality_core::event::StoredEvent;
use duality_event_store::outbox::OutboxConsumer;

/// A consumer that records every delivered event.
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    delivered: Mutex<Vec<StoredEvent>>,
}

impl RecordingConsumer {
    /// Creates an empty recording consumer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delivered events in delivery order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn delivered(&self) -> Vec<StoredEvent> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboxConsumer for RecordingConsumer {
    async fn deliver(&self, event: &StoredEvent) -> Result<(), DomainError> {
        self.delivered.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A consumer that always fails with the given message.
#[derive(Debug)]
pub struct FailingConsumer(pub &'static str);

#[async_trait]
impl OutboxConsumer for FailingConsumer {
    async fn deliver(&self, _event: &StoredEvent) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure(self.0.into()))
    }
}
