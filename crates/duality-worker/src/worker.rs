//! Outbox drain loop.

use std::sync::Arc;
use std::time::Duration;

use duality_core::clock::{Clock, SystemClock};
use duality_core::error::DomainError;
use duality_event_store::checkpoint::ExactlyOnceApplier;
use duality_event_store::journal::Journal;
use duality_event_store::outbox::{
    Outbox, OutboxConsumer, OutboxProcessReport, ProjectionConsumer,
};
use duality_rules::application::projector::RulesProjector;
use duality_rules::domain::events::EventCatalog;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{OutboxMode, WorkerConfig};
use crate::error::error_code;

/// Repeatedly claims and processes outbox rows until cancelled.
pub struct OutboxWorker {
    outbox: Outbox,
    consumer: Arc<dyn OutboxConsumer>,
    clock: Arc<dyn Clock>,
    mode: OutboxMode,
    batch_size: u32,
    poll_interval: Duration,
}

impl std::fmt::Debug for OutboxWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxWorker")
            .field("outbox", &self.outbox)
            .field("mode", &self.mode)
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl OutboxWorker {
    /// Wires a worker that projects rules events with the system clock.
    ///
    /// `cancel` is handed to the projection consumer so in-flight applies
    /// stop retrying once shutdown begins.
    #[must_use]
    pub fn new(pool: SqlitePool, config: &WorkerConfig, cancel: CancellationToken) -> Self {
        Self::with_clock(pool, config, Arc::new(SystemClock), cancel)
    }

    /// Same as [`OutboxWorker::new`] with an explicit clock.
    #[must_use]
    pub fn with_clock(
        pool: SqlitePool,
        config: &WorkerConfig,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        let journal = Journal::new(pool.clone(), Arc::clone(&clock)).with_outbox(true);
        let outbox = Outbox::new(journal, Arc::new(EventCatalog)).with_config(config.outbox);
        let applier = ExactlyOnceApplier::new(pool, Arc::clone(&clock))
            .with_retry(config.outbox.retry);
        let consumer = ProjectionConsumer::new(applier, Arc::new(RulesProjector), cancel);

        Self {
            outbox,
            consumer: Arc::new(consumer),
            clock,
            mode: config.mode,
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
        }
    }

    /// The outbox this worker drains.
    #[must_use]
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Runs a single claim-and-process pass.
    ///
    /// # Errors
    ///
    /// Returns claim or transition errors from the outbox. Delivery
    /// failures are recorded on the rows, not returned.
    pub async fn drain_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OutboxProcessReport, DomainError> {
        let now = self.clock.now();
        match self.mode {
            OutboxMode::Apply => {
                self.outbox
                    .process(cancel, now, self.batch_size, self.consumer.as_ref())
                    .await
            }
            OutboxMode::Shadow => self.outbox.process_shadow(cancel, now, self.batch_size).await,
        }
    }

    /// Drains the outbox until `cancel` fires.
    ///
    /// A full batch is followed immediately by another pass. Otherwise the
    /// worker waits for the poll interval. Pass errors are logged and the
    /// loop keeps going.
    pub async fn run(&self, cancel: &CancellationToken) -> OutboxProcessReport {
        info!(
            mode = ?self.mode,
            batch_size = self.batch_size,
            poll_interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "outbox worker started"
        );

        let mut totals = OutboxProcessReport::default();
        while !cancel.is_cancelled() {
            let full_batch = match self.drain_once(cancel).await {
                Ok(report) => {
                    accumulate(&mut totals, report);
                    report.claimed >= self.batch_size as usize
                }
                Err(DomainError::Cancelled(_)) => break,
                Err(err) => {
                    warn!(error = %err, code = error_code(&err), "outbox pass failed");
                    false
                }
            };

            if !full_batch {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!(
            applied = totals.applied,
            skipped = totals.skipped,
            failed = totals.failed,
            dead_lettered = totals.dead_lettered,
            "outbox worker stopped"
        );
        totals
    }
}

fn accumulate(totals: &mut OutboxProcessReport, report: OutboxProcessReport) {
    totals.claimed += report.claimed;
    totals.applied += report.applied;
    totals.skipped += report.skipped;
    totals.failed += report.failed;
    totals.dead_lettered += report.dead_lettered;
}
