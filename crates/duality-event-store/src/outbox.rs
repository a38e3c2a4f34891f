//! Transactional projection-apply outbox.
//!
//! Row lifecycle: `pending -> processing -> deleted | failed | dead`.
//! `failed` rows become claimable again once `next_attempt_at` passes;
//! `processing` rows whose lease expired are reclaimed; `dead` rows wait
//! for a manual requeue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duality_core::error::DomainError;
use duality_core::event::StoredEvent;
use duality_core::registry::EventRegistry;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::checkpoint::{ExactlyOnceApplier, Projector};
use crate::convert::{duration_millis, from_millis, seq_from_sql, seq_to_sql, to_millis};
use crate::error::db_error;
use crate::journal::Journal;
use crate::retry::{RetryPolicy, retry_on_contention};
use crate::store::begin_write;

/// Failure recorded for every row processed in shadow mode.
pub const SHADOW_MODE_ERROR: &str = "shadow mode: apply skipped";

/// Upper bound on the retry delay of a failed row.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Delay before retrying a row that has failed `attempt` times (1-based):
/// `2^(attempt-1)` seconds, capped at [`MAX_BACKOFF`].
#[must_use]
pub fn backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    Duration::from_secs(1u64 << exponent).min(MAX_BACKOFF)
}

/// Outbox row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for its first claim.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Failed; claimable again after `next_attempt_at`.
    Failed,
    /// Retry budget exhausted.
    Dead,
}

impl OutboxStatus {
    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    /// Parses the stored representation.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` for an unknown status.
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            other => Err(DomainError::Infrastructure(format!(
                "unknown outbox status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbox row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxRow {
    /// Campaign of the referenced event.
    pub campaign_id: String,
    /// Sequence number of the referenced event.
    pub seq: u64,
    /// Type of the referenced event.
    pub event_type: String,
    /// Current status.
    pub status: OutboxStatus,
    /// Failed attempts so far.
    pub attempt_count: u32,
    /// Earliest time the row may be claimed.
    pub next_attempt_at: DateTime<Utc>,
    /// Most recent failure message.
    pub last_error: Option<String>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRecord {
    campaign_id: String,
    seq: i64,
    event_type: String,
    status: String,
    attempt_count: i64,
    next_attempt_at: i64,
    last_error: Option<String>,
    updated_at: i64,
}

impl TryFrom<OutboxRecord> for OutboxRow {
    type Error = DomainError;

    fn try_from(record: OutboxRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            seq: seq_from_sql(record.seq)?,
            status: OutboxStatus::parse(&record.status)?,
            attempt_count: u32::try_from(record.attempt_count).map_err(|_| {
                DomainError::Infrastructure(format!(
                    "outbox attempt count {} out of range",
                    record.attempt_count
                ))
            })?,
            next_attempt_at: from_millis(record.next_attempt_at)?,
            updated_at: from_millis(record.updated_at)?,
            campaign_id: record.campaign_id,
            event_type: record.event_type,
            last_error: record.last_error,
        })
    }
}

const OUTBOX_COLUMNS: &str = "campaign_id, seq, event_type, status, attempt_count, \
     next_attempt_at, last_error, updated_at";

/// Rows claimable at `?1` (now) given a lease cutoff `?2`.
const CLAIMABLE: &str = "((status IN ('pending', 'failed') AND next_attempt_at <= ?1) \
     OR (status = 'processing' AND updated_at <= ?2))";

/// Outbox tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Attempt count at which a failing row becomes `dead`.
    pub max_attempts: u32,
    /// How long a claim is owned before the row may be reclaimed.
    pub lease: Duration,
    /// Contention retry policy for claim and transitions.
    pub retry: RetryPolicy,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            lease: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

/// Receives events drained from the outbox.
#[async_trait]
pub trait OutboxConsumer: Send + Sync {
    /// Delivers one event. An error schedules a retry.
    async fn deliver(&self, event: &StoredEvent) -> Result<(), DomainError>;
}

/// Delivers outbox events to a projector through the exactly-once applier.
pub struct ProjectionConsumer {
    applier: ExactlyOnceApplier,
    projector: Arc<dyn Projector>,
    cancel: CancellationToken,
}

impl ProjectionConsumer {
    /// Creates a consumer that applies events with `projector`.
    #[must_use]
    pub fn new(
        applier: ExactlyOnceApplier,
        projector: Arc<dyn Projector>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            applier,
            projector,
            cancel,
        }
    }
}

#[async_trait]
impl OutboxConsumer for ProjectionConsumer {
    async fn deliver(&self, event: &StoredEvent) -> Result<(), DomainError> {
        let applied = self
            .applier
            .apply_once(&self.cancel, event, self.projector.as_ref())
            .await?;
        if !applied {
            debug!(
                campaign_id = %event.campaign_id,
                seq = event.seq,
                "event already projected"
            );
        }
        Ok(())
    }
}

/// Outcome counts of one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxProcessReport {
    /// Rows claimed.
    pub claimed: usize,
    /// Rows delivered and deleted.
    pub applied: usize,
    /// Audit-only rows deleted without delivery.
    pub skipped: usize,
    /// Rows moved to `failed`.
    pub failed: usize,
    /// Rows moved to `dead`.
    pub dead_lettered: usize,
}

/// Aggregate view of the outbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxSummary {
    /// Rows waiting for their first claim.
    pub pending: u64,
    /// Rows currently claimed.
    pub processing: u64,
    /// Rows waiting for a retry.
    pub failed: u64,
    /// Dead-lettered rows.
    pub dead: u64,
    /// The pending or failed row that is due soonest.
    pub oldest_pending: Option<OutboxRow>,
}

/// Listing filter for operational inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxListFilter {
    /// Only rows with this status.
    pub status: Option<OutboxStatus>,
    /// Only rows of this campaign.
    pub campaign_id: Option<String>,
    /// Maximum rows returned.
    pub limit: u32,
}

impl Default for OutboxListFilter {
    fn default() -> Self {
        Self {
            status: None,
            campaign_id: None,
            limit: 100,
        }
    }
}

/// Enqueues an event for projection inside the caller's transaction.
///
/// Returns `false` if the event already had an outbox row.
///
/// # Errors
///
/// Returns `DomainError` if the insert fails.
pub async fn enqueue(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    seq: u64,
    event_type: &str,
    now: DateTime<Utc>,
) -> Result<bool, DomainError> {
    let now_ms = to_millis(now);
    let result = sqlx::query(
        "INSERT INTO projection_apply_outbox \
         (campaign_id, seq, event_type, status, attempt_count, next_attempt_at, updated_at) \
         VALUES (?, ?, ?, 'pending', 0, ?, ?) \
         ON CONFLICT (campaign_id, seq) DO NOTHING",
    )
    .bind(campaign_id)
    .bind(seq_to_sql(seq)?)
    .bind(event_type)
    .bind(now_ms)
    .bind(now_ms)
    .execute(conn)
    .await
    .map_err(db_error(&format!("enqueue {campaign_id}/{seq}")))?;
    Ok(result.rows_affected() == 1)
}

/// Records a per-row failure, keeping the first one. Cancellation is
/// returned immediately.
fn settle(
    row: &OutboxRow,
    settled: Result<(), DomainError>,
    first_error: &mut Option<DomainError>,
) -> Result<(), DomainError> {
    match settled {
        Ok(()) => Ok(()),
        Err(err @ DomainError::Cancelled(_)) => Err(err),
        Err(err) => {
            warn!(
                campaign_id = %row.campaign_id,
                seq = row.seq,
                error = %err,
                "outbox row transition failed, continuing pass"
            );
            first_error.get_or_insert(err);
            Ok(())
        }
    }
}

fn expect_one_row(affected: u64, operation: &str) -> Result<(), DomainError> {
    if affected == 1 {
        Ok(())
    } else {
        Err(DomainError::InvariantViolation(format!(
            "{operation}: expected 1 row, affected {affected}"
        )))
    }
}

/// Outbox operations over a shared pool.
#[derive(Clone)]
pub struct Outbox {
    pool: SqlitePool,
    journal: Journal,
    registry: Arc<dyn EventRegistry>,
    config: OutboxConfig,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Outbox {
    /// Creates an outbox reading events through `journal`.
    #[must_use]
    pub fn new(journal: Journal, registry: Arc<dyn EventRegistry>) -> Self {
        Self {
            pool: journal.pool().clone(),
            journal,
            registry,
            config: OutboxConfig::default(),
        }
    }

    /// Overrides the outbox tuning.
    #[must_use]
    pub fn with_config(mut self, config: OutboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the outbox tuning.
    #[must_use]
    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Claims up to `limit` due rows, moving them to `processing`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a zero limit,
    /// `DomainError::Cancelled`, or store errors.
    #[instrument(skip(self, cancel))]
    pub async fn claim(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxRow>, DomainError> {
        if limit == 0 {
            return Err(DomainError::Validation(
                "claim limit must be greater than zero".into(),
            ));
        }
        let claimed = retry_on_contention(cancel, &self.config.retry, "claim outbox rows", || {
            self.try_claim(now, limit)
        })
        .await?;
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "outbox rows claimed");
        }
        Ok(claimed)
    }

    async fn try_claim(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxRow>, DomainError> {
        let now_ms = to_millis(now);
        let lease_cutoff = now_ms.saturating_sub(duration_millis(self.config.lease));

        let mut tx = begin_write(&self.pool, "begin claim").await?;

        let candidates: Vec<OutboxRecord> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM projection_apply_outbox \
             WHERE {CLAIMABLE} ORDER BY next_attempt_at ASC, seq ASC LIMIT ?3"
        ))
        .bind(now_ms)
        .bind(lease_cutoff)
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("select claimable rows"))?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let result = sqlx::query(&format!(
                "UPDATE projection_apply_outbox SET status = 'processing', updated_at = ?1 \
                 WHERE campaign_id = ?3 AND seq = ?4 AND {CLAIMABLE}"
            ))
            .bind(now_ms)
            .bind(lease_cutoff)
            .bind(&candidate.campaign_id)
            .bind(candidate.seq)
            .execute(&mut *tx)
            .await
            .map_err(db_error(&format!(
                "claim {}/{}",
                candidate.campaign_id, candidate.seq
            )))?;

            if result.rows_affected() == 1 {
                let mut row = OutboxRow::try_from(candidate)?;
                row.status = OutboxStatus::Processing;
                row.updated_at = from_millis(now_ms)?;
                claimed.push(row);
            }
        }

        tx.commit().await.map_err(db_error("commit claim"))?;
        Ok(claimed)
    }

    /// Claims due rows and delivers their events to `consumer`.
    ///
    /// Audit-only events are completed without delivery. A load or
    /// delivery failure schedules a retry or dead-letters the row. A row
    /// whose status transition fails does not stop the pass: the remaining
    /// rows are still settled and the first such error is returned at the
    /// end.
    ///
    /// # Errors
    ///
    /// Returns claim errors, the first transition error (including
    /// `DomainError::InvariantViolation` when a guarded transition misses),
    /// or `DomainError::Cancelled`. Consumer errors are recorded on the row,
    /// not returned.
    #[instrument(skip(self, cancel, consumer))]
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
        limit: u32,
        consumer: &dyn OutboxConsumer,
    ) -> Result<OutboxProcessReport, DomainError> {
        let rows = self.claim(cancel, now, limit).await?;
        let mut report = OutboxProcessReport {
            claimed: rows.len(),
            ..OutboxProcessReport::default()
        };

        let mut first_error = None;
        for row in rows {
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled("process outbox".into()));
            }
            let settled = self
                .process_row(cancel, &row, now, consumer, &mut report)
                .await;
            settle(&row, settled, &mut first_error)?;
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                applied = report.applied,
                skipped = report.skipped,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "outbox pass complete"
            );
        }
        first_error.map_or(Ok(report), Err)
    }

    async fn process_row(
        &self,
        cancel: &CancellationToken,
        row: &OutboxRow,
        now: DateTime<Utc>,
        consumer: &dyn OutboxConsumer,
        report: &mut OutboxProcessReport,
    ) -> Result<(), DomainError> {
        let event = match self.journal.get_event(&row.campaign_id, row.seq).await {
            Ok(event) => event,
            Err(err) => return self.fail(cancel, row, &err.to_string(), now, report).await,
        };

        if self.registry.is_audit_only(&event.event_type) {
            self.complete(cancel, row).await?;
            report.skipped += 1;
            return Ok(());
        }

        match consumer.deliver(&event).await {
            Ok(()) => {
                self.complete(cancel, row).await?;
                report.applied += 1;
                Ok(())
            }
            Err(err) => self.fail(cancel, row, &err.to_string(), now, report).await,
        }
    }

    /// Claims due rows and records a retry failure for each without
    /// delivering anything.
    ///
    /// # Errors
    ///
    /// Same as [`Outbox::process`].
    #[instrument(skip(self, cancel))]
    pub async fn process_shadow(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<OutboxProcessReport, DomainError> {
        let rows = self.claim(cancel, now, limit).await?;
        let mut report = OutboxProcessReport {
            claimed: rows.len(),
            ..OutboxProcessReport::default()
        };
        let mut first_error = None;
        for row in rows {
            let settled = self
                .fail(cancel, &row, SHADOW_MODE_ERROR, now, &mut report)
                .await;
            settle(&row, settled, &mut first_error)?;
        }
        first_error.map_or(Ok(report), Err)
    }

    async fn fail(
        &self,
        cancel: &CancellationToken,
        row: &OutboxRow,
        error: &str,
        now: DateTime<Utc>,
        report: &mut OutboxProcessReport,
    ) -> Result<(), DomainError> {
        let status = self.record_failure(cancel, row, error, now).await?;
        match status {
            OutboxStatus::Dead => report.dead_lettered += 1,
            _ => report.failed += 1,
        }
        Ok(())
    }

    /// Deletes a delivered row.
    async fn complete(
        &self,
        cancel: &CancellationToken,
        row: &OutboxRow,
    ) -> Result<(), DomainError> {
        let operation = format!("complete {}/{}", row.campaign_id, row.seq);
        let seq = seq_to_sql(row.seq)?;
        retry_on_contention(cancel, &self.config.retry, &operation, || async {
            let result = sqlx::query(
                "DELETE FROM projection_apply_outbox \
                 WHERE campaign_id = ? AND seq = ? AND status = 'processing'",
            )
            .bind(&row.campaign_id)
            .bind(seq)
            .execute(&self.pool)
            .await
            .map_err(db_error(&operation))?;
            expect_one_row(result.rows_affected(), &operation)
        })
        .await
    }

    /// Records a failed attempt, returning the row's new status.
    async fn record_failure(
        &self,
        cancel: &CancellationToken,
        row: &OutboxRow,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<OutboxStatus, DomainError> {
        let attempt = row.attempt_count.saturating_add(1);
        let (status, next_attempt_at) = if attempt >= self.config.max_attempts {
            (OutboxStatus::Dead, now)
        } else {
            let delay = chrono::Duration::from_std(backoff(attempt))
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
            (OutboxStatus::Failed, now + delay)
        };

        let operation = format!("record failure {}/{}", row.campaign_id, row.seq);
        let seq = seq_to_sql(row.seq)?;
        retry_on_contention(cancel, &self.config.retry, &operation, || async {
            let result = sqlx::query(
                "UPDATE projection_apply_outbox \
                 SET status = ?, attempt_count = ?, next_attempt_at = ?, last_error = ?, \
                     updated_at = ? \
                 WHERE campaign_id = ? AND seq = ? AND status = 'processing'",
            )
            .bind(status.as_str())
            .bind(i64::from(attempt))
            .bind(to_millis(next_attempt_at))
            .bind(error)
            .bind(to_millis(now))
            .bind(&row.campaign_id)
            .bind(seq)
            .execute(&self.pool)
            .await
            .map_err(db_error(&operation))?;
            expect_one_row(result.rows_affected(), &operation)
        })
        .await?;

        if status == OutboxStatus::Dead {
            warn!(
                campaign_id = %row.campaign_id,
                seq = row.seq,
                attempt,
                error,
                "outbox row dead-lettered"
            );
        } else {
            debug!(
                campaign_id = %row.campaign_id,
                seq = row.seq,
                attempt,
                error,
                "outbox row scheduled for retry"
            );
        }
        Ok(status)
    }

    /// Moves one dead row back to `pending` with a reset attempt count.
    ///
    /// Returns `false` if the row exists but is not dead.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if the row does not exist,
    /// `DomainError::Cancelled`, or store errors once contention retries are
    /// spent.
    #[instrument(skip(self, cancel))]
    pub async fn requeue_dead(
        &self,
        cancel: &CancellationToken,
        campaign_id: &str,
        seq: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let operation = format!("requeue {campaign_id}/{seq}");
        let requeued = retry_on_contention(cancel, &self.config.retry, &operation, || {
            self.try_requeue_dead(campaign_id, seq, now, &operation)
        })
        .await?;
        if requeued {
            info!(campaign_id, seq, "dead outbox row requeued");
        }
        Ok(requeued)
    }

    async fn try_requeue_dead(
        &self,
        campaign_id: &str,
        seq: u64,
        now: DateTime<Utc>,
        operation: &str,
    ) -> Result<bool, DomainError> {
        let now_ms = to_millis(now);
        let sql_seq = seq_to_sql(seq)?;
        let mut tx = begin_write(&self.pool, operation).await?;

        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM projection_apply_outbox WHERE campaign_id = ? AND seq = ?",
        )
        .bind(campaign_id)
        .bind(sql_seq)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error(operation))?;

        let Some(status) = status else {
            return Err(DomainError::not_found(
                "outbox row",
                format!("{campaign_id}/{seq}"),
            ));
        };
        if OutboxStatus::parse(&status)? != OutboxStatus::Dead {
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE projection_apply_outbox \
             SET status = 'pending', attempt_count = 0, next_attempt_at = ?, last_error = NULL, \
                 updated_at = ? \
             WHERE campaign_id = ? AND seq = ? AND status = 'dead'",
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(campaign_id)
        .bind(sql_seq)
        .execute(&mut *tx)
        .await
        .map_err(db_error(operation))?;
        expect_one_row(result.rows_affected(), operation)?;

        tx.commit().await.map_err(db_error(operation))?;
        Ok(true)
    }

    /// Requeues up to `limit` of the oldest dead rows, returning how many
    /// moved.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a zero limit,
    /// `DomainError::Cancelled`, or store errors once contention retries are
    /// spent.
    #[instrument(skip(self, cancel))]
    pub async fn requeue_dead_batch(
        &self,
        cancel: &CancellationToken,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u64, DomainError> {
        if limit == 0 {
            return Err(DomainError::Validation(
                "requeue limit must be greater than zero".into(),
            ));
        }
        let now_ms = to_millis(now);
        let moved = retry_on_contention(cancel, &self.config.retry, "requeue dead rows", || async {
            let result = sqlx::query(
                "UPDATE projection_apply_outbox \
                 SET status = 'pending', attempt_count = 0, next_attempt_at = ?1, \
                     last_error = NULL, updated_at = ?1 \
                 WHERE status = 'dead' AND (campaign_id, seq) IN ( \
                     SELECT campaign_id, seq FROM projection_apply_outbox \
                     WHERE status = 'dead' ORDER BY updated_at ASC, seq ASC LIMIT ?2)",
            )
            .bind(now_ms)
            .bind(i64::from(limit))
            .execute(&self.pool)
            .await
            .map_err(db_error("requeue dead rows"))?;
            Ok(result.rows_affected())
        })
        .await?;

        if moved > 0 {
            info!(moved, "dead outbox rows requeued");
        }
        Ok(moved)
    }

    /// Counts rows per status and finds the soonest-due pending/failed row.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if a query fails.
    pub async fn summary(&self) -> Result<OutboxSummary, DomainError> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM projection_apply_outbox GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("count outbox rows"))?;

        let mut summary = OutboxSummary::default();
        for (status, count) in counts {
            let count = u64::try_from(count).unwrap_or_default();
            match OutboxStatus::parse(&status)? {
                OutboxStatus::Pending => summary.pending = count,
                OutboxStatus::Processing => summary.processing = count,
                OutboxStatus::Failed => summary.failed = count,
                OutboxStatus::Dead => summary.dead = count,
            }
        }

        let oldest: Option<OutboxRecord> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM projection_apply_outbox \
             WHERE status IN ('pending', 'failed') \
             ORDER BY next_attempt_at ASC, seq ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("find oldest pending row"))?;
        summary.oldest_pending = oldest.map(OutboxRow::try_from).transpose()?;

        Ok(summary)
    }

    /// Lists rows matching `filter`, soonest-due first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a zero limit, or store errors.
    pub async fn list(&self, filter: &OutboxListFilter) -> Result<Vec<OutboxRow>, DomainError> {
        if filter.limit == 0 {
            return Err(DomainError::Validation(
                "list limit must be greater than zero".into(),
            ));
        }
        let records: Vec<OutboxRecord> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM projection_apply_outbox \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR campaign_id = ?2) \
             ORDER BY next_attempt_at ASC, seq ASC LIMIT ?3"
        ))
        .bind(filter.status.map(OutboxStatus::as_str))
        .bind(filter.campaign_id.as_deref())
        .bind(i64::from(filter.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list outbox rows"))?;

        records.into_iter().map(OutboxRow::try_from).collect()
    }

    /// Loads one outbox row.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if the row does not exist.
    pub async fn get(&self, campaign_id: &str, seq: u64) -> Result<OutboxRow, DomainError> {
        let record: Option<OutboxRecord> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM projection_apply_outbox \
             WHERE campaign_id = ? AND seq = ?"
        ))
        .bind(campaign_id)
        .bind(seq_to_sql(seq)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error(&format!("get outbox row {campaign_id}/{seq}")))?;

        record
            .ok_or_else(|| DomainError::not_found("outbox row", format!("{campaign_id}/{seq}")))?
            .try_into()
    }
}
