//! Exactly-once application of events to projections.
//!
//! A checkpoint row `(campaign_id, seq)` fences each event: it is reserved
//! in the same transaction as the projection writes, so the effect and the
//! fence commit or roll back together.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duality_core::clock::Clock;
use duality_core::error::DomainError;
use duality_core::event::StoredEvent;
use sqlx::{SqliteConnection, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::convert::{seq_to_sql, to_millis};
use crate::error::db_error;
use crate::retry::{RetryPolicy, retry_on_contention};
use crate::store::begin_write;

/// Writes the projection effect of one event.
///
/// Implementations must only use the supplied connection; it is the
/// applier's transaction.
#[async_trait]
pub trait Projector: Send + Sync {
    /// Applies `event` to projection state.
    async fn apply(&self, conn: &mut SqliteConnection, event: &StoredEvent)
    -> Result<(), DomainError>;
}

/// Reserves the checkpoint for `(campaign_id, seq)`.
///
/// Returns `false` when the event already has a checkpoint.
///
/// # Errors
///
/// Returns `DomainError` if the insert fails for any other reason.
pub async fn try_reserve(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    seq: u64,
    event_type: &str,
    applied_at: DateTime<Utc>,
) -> Result<bool, DomainError> {
    let result = sqlx::query(
        "INSERT INTO projection_apply_checkpoints (campaign_id, seq, event_type, applied_at) \
         VALUES (?, ?, ?, ?) ON CONFLICT (campaign_id, seq) DO NOTHING",
    )
    .bind(campaign_id)
    .bind(seq_to_sql(seq)?)
    .bind(event_type)
    .bind(to_millis(applied_at))
    .execute(conn)
    .await
    .map_err(db_error(&format!("reserve checkpoint {campaign_id}/{seq}")))?;

    Ok(result.rows_affected() == 1)
}

/// Returns whether `(campaign_id, seq)` already has a checkpoint.
///
/// # Errors
///
/// Returns `DomainError` if the query fails.
pub async fn is_applied(
    pool: &SqlitePool,
    campaign_id: &str,
    seq: u64,
) -> Result<bool, DomainError> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM projection_apply_checkpoints WHERE campaign_id = ? AND seq = ?",
    )
    .bind(campaign_id)
    .bind(seq_to_sql(seq)?)
    .fetch_optional(pool)
    .await
    .map_err(db_error(&format!("check checkpoint {campaign_id}/{seq}")))?;
    Ok(found.is_some())
}

/// Applies events to projections at most once each.
#[derive(Clone)]
pub struct ExactlyOnceApplier {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ExactlyOnceApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExactlyOnceApplier")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ExactlyOnceApplier {
    /// Creates an applier with the default retry policy.
    #[must_use]
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the contention retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Applies `event` through `projector` unless it was applied before.
    ///
    /// Returns `true` when this call committed the effect and `false` when
    /// the checkpoint already existed. Lock contention is retried with
    /// linear backoff.
    ///
    /// # Errors
    ///
    /// Returns the projector's error (after rolling back the checkpoint),
    /// `DomainError::Contention` once the retry budget is spent, or
    /// `DomainError::Cancelled`.
    #[instrument(skip(self, cancel, event, projector), fields(campaign_id = %event.campaign_id, seq = event.seq))]
    pub async fn apply_once(
        &self,
        cancel: &CancellationToken,
        event: &StoredEvent,
        projector: &dyn Projector,
    ) -> Result<bool, DomainError> {
        let operation = format!("apply {}/{}", event.campaign_id, event.seq);
        retry_on_contention(cancel, &self.retry, &operation, || {
            self.try_apply_once(event, projector)
        })
        .await
    }

    async fn try_apply_once(
        &self,
        event: &StoredEvent,
        projector: &dyn Projector,
    ) -> Result<bool, DomainError> {
        let mut tx = begin_write(&self.pool, "begin apply").await?;

        let reserved = try_reserve(
            &mut tx,
            &event.campaign_id,
            event.seq,
            &event.event_type,
            self.clock.now(),
        )
        .await?;
        if !reserved {
            tx.commit().await.map_err(db_error("commit apply"))?;
            debug!("checkpoint exists, skipping");
            return Ok(false);
        }

        if let Err(err) = projector.apply(&mut tx, event).await {
            warn!(error = %err, "projection failed, rolling back checkpoint");
            tx.rollback().await.map_err(db_error("rollback apply"))?;
            return Err(err);
        }

        tx.commit().await.map_err(db_error("commit apply"))?;
        debug!(event_type = %event.event_type, "projection applied");
        Ok(true)
    }
}
