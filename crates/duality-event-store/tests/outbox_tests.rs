//! Integration tests for the projection-apply outbox.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duality_core::error::DomainError;
use duality_core::event::StoredEvent;
use duality_event_store::checkpoint::{ExactlyOnceApplier, is_applied};
use duality_event_store::journal::Journal;
use duality_event_store::outbox::{
    Outbox, OutboxConfig, OutboxConsumer, OutboxListFilter, OutboxStatus, ProjectionConsumer,
    SHADOW_MODE_ERROR,
};
use duality_event_store::retry::RetryPolicy;
use duality_test_support::{
    FailingConsumer, FixedClock, RecordingConsumer, RecordingProjector, StaticEventRegistry,
    fixed_time, sample_event,
};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

const AUDIT_ONLY: &str = "action.roll_resolved";

fn journal(pool: &SqlitePool) -> Journal {
    Journal::new(pool.clone(), Arc::new(FixedClock(fixed_time()))).with_outbox(true)
}

fn outbox(journal: &Journal, max_attempts: u32) -> Outbox {
    Outbox::new(journal.clone(), Arc::new(StaticEventRegistry::new(&[AUDIT_ONLY]))).with_config(
        OutboxConfig {
            max_attempts,
            lease: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        },
    )
}

fn at(seconds: i64) -> DateTime<Utc> {
    fixed_time() + chrono::Duration::seconds(seconds)
}

async fn append_markers(journal: &Journal, count: u32) {
    for marker in 1..=count {
        journal
            .append(&CancellationToken::new(), sample_event("c1", "test.happened", marker))
            .await
            .unwrap();
    }
}

/// Delivers every event, but hands the first row back to `pending` as if
/// its lease had been reclaimed by another worker mid-delivery.
struct ReleasingConsumer {
    pool: SqlitePool,
    release_seq: u64,
}

#[async_trait]
impl OutboxConsumer for ReleasingConsumer {
    async fn deliver(&self, event: &StoredEvent) -> Result<(), DomainError> {
        if event.seq == self.release_seq {
            sqlx::query(
                "UPDATE projection_apply_outbox SET status = 'pending' \
                 WHERE campaign_id = ? AND seq = ?",
            )
            .bind(&event.campaign_id)
            .bind(i64::try_from(event.seq).unwrap())
            .execute(&self.pool)
            .await
            .unwrap();
        }
        Ok(())
    }
}

// --- process ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_process_delivers_and_deletes_rows(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 2).await;
    let consumer = RecordingConsumer::new();
    let cancel = CancellationToken::new();

    // Act
    let report = outbox.process(&cancel, at(0), 10, &consumer).await.unwrap();

    // Assert
    assert_eq!(report.claimed, 2);
    assert_eq!(report.applied, 2);
    let seqs: Vec<u64> = consumer.delivered().iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert!(outbox.list(&OutboxListFilter::default()).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_process_skips_audit_only_events(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    journal
        .append(&CancellationToken::new(), sample_event("c1", AUDIT_ONLY, 1))
        .await
        .unwrap();
    let consumer = RecordingConsumer::new();
    let cancel = CancellationToken::new();

    // Act
    let report = outbox.process(&cancel, at(0), 10, &consumer).await.unwrap();

    // Assert
    assert_eq!(report.skipped, 1);
    assert_eq!(report.applied, 0);
    assert!(consumer.delivered().is_empty());
    assert!(matches!(
        outbox.get("c1", 1).await,
        Err(DomainError::NotFound { .. })
    ));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_failed_delivery_schedules_backoff(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 1).await;
    let cancel = CancellationToken::new();

    // Act
    let report = outbox
        .process(&cancel, at(0), 10, &FailingConsumer("projection offline"))
        .await
        .unwrap();

    // Assert
    assert_eq!(report.failed, 1);
    let row = outbox.get("c1", 1).await.unwrap();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.attempt_count, 1);
    assert_eq!(row.next_attempt_at, at(1));
    assert!(row.last_error.unwrap().contains("projection offline"));

    assert!(outbox.claim(&cancel, at(0), 10).await.unwrap().is_empty());
    assert_eq!(outbox.claim(&cancel, at(1), 10).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_row_is_dead_lettered_after_max_attempts(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 2);
    append_markers(&journal, 1).await;
    let consumer = FailingConsumer("still broken");
    let cancel = CancellationToken::new();

    // Act
    let first = outbox.process(&cancel, at(0), 10, &consumer).await.unwrap();
    let second = outbox.process(&cancel, at(1), 10, &consumer).await.unwrap();
    let later = outbox.process(&cancel, at(3_600), 10, &consumer).await.unwrap();

    // Assert
    assert_eq!(first.failed, 1);
    assert_eq!(second.dead_lettered, 1);
    assert_eq!(later.claimed, 0);
    let row = outbox.get("c1", 1).await.unwrap();
    assert_eq!(row.status, OutboxStatus::Dead);
    assert_eq!(row.attempt_count, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_process_with_projection_consumer_writes_checkpoint(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 1).await;
    let cancel = CancellationToken::new();
    let projector = Arc::new(RecordingProjector::new());
    let consumer = ProjectionConsumer::new(
        ExactlyOnceApplier::new(pool.clone(), Arc::new(FixedClock(fixed_time()))),
        projector.clone(),
        cancel.clone(),
    );

    // Act
    let report = outbox.process(&cancel, at(0), 10, &consumer).await.unwrap();

    // Assert
    assert_eq!(report.applied, 1);
    assert_eq!(projector.applied(), vec![("c1".to_owned(), 1)]);
    assert!(is_applied(&pool, "c1", 1).await.unwrap());
}

// --- claim ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_claimed_rows_are_not_claimed_again(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 3).await;
    let cancel = CancellationToken::new();

    // Act
    let first = outbox.claim(&cancel, at(0), 2).await.unwrap();
    let second = outbox.claim(&cancel, at(0), 10).await.unwrap();
    let third = outbox.claim(&cancel, at(0), 10).await.unwrap();

    // Assert
    let first_seqs: Vec<u64> = first.iter().map(|r| r.seq).collect();
    let second_seqs: Vec<u64> = second.iter().map(|r| r.seq).collect();
    assert_eq!(first_seqs, vec![1, 2]);
    assert_eq!(second_seqs, vec![3]);
    assert!(third.is_empty());
    assert!(first.iter().all(|r| r.status == OutboxStatus::Processing));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_claims_never_overlap(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 6).await;
    let cancel = CancellationToken::new();

    // Act
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let outbox = outbox.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { outbox.claim(&cancel, at(0), 4).await })
        })
        .collect();
    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap().unwrap().into_iter().map(|r| r.seq));
    }

    // Assert
    claimed.sort_unstable();
    assert_eq!(claimed, vec![1, 2, 3, 4, 5, 6]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_many_concurrent_claimers_each_row_claimed_once(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 64).await;
    let cancel = CancellationToken::new();

    // Act
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let outbox = outbox.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut seqs = Vec::new();
                for _ in 0..4 {
                    let rows = outbox.claim(&cancel, at(0), 1).await?;
                    seqs.extend(rows.into_iter().map(|r| r.seq));
                }
                Ok::<_, DomainError>(seqs)
            })
        })
        .collect();
    let mut claimed = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(seqs) => claimed.extend(seqs),
            Err(other) => panic!("expected claims to succeed, got {other:?}"),
        }
    }

    // Assert
    let unique: HashSet<u64> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), 64);
    assert_eq!(unique.len(), 64);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_transition_failure_does_not_abandon_rest_of_batch(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 3).await;
    let consumer = ReleasingConsumer {
        pool: pool.clone(),
        release_seq: 1,
    };
    let cancel = CancellationToken::new();

    // Act
    let result = outbox.process(&cancel, at(0), 10, &consumer).await;

    // Assert
    match result {
        Err(DomainError::InvariantViolation(msg)) => assert!(msg.contains("c1/1")),
        other => panic!("expected InvariantViolation, got {other:?}"),
    }
    assert_eq!(outbox.get("c1", 1).await.unwrap().status, OutboxStatus::Pending);
    for seq in [2, 3] {
        match outbox.get("c1", seq).await {
            Err(DomainError::NotFound { .. }) => {}
            other => panic!("expected row {seq} to be completed, got {other:?}"),
        }
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_stale_lease_is_reclaimed(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 1).await;
    let cancel = CancellationToken::new();
    outbox.claim(&cancel, at(0), 10).await.unwrap();

    // Act
    let within_lease = outbox.claim(&cancel, at(119), 10).await.unwrap();
    let after_lease = outbox.claim(&cancel, at(120), 10).await.unwrap();

    // Assert
    assert!(within_lease.is_empty());
    assert_eq!(after_lease.len(), 1);
    assert_eq!(after_lease[0].updated_at, at(120));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_claim_rejects_zero_limit(pool: SqlitePool) {
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);

    let result = outbox.claim(&CancellationToken::new(), at(0), 0).await;

    assert!(matches!(result, Err(DomainError::Validation(_))));
}

// --- shadow mode ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_shadow_mode_records_failure_without_delivery(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 2).await;
    let cancel = CancellationToken::new();

    // Act
    let report = outbox.process_shadow(&cancel, at(0), 10).await.unwrap();

    // Assert
    assert_eq!(report.claimed, 2);
    assert_eq!(report.failed, 2);
    let rows = outbox
        .list(&OutboxListFilter {
            status: Some(OutboxStatus::Failed),
            ..OutboxListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(
        rows.iter()
            .all(|r| r.last_error.as_deref() == Some(SHADOW_MODE_ERROR))
    );
    assert!(!is_applied(&pool, "c1", 1).await.unwrap());
}

// --- requeue ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_requeue_dead_row_resets_attempts(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 1);
    append_markers(&journal, 1).await;
    let cancel = CancellationToken::new();
    outbox
        .process(&cancel, at(0), 10, &FailingConsumer("broken"))
        .await
        .unwrap();

    // Act
    let requeued = outbox.requeue_dead(&CancellationToken::new(), "c1", 1, at(60)).await.unwrap();

    // Assert
    assert!(requeued);
    let row = outbox.get("c1", 1).await.unwrap();
    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.attempt_count, 0);
    assert_eq!(row.next_attempt_at, at(60));
    assert_eq!(row.last_error, None);

    let report = outbox
        .process(&cancel, at(60), 10, &RecordingConsumer::new())
        .await
        .unwrap();
    assert_eq!(report.applied, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_requeue_ignores_live_rows_and_reports_missing(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 1).await;

    // Act
    let live = outbox.requeue_dead(&CancellationToken::new(), "c1", 1, at(0)).await.unwrap();
    let missing = outbox.requeue_dead(&CancellationToken::new(), "c1", 99, at(0)).await;

    // Assert
    assert!(!live);
    assert!(matches!(missing, Err(DomainError::NotFound { .. })));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_requeue_batch_takes_oldest_dead_rows(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 1);
    append_markers(&journal, 3).await;
    let cancel = CancellationToken::new();
    let consumer = FailingConsumer("broken");
    for second in 0..3 {
        outbox.process(&cancel, at(second), 1, &consumer).await.unwrap();
    }

    // Act
    let moved = outbox.requeue_dead_batch(&CancellationToken::new(), 2, at(10)).await.unwrap();

    // Assert
    assert_eq!(moved, 2);
    assert_eq!(outbox.get("c1", 1).await.unwrap().status, OutboxStatus::Pending);
    assert_eq!(outbox.get("c1", 2).await.unwrap().status, OutboxStatus::Pending);
    assert_eq!(outbox.get("c1", 3).await.unwrap().status, OutboxStatus::Dead);
}

// --- summary and listing ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_summary_counts_rows_per_status(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 3).await;
    let cancel = CancellationToken::new();
    outbox.claim(&cancel, at(0), 1).await.unwrap();

    // Act
    let summary = outbox.summary().await.unwrap();

    // Assert
    assert_eq!(summary.pending, 2);
    assert_eq!(summary.processing, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.dead, 0);
    assert_eq!(summary.oldest_pending.map(|r| r.seq), Some(2));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_list_filters_by_campaign_and_limit(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let outbox = outbox(&journal, 8);
    append_markers(&journal, 3).await;
    journal
        .append(&CancellationToken::new(), sample_event("c2", "test.happened", 1))
        .await
        .unwrap();

    // Act
    let c2 = outbox
        .list(&OutboxListFilter {
            campaign_id: Some("c2".into()),
            ..OutboxListFilter::default()
        })
        .await
        .unwrap();
    let limited = outbox
        .list(&OutboxListFilter {
            limit: 2,
            ..OutboxListFilter::default()
        })
        .await
        .unwrap();

    // Assert
    assert_eq!(c2.len(), 1);
    assert_eq!(c2[0].campaign_id, "c2");
    assert_eq!(limited.len(), 2);
}
