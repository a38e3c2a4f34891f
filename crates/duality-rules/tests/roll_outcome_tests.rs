//! Integration tests for the roll-outcome transaction.

use std::sync::Arc;

use duality_core::error::DomainError;
use duality_event_store::checkpoint::{ExactlyOnceApplier, is_applied};
use duality_event_store::journal::Journal;
use duality_event_store::outbox::{Outbox, ProjectionConsumer};
use duality_event_store::projections::{CharacterProfile, get_character_state, get_gm_fear};
use duality_rules::application::command_handlers::{
    handle_apply_roll_outcome, handle_record_roll,
};
use duality_rules::application::projector::RulesProjector;
use duality_rules::application::query_handlers::{get_campaign_fear, get_character_sheet};
use duality_rules::domain::commands::{ApplyRollOutcome, CharacterDelta, RecordRoll};
use duality_rules::domain::events::{
    CharacterField, EventCatalog, FieldChange, GM_FEAR_CHANGED, GmFearChanged, OUTCOME_APPLIED,
    ROLL_RESOLVED, RollDisposition, RulesEventKind,
};
use duality_test_support::{FixedClock, fixed_time, sample_event, seed_character};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

fn journal(pool: &SqlitePool) -> Journal {
    Journal::new(pool.clone(), Arc::new(FixedClock(fixed_time())))
}

fn profile(character_id: &str, stress_max: i32) -> CharacterProfile {
    CharacterProfile {
        campaign_id: "C1".into(),
        character_id: character_id.into(),
        hp_max: 6,
        stress_max,
    }
}

fn outcome(request_id: &str, deltas: Vec<CharacterDelta>, gm_fear_delta: i32) -> ApplyRollOutcome {
    ApplyRollOutcome {
        campaign_id: "C1".into(),
        session_id: "S1".into(),
        request_id: request_id.into(),
        invocation_id: Some("inv-1".into()),
        actor_type: "gm".into(),
        actor_id: Some("gm-1".into()),
        roll_seq: None,
        targets: vec!["char-1".into()],
        character_deltas: deltas,
        gm_fear_delta,
    }
}

fn delta(hope: i32, stress: i32) -> CharacterDelta {
    CharacterDelta {
        character_id: "char-1".into(),
        hope_delta: hope,
        stress_delta: stress,
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_outcome_updates_hope_and_stress(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    journal
        .append(&CancellationToken::new(), sample_event("C1", "session.started", 1))
        .await
        .unwrap();
    seed_character(&pool, profile("char-1", 12), 3, 2).await;
    let command = outcome("req-1", vec![delta(2, 1)], 0);

    // Act
    let result = handle_apply_roll_outcome(&command, &journal, &CancellationToken::new())
        .await
        .unwrap();

    // Assert
    assert_eq!(
        result.changes,
        vec![
            FieldChange {
                character_id: "char-1".into(),
                field: CharacterField::Hope,
                before: 3,
                after: 5,
            },
            FieldChange {
                character_id: "char-1".into(),
                field: CharacterField::Stress,
                before: 2,
                after: 3,
            },
        ]
    );
    assert_eq!(result.events.len(), 1);
    let event = &result.events[0];
    assert_eq!(event.event_type, OUTCOME_APPLIED);
    assert_eq!(event.seq, 2);
    assert_eq!(event.request_id.as_deref(), Some("req-1"));
    assert_eq!(event.session_id.as_deref(), Some("S1"));

    let state = get_character_state(&pool, "C1", "char-1").await.unwrap();
    assert_eq!((state.hope, state.stress), (5, 3));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_outcome_clamps_hope_and_stress(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    seed_character(&pool, profile("char-1", 12), 5, 11).await;
    let command = outcome("req-1", vec![delta(3, 4)], 0);

    // Act
    let result = handle_apply_roll_outcome(&command, &journal, &CancellationToken::new())
        .await
        .unwrap();

    // Assert
    let after: Vec<i32> = result.changes.iter().map(|c| c.after).collect();
    assert_eq!(after, vec![6, 12]);
    let sheet = get_character_sheet(&pool, "C1", "char-1").await.unwrap();
    assert_eq!(sheet.hope, 6);
    assert_eq!(sheet.stress, 12);
    assert_eq!(sheet.stress_max, 12);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_deltas_for_same_character_are_summed(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    seed_character(&pool, profile("char-1", 6), 1, 0).await;
    let command = outcome("req-1", vec![delta(1, 0), delta(1, 2), delta(0, -1)], 0);

    // Act
    let result = handle_apply_roll_outcome(&command, &journal, &CancellationToken::new())
        .await
        .unwrap();

    // Assert
    let state = get_character_state(&pool, "C1", "char-1").await.unwrap();
    assert_eq!((state.hope, state.stress), (3, 1));
    assert_eq!(result.changes.len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_unchanged_outcome_appends_nothing(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    seed_character(&pool, profile("char-1", 12), 6, 0).await;
    let command = outcome("req-1", vec![delta(1, -1)], 0);

    // Act
    let result = handle_apply_roll_outcome(&command, &journal, &CancellationToken::new())
        .await
        .unwrap();

    // Assert
    assert!(result.changes.is_empty());
    assert!(result.events.is_empty());
    assert_eq!(journal.latest_seq("C1").await.unwrap(), 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_second_call_with_same_request_is_rejected(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    seed_character(&pool, profile("char-1", 12), 3, 2).await;
    let command = outcome("req-1", vec![delta(2, 1)], 1);
    let cancel = CancellationToken::new();
    handle_apply_roll_outcome(&command, &journal, &cancel)
        .await
        .unwrap();

    // Act
    let second = handle_apply_roll_outcome(&command, &journal, &cancel).await;

    // Assert
    match second {
        Err(DomainError::AlreadyApplied {
            campaign_id,
            session_id,
            request_id,
        }) => {
            assert_eq!(campaign_id, "C1");
            assert_eq!(session_id, "S1");
            assert_eq!(request_id, "req-1");
        }
        other => panic!("expected AlreadyApplied, got {other:?}"),
    }
    let state = get_character_state(&pool, "C1", "char-1").await.unwrap();
    assert_eq!((state.hope, state.stress), (5, 3));
    assert_eq!(get_gm_fear(&pool, "C1").await.unwrap(), Some(1));
    assert_eq!(journal.latest_seq("C1").await.unwrap(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_fear_gain_appends_change_event_and_checkpoint(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    seed_character(&pool, profile("char-1", 12), 3, 2).await;
    let command = outcome("req-1", vec![], 2);

    // Act
    let result = handle_apply_roll_outcome(&command, &journal, &CancellationToken::new())
        .await
        .unwrap();

    // Assert
    assert_eq!(result.gm_fear, Some(GmFearChanged { before: 0, after: 2 }));
    assert_eq!(result.events.len(), 1);
    let fear_event = &result.events[0];
    assert_eq!(fear_event.event_type, GM_FEAR_CHANGED);
    assert_eq!(
        RulesEventKind::from_payload(GM_FEAR_CHANGED, &fear_event.payload).unwrap(),
        RulesEventKind::GmFearChanged(GmFearChanged { before: 0, after: 2 })
    );
    assert!(is_applied(&pool, "C1", fear_event.seq).await.unwrap());
    assert_eq!(get_campaign_fear(&pool, "C1").await.unwrap().gm_fear, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_fear_is_clamped_to_pool_size(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    seed_character(&pool, profile("char-1", 12), 3, 2).await;
    let cancel = CancellationToken::new();
    handle_apply_roll_outcome(&outcome("req-1", vec![], 11), &journal, &cancel)
        .await
        .unwrap();

    // Act
    let result = handle_apply_roll_outcome(&outcome("req-2", vec![], 5), &journal, &cancel)
        .await
        .unwrap();

    // Assert
    assert_eq!(result.gm_fear, Some(GmFearChanged { before: 11, after: 12 }));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_negative_fear_is_rejected_before_any_write(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    seed_character(&pool, profile("char-1", 12), 3, 2).await;
    let command = outcome("req-1", vec![delta(2, 1)], -1);

    // Act
    let result = handle_apply_roll_outcome(&command, &journal, &CancellationToken::new()).await;

    // Assert
    assert!(matches!(result, Err(DomainError::Validation(_))));
    let state = get_character_state(&pool, "C1", "char-1").await.unwrap();
    assert_eq!((state.hope, state.stress), (3, 2));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_delta_outside_targets_is_rejected(pool: SqlitePool) {
    let journal = journal(&pool);
    let mut command = outcome("req-1", vec![delta(1, 0)], 0);
    command.character_deltas[0].character_id = "char-9".into();

    let result = handle_apply_roll_outcome(&command, &journal, &CancellationToken::new()).await;

    assert!(matches!(result, Err(DomainError::Validation(_))));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_missing_character_rolls_back_everything(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let command = outcome("req-1", vec![delta(1, 0)], 2);
    let cancel = CancellationToken::new();

    // Act
    let result = handle_apply_roll_outcome(&command, &journal, &cancel).await;

    // Assert
    match result {
        Err(DomainError::NotFound { entity, .. }) => assert_eq!(entity, "character profile"),
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert_eq!(get_gm_fear(&pool, "C1").await.unwrap(), None);
    assert_eq!(journal.latest_seq("C1").await.unwrap(), 0);

    seed_character(&pool, profile("char-1", 12), 3, 2).await;
    let retried = handle_apply_roll_outcome(&command, &journal, &cancel).await;
    assert!(retried.is_ok());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_outbox_clears_inline_projected_events(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool).with_outbox(true);
    seed_character(&pool, profile("char-1", 12), 3, 2).await;
    let cancel = CancellationToken::new();
    handle_apply_roll_outcome(&outcome("req-1", vec![delta(1, 0)], 1), &journal, &cancel)
        .await
        .unwrap();
    let outbox = Outbox::new(journal.clone(), Arc::new(EventCatalog));
    let consumer = ProjectionConsumer::new(
        ExactlyOnceApplier::new(pool.clone(), Arc::new(FixedClock(fixed_time()))),
        Arc::new(RulesProjector),
        cancel.clone(),
    );

    // Act
    let report = outbox
        .process(&cancel, fixed_time(), 10, &consumer)
        .await
        .unwrap();

    // Assert
    assert_eq!(report.claimed, 2);
    assert_eq!(report.applied, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(outbox.summary().await.unwrap().pending, 0);
    assert_eq!(get_gm_fear(&pool, "C1").await.unwrap(), Some(1));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_record_roll_appends_audit_event(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    let command = RecordRoll {
        campaign_id: "C1".into(),
        session_id: "S1".into(),
        request_id: "req-1".into(),
        actor_type: "participant".into(),
        actor_id: Some("p1".into()),
        character_id: "char-1".into(),
        hope_die: 4,
        fear_die: 9,
        modifier: 2,
    };

    // Act
    let stored = handle_record_roll(&command, &journal, &CancellationToken::new()).await.unwrap();

    // Assert
    assert_eq!(stored.event_type, ROLL_RESOLVED);
    match RulesEventKind::from_payload(ROLL_RESOLVED, &stored.payload).unwrap() {
        RulesEventKind::RollResolved(roll) => {
            assert_eq!(roll.total, 15);
            assert_eq!(roll.disposition, RollDisposition::WithFear);
        }
        other => panic!("expected RollResolved, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_outcomes_for_distinct_requests_all_apply(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    seed_character(&pool, profile("char-1", 100), 0, 0).await;
    let cancel = CancellationToken::new();

    // Act
    let handles: Vec<_> = (0..16)
        .map(|n| {
            let journal = journal.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let command = outcome(&format!("req-{n}"), vec![delta(0, 1)], 0);
                handle_apply_roll_outcome(&command, &journal, &cancel).await
            })
        })
        .collect();
    let mut failures = Vec::new();
    for handle in handles {
        if let Err(err) = handle.await.unwrap() {
            failures.push(err.to_string());
        }
    }

    // Assert
    assert!(failures.is_empty(), "expected every outcome to apply, got {failures:?}");
    let state = get_character_state(&pool, "C1", "char-1").await.unwrap();
    assert_eq!(state.stress, 16);
    assert_eq!(journal.latest_seq("C1").await.unwrap(), 16);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_outcomes_for_same_request_apply_once(pool: SqlitePool) {
    // Arrange
    let journal = journal(&pool);
    seed_character(&pool, profile("char-1", 12), 3, 0).await;
    let cancel = CancellationToken::new();
    let command = outcome("req-1", vec![delta(0, 1)], 0);

    // Act
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let journal = journal.clone();
            let cancel = cancel.clone();
            let command = command.clone();
            tokio::spawn(async move { handle_apply_roll_outcome(&command, &journal, &cancel).await })
        })
        .collect();
    let mut applied = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => applied += 1,
            Err(DomainError::AlreadyApplied { .. }) => already += 1,
            Err(other) => panic!("expected AlreadyApplied, got {other:?}"),
        }
    }

    // Assert
    assert_eq!((applied, already), (1, 7));
    let state = get_character_state(&pool, "C1", "char-1").await.unwrap();
    assert_eq!(state.stress, 1);
}
