//! Command handlers for the Daggerheart rules context.
//!
//! Handlers validate the command, then run every read, projection write and
//! journal append inside one store transaction.

use chrono::{DateTime, Utc};
use duality_core::error::DomainError;
use duality_core::event::{NewEvent, StoredEvent};
use duality_event_store::checkpoint::try_reserve;
use duality_event_store::convert::to_millis;
use duality_event_store::error::{db_error, is_unique_violation_on};
use duality_event_store::journal::Journal;
use duality_event_store::projections::{
    get_character_profile, get_character_state, get_gm_fear, put_gm_fear, update_character_hope,
    update_character_stress,
};
use duality_event_store::retry::{RetryPolicy, retry_on_contention};
use duality_event_store::store::begin_write;
use sqlx::SqliteConnection;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::domain::commands::{ApplyRollOutcome, RecordRoll};
use crate::domain::events::{
    CharacterField, FieldChange, GM_FEAR_CHANGED, GmFearChanged, OutcomeApplied, RollResolved,
    RulesEventKind,
};
use crate::domain::outcome::{self, NetDelta};

/// What an applied roll outcome changed.
#[derive(Debug, Clone, PartialEq)]
pub struct RollOutcomeResult {
    /// The request that produced the outcome.
    pub request_id: String,
    /// Character fields that changed, with before/after values.
    pub changes: Vec<FieldChange>,
    /// The Fear change, if Fear moved.
    pub gm_fear: Option<GmFearChanged>,
    /// Events appended by the outcome, in journal order.
    pub events: Vec<StoredEvent>,
}

fn already_applied(command: &ApplyRollOutcome) -> DomainError {
    DomainError::AlreadyApplied {
        campaign_id: command.campaign_id.clone(),
        session_id: command.session_id.clone(),
        request_id: command.request_id.clone(),
    }
}

/// Stamps an outcome event with the command's correlation fields.
fn correlate(event: NewEvent, command: &ApplyRollOutcome, now: DateTime<Utc>) -> NewEvent {
    let mut event = event
        .at(now)
        .with_session(command.session_id.clone())
        .with_request(command.request_id.clone());
    if let Some(invocation_id) = &command.invocation_id {
        event = event.with_invocation(invocation_id.clone());
    }
    if let Some(actor_id) = &command.actor_id {
        event = event.with_actor_id(actor_id.clone());
    }
    event
}

async fn outcome_recorded(
    conn: &mut SqliteConnection,
    command: &ApplyRollOutcome,
) -> Result<bool, DomainError> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM daggerheart_outcome_applied \
         WHERE campaign_id = ? AND session_id = ? AND request_id = ?",
    )
    .bind(&command.campaign_id)
    .bind(&command.session_id)
    .bind(&command.request_id)
    .fetch_optional(conn)
    .await
    .map_err(db_error(&format!(
        "check outcome marker {}/{}",
        command.campaign_id, command.request_id
    )))?;
    Ok(found.is_some())
}

async fn record_outcome(
    conn: &mut SqliteConnection,
    command: &ApplyRollOutcome,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    let inserted = sqlx::query(
        "INSERT INTO daggerheart_outcome_applied (campaign_id, session_id, request_id, applied_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(&command.campaign_id)
    .bind(&command.session_id)
    .bind(&command.request_id)
    .bind(to_millis(now))
    .execute(conn)
    .await;

    match inserted {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation_on(&err, "daggerheart_outcome_applied") => {
            Err(already_applied(command))
        }
        Err(err) => Err(db_error(&format!(
            "record outcome marker {}/{}",
            command.campaign_id, command.request_id
        ))(err)),
    }
}

/// Handles the `ApplyRollOutcome` command: adjusts GM Fear and each
/// target's Hope and Stress, appends the resulting events and records the
/// request as applied, all in one transaction.
///
/// Lock contention restarts the whole transaction with linear backoff.
///
/// # Errors
///
/// Returns `DomainError::Validation` before touching the store,
/// `DomainError::AlreadyApplied` if the request already committed,
/// `DomainError::NotFound` for a target without profile or state, or store
/// errors. Nothing is written on any error.
#[instrument(skip(command, journal, cancel), fields(
    campaign_id = %command.campaign_id,
    session_id = %command.session_id,
    request_id = %command.request_id
))]
pub async fn handle_apply_roll_outcome(
    command: &ApplyRollOutcome,
    journal: &Journal,
    cancel: &CancellationToken,
) -> Result<RollOutcomeResult, DomainError> {
    outcome::validate(command)?;
    let deltas = outcome::aggregate_deltas(&command.targets, &command.character_deltas)?;

    let result = retry_on_contention(
        cancel,
        &RetryPolicy::default(),
        "apply roll outcome",
        || apply_outcome(command, &deltas, journal),
    )
    .await?;

    info!(
        changes = result.changes.len(),
        fear_changed = result.gm_fear.is_some(),
        events = result.events.len(),
        "roll outcome applied"
    );
    Ok(result)
}

async fn apply_outcome(
    command: &ApplyRollOutcome,
    deltas: &[(String, NetDelta)],
    journal: &Journal,
) -> Result<RollOutcomeResult, DomainError> {
    let campaign_id = command.campaign_id.as_str();
    let now = journal.clock().now();
    let mut tx = begin_write(journal.pool(), "begin roll outcome").await?;

    if outcome_recorded(&mut tx, command).await? {
        return Err(already_applied(command));
    }

    let mut events = Vec::new();

    let mut gm_fear = None;
    if command.gm_fear_delta > 0 {
        let before = get_gm_fear(&mut *tx, campaign_id).await?.unwrap_or(0);
        let after = outcome::apply_fear(before, command.gm_fear_delta);
        if after != before {
            put_gm_fear(&mut *tx, campaign_id, after, now).await?;
            let change = GmFearChanged { before, after };
            let event = RulesEventKind::GmFearChanged(change)
                .to_new_event(campaign_id, command.actor_type.clone())
                .with_entity("campaign", campaign_id);
            let appended = journal
                .append_in_tx(&mut tx, correlate(event, command, now))
                .await?;
            // Fear is projected here, so the outbox must not apply it again.
            try_reserve(&mut tx, campaign_id, appended.event.seq, GM_FEAR_CHANGED, now).await?;
            events.push(appended.event);
            gm_fear = Some(change);
        }
    }

    let mut changes = Vec::new();
    for (character_id, delta) in deltas {
        let profile = get_character_profile(&mut *tx, campaign_id, character_id).await?;
        let state = get_character_state(&mut *tx, campaign_id, character_id).await?;
        let planned = outcome::plan_character_changes(
            character_id,
            state.hope,
            state.stress,
            profile.stress_max,
            *delta,
        );
        for change in &planned {
            match change.field {
                CharacterField::Hope => {
                    update_character_hope(&mut *tx, campaign_id, character_id, change.after, now)
                        .await?;
                }
                CharacterField::Stress => {
                    update_character_stress(&mut *tx, campaign_id, character_id, change.after, now)
                        .await?;
                }
            }
        }
        changes.extend(planned);
    }

    if !changes.is_empty() {
        let event = RulesEventKind::OutcomeApplied(OutcomeApplied {
            request_id: command.request_id.clone(),
            roll_seq: command.roll_seq,
            targets: deltas.iter().map(|(id, _)| id.clone()).collect(),
            changes: changes.clone(),
            gm_fear,
        })
        .to_new_event(campaign_id, command.actor_type.clone());
        let appended = journal
            .append_in_tx(&mut tx, correlate(event, command, now))
            .await?;
        events.push(appended.event);
    }

    record_outcome(&mut tx, command, now).await?;
    tx.commit().await.map_err(db_error("commit roll outcome"))?;

    Ok(RollOutcomeResult {
        request_id: command.request_id.clone(),
        changes,
        gm_fear,
        events,
    })
}

/// Handles the `RecordRoll` command: classifies the dice and appends an
/// audit-only roll event.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a malformed roll, or journal
/// errors including `DomainError::Cancelled`.
#[instrument(skip(command, journal, cancel), fields(
    campaign_id = %command.campaign_id,
    request_id = %command.request_id
))]
pub async fn handle_record_roll(
    command: &RecordRoll,
    journal: &Journal,
    cancel: &CancellationToken,
) -> Result<StoredEvent, DomainError> {
    outcome::validate_roll(command)?;

    let roll = RollResolved {
        character_id: command.character_id.clone(),
        hope_die: command.hope_die,
        fear_die: command.fear_die,
        modifier: command.modifier,
        total: i32::from(command.hope_die) + i32::from(command.fear_die) + command.modifier,
        disposition: outcome::disposition(command.hope_die, command.fear_die),
    };
    let mut event = RulesEventKind::RollResolved(roll)
        .to_new_event(command.campaign_id.clone(), command.actor_type.clone())
        .with_session(command.session_id.clone())
        .with_request(command.request_id.clone())
        .with_entity("character", command.character_id.clone());
    if let Some(actor_id) = &command.actor_id {
        event = event.with_actor_id(actor_id.clone());
    }

    journal.append(cancel, event).await
}
