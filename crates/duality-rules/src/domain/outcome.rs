//! Pure roll-outcome rules: validation, delta aggregation and clamping.

use duality_core::error::DomainError;

use crate::domain::commands::{ApplyRollOutcome, CharacterDelta, RecordRoll};
use crate::domain::events::{CharacterField, FieldChange, RollDisposition};

/// Hope never exceeds this, whatever the character's profile says.
pub const HOPE_MAX: i32 = 6;

/// The GM Fear pool holds at most this many tokens.
pub const GM_FEAR_MAX: i32 = 12;

/// Faces on each duality die.
pub const DIE_FACES: u8 = 12;

/// Summed Hope/Stress change for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetDelta {
    /// Total Hope change.
    pub hope: i32,
    /// Total Stress change.
    pub stress: i32,
}

/// Validates an outcome command before any state is touched.
///
/// # Errors
///
/// Returns `DomainError::Validation` for missing identifiers, an empty
/// target set or a negative Fear delta.
pub fn validate(command: &ApplyRollOutcome) -> Result<(), DomainError> {
    if command.campaign_id.trim().is_empty() {
        return Err(DomainError::Validation("campaign id is required".into()));
    }
    if command.session_id.trim().is_empty() {
        return Err(DomainError::Validation("session id is required".into()));
    }
    if command.request_id.trim().is_empty() {
        return Err(DomainError::Validation("request id is required".into()));
    }
    if command.actor_type.trim().is_empty() {
        return Err(DomainError::Validation("actor type is required".into()));
    }
    if command.targets.iter().all(|t| t.trim().is_empty()) {
        return Err(DomainError::Validation(
            "at least one target character is required".into(),
        ));
    }
    if command.gm_fear_delta < 0 {
        return Err(DomainError::Validation(format!(
            "gm fear delta must not be negative, got {}",
            command.gm_fear_delta
        )));
    }
    Ok(())
}

/// Validates a roll record.
///
/// # Errors
///
/// Returns `DomainError::Validation` for missing identifiers or dice outside
/// `1..=DIE_FACES`.
pub fn validate_roll(command: &RecordRoll) -> Result<(), DomainError> {
    for (value, what) in [
        (&command.campaign_id, "campaign id"),
        (&command.session_id, "session id"),
        (&command.request_id, "request id"),
        (&command.actor_type, "actor type"),
        (&command.character_id, "character id"),
    ] {
        if value.trim().is_empty() {
            return Err(DomainError::Validation(format!("{what} is required")));
        }
    }
    for (die, name) in [(command.hope_die, "hope"), (command.fear_die, "fear")] {
        if !(1..=DIE_FACES).contains(&die) {
            return Err(DomainError::Validation(format!(
                "{name} die must be between 1 and {DIE_FACES}, got {die}"
            )));
        }
    }
    Ok(())
}

/// Classifies a duality-dice roll.
#[must_use]
pub fn disposition(hope_die: u8, fear_die: u8) -> RollDisposition {
    match hope_die.cmp(&fear_die) {
        std::cmp::Ordering::Greater => RollDisposition::WithHope,
        std::cmp::Ordering::Less => RollDisposition::WithFear,
        std::cmp::Ordering::Equal => RollDisposition::Critical,
    }
}

/// Sums deltas per target, in first-mention target order.
///
/// Targets named twice are applied once; targets without deltas get a zero
/// delta.
///
/// # Errors
///
/// Returns `DomainError::Validation` if a delta names a character outside
/// `targets`.
pub fn aggregate_deltas(
    targets: &[String],
    deltas: &[CharacterDelta],
) -> Result<Vec<(String, NetDelta)>, DomainError> {
    let mut net: Vec<(String, NetDelta)> = Vec::with_capacity(targets.len());
    for target in targets.iter().filter(|t| !t.trim().is_empty()) {
        if !net.iter().any(|(id, _)| id == target) {
            net.push((target.clone(), NetDelta::default()));
        }
    }

    for delta in deltas {
        let Some((_, entry)) = net.iter_mut().find(|(id, _)| *id == delta.character_id) else {
            return Err(DomainError::Validation(format!(
                "delta for character {} which is not a target",
                delta.character_id
            )));
        };
        entry.hope = entry.hope.saturating_add(delta.hope_delta);
        entry.stress = entry.stress.saturating_add(delta.stress_delta);
    }
    Ok(net)
}

/// Applies a Hope delta, clamped to `[0, HOPE_MAX]`.
#[must_use]
pub fn apply_hope(current: i32, delta: i32) -> i32 {
    current.saturating_add(delta).clamp(0, HOPE_MAX)
}

/// Applies a Stress delta, clamped to `[0, stress_max]`.
#[must_use]
pub fn apply_stress(current: i32, delta: i32, stress_max: i32) -> i32 {
    current.saturating_add(delta).clamp(0, stress_max.max(0))
}

/// Applies a Fear gain, clamped to `[0, GM_FEAR_MAX]`.
#[must_use]
pub fn apply_fear(current: i32, delta: i32) -> i32 {
    current.saturating_add(delta).clamp(0, GM_FEAR_MAX)
}

/// Computes the change records for one character, omitting fields whose
/// value does not change.
#[must_use]
pub fn plan_character_changes(
    character_id: &str,
    hope: i32,
    stress: i32,
    stress_max: i32,
    delta: NetDelta,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let new_hope = apply_hope(hope, delta.hope);
    if new_hope != hope {
        changes.push(FieldChange {
            character_id: character_id.to_owned(),
            field: CharacterField::Hope,
            before: hope,
            after: new_hope,
        });
    }
    let new_stress = apply_stress(stress, delta.stress, stress_max);
    if new_stress != stress {
        changes.push(FieldChange {
            character_id: character_id.to_owned(),
            field: CharacterField::Stress,
            before: stress,
            after: new_stress,
        });
    }
    changes
}
