//! Domain events for the Daggerheart rules context.

use duality_core::error::DomainError;
use duality_core::event::NewEvent;
use duality_core::registry::EventRegistry;
use serde::{Deserialize, Serialize};

/// Type name of [`RulesEventKind::CharacterProfileUpdated`].
pub const CHARACTER_PROFILE_UPDATED: &str = "character.profile_updated";
/// Type name of [`RulesEventKind::CharacterStateChanged`].
pub const CHARACTER_STATE_CHANGED: &str = "character.state_changed";
/// Type name of [`RulesEventKind::GmFearChanged`].
pub const GM_FEAR_CHANGED: &str = "gm.fear_changed";
/// Type name of [`RulesEventKind::RollResolved`].
pub const ROLL_RESOLVED: &str = "action.roll_resolved";
/// Type name of [`RulesEventKind::OutcomeApplied`].
pub const OUTCOME_APPLIED: &str = "action.outcome_applied";

/// Emitted when a character's caps are set or changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfileUpdated {
    /// The character identifier.
    pub character_id: String,
    /// Maximum hit points.
    pub hp_max: i32,
    /// Maximum stress.
    pub stress_max: i32,
}

/// Emitted when a character's Hope or Stress changes outside a roll
/// outcome. Absent fields are unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterStateChanged {
    /// The character identifier.
    pub character_id: String,
    /// Hope after the change.
    pub hope_after: Option<i32>,
    /// Stress after the change.
    pub stress_after: Option<i32>,
}

/// Emitted when the campaign's GM Fear changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GmFearChanged {
    /// Fear before the change.
    pub before: i32,
    /// Fear after the change.
    pub after: i32,
}

/// Which side of the duality dice came out higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollDisposition {
    /// The Hope die was higher.
    WithHope,
    /// The Fear die was higher.
    WithFear,
    /// Both dice matched.
    Critical,
}

/// Emitted when an action roll is resolved. Audit only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResolved {
    /// The character who rolled.
    pub character_id: String,
    /// The Hope die result.
    pub hope_die: u8,
    /// The Fear die result.
    pub fear_die: u8,
    /// The modifier added to the dice.
    pub modifier: i32,
    /// Dice plus modifier.
    pub total: i32,
    /// Which die was higher.
    pub disposition: RollDisposition,
}

/// A character field touched by a roll outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterField {
    /// The Hope resource.
    Hope,
    /// The Stress track.
    Stress,
}

/// One changed character field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    /// The character identifier.
    pub character_id: String,
    /// The field that changed.
    pub field: CharacterField,
    /// Value before the outcome.
    pub before: i32,
    /// Value after the outcome.
    pub after: i32,
}

/// Emitted once per applied roll outcome. Audit only: its effects are
/// written inline by the outcome transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeApplied {
    /// The request that produced the outcome.
    pub request_id: String,
    /// Journal sequence of the roll this outcome resolves, if known.
    pub roll_seq: Option<u64>,
    /// The declared targets.
    pub targets: Vec<String>,
    /// Every character field that changed.
    pub changes: Vec<FieldChange>,
    /// The Fear change, if any.
    pub gm_fear: Option<GmFearChanged>,
}

/// Event payload variants for the rules context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RulesEventKind {
    /// A character's caps were set.
    CharacterProfileUpdated(CharacterProfileUpdated),
    /// A character's Hope or Stress changed.
    CharacterStateChanged(CharacterStateChanged),
    /// GM Fear changed.
    GmFearChanged(GmFearChanged),
    /// An action roll was resolved.
    RollResolved(RollResolved),
    /// A roll outcome was applied.
    OutcomeApplied(OutcomeApplied),
}

impl RulesEventKind {
    /// Returns the journal type name of this event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CharacterProfileUpdated(_) => CHARACTER_PROFILE_UPDATED,
            Self::CharacterStateChanged(_) => CHARACTER_STATE_CHANGED,
            Self::GmFearChanged(_) => GM_FEAR_CHANGED,
            Self::RollResolved(_) => ROLL_RESOLVED,
            Self::OutcomeApplied(_) => OUTCOME_APPLIED,
        }
    }

    /// Serializes the event into a journal payload.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        // Serialization of derived Serialize types to Value is infallible.
        serde_json::to_value(self).expect("RulesEventKind serialization is infallible")
    }

    /// Builds a journal event carrying this payload.
    pub fn to_new_event(
        &self,
        campaign_id: impl Into<String>,
        actor_type: impl Into<String>,
    ) -> NewEvent {
        NewEvent::new(campaign_id, self.event_type(), actor_type, self.to_payload())
    }

    /// Decodes a journal payload, checking it matches `event_type`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `event_type` is not a rules
    /// event, the payload does not decode, or its variant does not match
    /// `event_type`.
    pub fn from_payload(event_type: &str, payload: &serde_json::Value) -> Result<Self, DomainError> {
        if !EventCatalog::is_known(event_type) {
            return Err(DomainError::Validation(format!(
                "{event_type} is not a rules event type"
            )));
        }
        let kind: Self = serde_json::from_value(payload.clone()).map_err(|e| {
            DomainError::Validation(format!("undecodable {event_type} payload: {e}"))
        })?;
        if kind.event_type() != event_type {
            return Err(DomainError::Validation(format!(
                "payload variant {} does not match event type {event_type}",
                kind.event_type()
            )));
        }
        Ok(kind)
    }
}

/// The registry of rules event types.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventCatalog;

impl EventCatalog {
    /// Every event type this context emits, with its audit-only flag.
    pub const TYPES: [(&'static str, bool); 5] = [
        (CHARACTER_PROFILE_UPDATED, false),
        (CHARACTER_STATE_CHANGED, false),
        (GM_FEAR_CHANGED, false),
        (ROLL_RESOLVED, true),
        (OUTCOME_APPLIED, true),
    ];

    /// Returns true if `event_type` belongs to this context.
    #[must_use]
    pub fn is_known(event_type: &str) -> bool {
        Self::TYPES.iter().any(|(name, _)| *name == event_type)
    }
}

impl EventRegistry for EventCatalog {
    fn is_audit_only(&self, event_type: &str) -> bool {
        Self::TYPES
            .iter()
            .any(|(name, audit_only)| *audit_only && *name == event_type)
    }
}
