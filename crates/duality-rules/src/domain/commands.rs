//! Commands for the Daggerheart rules context.

use duality_core::command::Command;

/// A Hope/Stress adjustment for one character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterDelta {
    /// The character to adjust.
    pub character_id: String,
    /// Signed change to Hope.
    pub hope_delta: i32,
    /// Signed change to Stress.
    pub stress_delta: i32,
}

/// Command to apply the resolved outcome of an action roll.
#[derive(Debug, Clone)]
pub struct ApplyRollOutcome {
    /// The campaign the roll happened in.
    pub campaign_id: String,
    /// The session the roll happened in.
    pub session_id: String,
    /// Caller-supplied request identifier; one outcome per request.
    pub request_id: String,
    /// Tool or service invocation that issued the command.
    pub invocation_id: Option<String>,
    /// Kind of actor applying the outcome.
    pub actor_type: String,
    /// Identifier of the actor.
    pub actor_id: Option<String>,
    /// Journal sequence of the resolved roll, if known.
    pub roll_seq: Option<u64>,
    /// Characters the outcome applies to.
    pub targets: Vec<String>,
    /// Per-character adjustments; several entries for one character add up.
    pub character_deltas: Vec<CharacterDelta>,
    /// Fear gained by the GM. Must not be negative.
    pub gm_fear_delta: i32,
}

impl Command for ApplyRollOutcome {
    fn command_type(&self) -> &'static str {
        "action.apply_roll_outcome"
    }

    fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Command to record a resolved duality-dice action roll.
#[derive(Debug, Clone)]
pub struct RecordRoll {
    /// The campaign the roll happened in.
    pub campaign_id: String,
    /// The session the roll happened in.
    pub session_id: String,
    /// Caller-supplied request identifier.
    pub request_id: String,
    /// Kind of actor who rolled.
    pub actor_type: String,
    /// Identifier of the actor.
    pub actor_id: Option<String>,
    /// The character who rolled.
    pub character_id: String,
    /// The Hope d12 result.
    pub hope_die: u8,
    /// The Fear d12 result.
    pub fear_die: u8,
    /// The modifier added to the dice.
    pub modifier: i32,
}

impl Command for RecordRoll {
    fn command_type(&self) -> &'static str {
        "action.record_roll"
    }

    fn request_id(&self) -> &str {
        &self.request_id
    }
}
