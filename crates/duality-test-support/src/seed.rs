//! Projection seeding helpers.

use duality_event_store::projections::{
    CharacterProfile, CharacterState, put_character_profile, put_character_state,
};
use sqlx::SqlitePool;

use crate::events::fixed_time;

/// Seeds a character's profile and state.
///
/// # Panics
///
/// Panics if either write fails.
pub async fn seed_character(
    pool: &SqlitePool,
    profile: CharacterProfile,
    hope: i32,
    stress: i32,
) -> CharacterState {
    put_character_profile(pool, &profile, fixed_time())
        .await
        .unwrap();
    let state = CharacterState {
        campaign_id: profile.campaign_id.clone(),
        character_id: profile.character_id.clone(),
        hope,
        stress,
        hp: profile.hp_max,
    };
    put_character_state(pool, &state, fixed_time()).await.unwrap();
    state
}
