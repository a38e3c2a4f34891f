//! Query handlers for the Daggerheart rules context.
//!
//! Read the numeric projections and return read-only view DTOs.

use duality_core::error::DomainError;
use duality_event_store::projections::{get_character_profile, get_character_state, get_gm_fear};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::domain::outcome::{GM_FEAR_MAX, HOPE_MAX};

/// Read-only view of a character's tracked resources.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct CharacterSheetView {
    /// The character identifier.
    pub character_id: String,
    /// Current Hope.
    pub hope: i32,
    /// Hope ceiling.
    pub hope_max: i32,
    /// Current Stress.
    pub stress: i32,
    /// Stress ceiling from the profile.
    pub stress_max: i32,
    /// Current hit points.
    pub hp: i32,
    /// Hit point ceiling from the profile.
    pub hp_max: i32,
}

/// Read-only view of a campaign's GM Fear pool.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct GmFearView {
    /// The campaign identifier.
    pub campaign_id: String,
    /// Current Fear; zero when no snapshot exists yet.
    pub gm_fear: i32,
    /// Fear ceiling.
    pub gm_fear_max: i32,
}

/// Retrieves a character's resources.
///
/// # Errors
///
/// Returns `DomainError::NotFound` if the profile or state is missing.
pub async fn get_character_sheet(
    pool: &SqlitePool,
    campaign_id: &str,
    character_id: &str,
) -> Result<CharacterSheetView, DomainError> {
    let profile = get_character_profile(pool, campaign_id, character_id).await?;
    let state = get_character_state(pool, campaign_id, character_id).await?;

    Ok(CharacterSheetView {
        character_id: state.character_id,
        hope: state.hope,
        hope_max: HOPE_MAX,
        stress: state.stress,
        stress_max: profile.stress_max,
        hp: state.hp,
        hp_max: profile.hp_max,
    })
}

/// Retrieves a campaign's GM Fear.
///
/// # Errors
///
/// Returns `DomainError` if the query fails.
pub async fn get_campaign_fear(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<GmFearView, DomainError> {
    let gm_fear = get_gm_fear(pool, campaign_id).await?.unwrap_or(0);
    Ok(GmFearView {
        campaign_id: campaign_id.to_owned(),
        gm_fear,
        gm_fear_max: GM_FEAR_MAX,
    })
}
