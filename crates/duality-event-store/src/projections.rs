//! Get/put accessors for the numeric projections read by the rules
//! context.
//!
//! Every accessor takes any SQLite executor, so the same function serves a
//! pool, a pooled connection or an open transaction.

use chrono::{DateTime, Utc};
use duality_core::error::DomainError;
use serde::Serialize;
use sqlx::SqliteExecutor;

use crate::convert::to_millis;
use crate::error::db_error;

/// A character's caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CharacterProfile {
    /// Owning campaign.
    pub campaign_id: String,
    /// Character identifier.
    pub character_id: String,
    /// Maximum hit points.
    pub hp_max: i32,
    /// Maximum stress.
    pub stress_max: i32,
}

/// A character's current numeric state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CharacterState {
    /// Owning campaign.
    pub campaign_id: String,
    /// Character identifier.
    pub character_id: String,
    /// Current Hope.
    pub hope: i32,
    /// Current Stress.
    pub stress: i32,
    /// Current hit points.
    pub hp: i32,
}

fn character_key(campaign_id: &str, character_id: &str) -> String {
    format!("{campaign_id}/{character_id}")
}

/// Loads a character profile.
///
/// # Errors
///
/// Returns `DomainError::NotFound` if the profile does not exist.
pub async fn get_character_profile<'e, E: SqliteExecutor<'e>>(
    executor: E,
    campaign_id: &str,
    character_id: &str,
) -> Result<CharacterProfile, DomainError> {
    let key = character_key(campaign_id, character_id);
    sqlx::query_as(
        "SELECT campaign_id, character_id, hp_max, stress_max FROM character_profiles \
         WHERE campaign_id = ? AND character_id = ?",
    )
    .bind(campaign_id)
    .bind(character_id)
    .fetch_optional(executor)
    .await
    .map_err(db_error(&format!("get character profile {key}")))?
    .ok_or_else(|| DomainError::not_found("character profile", key))
}

/// Inserts or replaces a character profile.
///
/// # Errors
///
/// Returns `DomainError` if the write fails.
pub async fn put_character_profile<'e, E: SqliteExecutor<'e>>(
    executor: E,
    profile: &CharacterProfile,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    sqlx::query(
        "INSERT INTO character_profiles (campaign_id, character_id, hp_max, stress_max, updated_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (campaign_id, character_id) DO UPDATE SET \
             hp_max = excluded.hp_max, stress_max = excluded.stress_max, \
             updated_at = excluded.updated_at",
    )
    .bind(&profile.campaign_id)
    .bind(&profile.character_id)
    .bind(profile.hp_max)
    .bind(profile.stress_max)
    .bind(to_millis(now))
    .execute(executor)
    .await
    .map_err(db_error(&format!(
        "put character profile {}",
        character_key(&profile.campaign_id, &profile.character_id)
    )))?;
    Ok(())
}

/// Loads a character's current state.
///
/// # Errors
///
/// Returns `DomainError::NotFound` if the state does not exist.
pub async fn get_character_state<'e, E: SqliteExecutor<'e>>(
    executor: E,
    campaign_id: &str,
    character_id: &str,
) -> Result<CharacterState, DomainError> {
    let key = character_key(campaign_id, character_id);
    sqlx::query_as(
        "SELECT campaign_id, character_id, hope, stress, hp FROM character_states \
         WHERE campaign_id = ? AND character_id = ?",
    )
    .bind(campaign_id)
    .bind(character_id)
    .fetch_optional(executor)
    .await
    .map_err(db_error(&format!("get character state {key}")))?
    .ok_or_else(|| DomainError::not_found("character state", key))
}

/// Inserts or replaces a character's state.
///
/// # Errors
///
/// Returns `DomainError` if the write fails.
pub async fn put_character_state<'e, E: SqliteExecutor<'e>>(
    executor: E,
    state: &CharacterState,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    sqlx::query(
        "INSERT INTO character_states (campaign_id, character_id, hope, stress, hp, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (campaign_id, character_id) DO UPDATE SET \
             hope = excluded.hope, stress = excluded.stress, hp = excluded.hp, \
             updated_at = excluded.updated_at",
    )
    .bind(&state.campaign_id)
    .bind(&state.character_id)
    .bind(state.hope)
    .bind(state.stress)
    .bind(state.hp)
    .bind(to_millis(now))
    .execute(executor)
    .await
    .map_err(db_error(&format!(
        "put character state {}",
        character_key(&state.campaign_id, &state.character_id)
    )))?;
    Ok(())
}

async fn update_state_column<'e, E: SqliteExecutor<'e>>(
    executor: E,
    column: &'static str,
    campaign_id: &str,
    character_id: &str,
    value: i32,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    let key = character_key(campaign_id, character_id);
    let result = sqlx::query(&format!(
        "UPDATE character_states SET {column} = ?, updated_at = ? \
         WHERE campaign_id = ? AND character_id = ?"
    ))
    .bind(value)
    .bind(to_millis(now))
    .bind(campaign_id)
    .bind(character_id)
    .execute(executor)
    .await
    .map_err(db_error(&format!("update {column} for {key}")))?;

    match result.rows_affected() {
        0 => Err(DomainError::not_found("character state", key)),
        1 => Ok(()),
        n => Err(DomainError::InvariantViolation(format!(
            "update {column} for {key}: expected 1 row, affected {n}"
        ))),
    }
}

/// Sets a character's Hope.
///
/// # Errors
///
/// Returns `DomainError::NotFound` if the state row does not exist.
pub async fn update_character_hope<'e, E: SqliteExecutor<'e>>(
    executor: E,
    campaign_id: &str,
    character_id: &str,
    hope: i32,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    update_state_column(executor, "hope", campaign_id, character_id, hope, now).await
}

/// Sets a character's Stress.
///
/// # Errors
///
/// Returns `DomainError::NotFound` if the state row does not exist.
pub async fn update_character_stress<'e, E: SqliteExecutor<'e>>(
    executor: E,
    campaign_id: &str,
    character_id: &str,
    stress: i32,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    update_state_column(executor, "stress", campaign_id, character_id, stress, now).await
}

/// Returns the campaign's GM Fear, or `None` if no snapshot exists yet.
///
/// # Errors
///
/// Returns `DomainError` if the query fails.
pub async fn get_gm_fear<'e, E: SqliteExecutor<'e>>(
    executor: E,
    campaign_id: &str,
) -> Result<Option<i32>, DomainError> {
    sqlx::query_scalar("SELECT gm_fear FROM campaign_fear_snapshots WHERE campaign_id = ?")
        .bind(campaign_id)
        .fetch_optional(executor)
        .await
        .map_err(db_error(&format!("get gm fear for {campaign_id}")))
}

/// Inserts or replaces the campaign's GM Fear snapshot.
///
/// # Errors
///
/// Returns `DomainError` if the write fails.
pub async fn put_gm_fear<'e, E: SqliteExecutor<'e>>(
    executor: E,
    campaign_id: &str,
    gm_fear: i32,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    sqlx::query(
        "INSERT INTO campaign_fear_snapshots (campaign_id, gm_fear, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT (campaign_id) DO UPDATE SET \
             gm_fear = excluded.gm_fear, updated_at = excluded.updated_at",
    )
    .bind(campaign_id)
    .bind(gm_fear)
    .bind(to_millis(now))
    .execute(executor)
    .await
    .map_err(db_error(&format!("put gm fear for {campaign_id}")))?;
    Ok(())
}
