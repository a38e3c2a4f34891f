//! Event store database schema.
//!
//! The SQL lives in the workspace `migrations/` directory and is embedded at
//! compile time.

use duality_core::error::DomainError;
use sqlx::SqlitePool;
use sqlx::migrate::Migrator;

/// Embedded migrations for the journal, apply pipeline and projections.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies any pending migrations.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if a migration fails.
pub async fn migrate(pool: &SqlitePool) -> Result<(), DomainError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("schema migration failed: {e}")))
}
