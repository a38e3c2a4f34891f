//! Connection setup for the embedded store.

use std::str::FromStr;
use std::time::Duration;

use duality_core::error::DomainError;
use sqlx::{Sqlite, SqlitePool, Transaction};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

use crate::error::db_error;
use crate::schema;

/// Default number of pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default time a connection waits on the write lock before reporting busy.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for opening the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// SQLite URL, e.g. `sqlite://duality.db` or `sqlite::memory:`.
    pub database_url: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// How long a writer waits for the lock before the store reports busy.
    pub busy_timeout: Duration,
}

impl StoreConfig {
    /// Creates a config for `database_url` with default pool settings.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Builds the connection options: write-ahead logging, a bounded busy
/// timeout and foreign-key enforcement.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the URL cannot be parsed.
pub fn connect_options(config: &StoreConfig) -> Result<SqliteConnectOptions, DomainError> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(db_error("parse database url"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(config.busy_timeout)
        .foreign_keys(true);
    Ok(options)
}

/// Opens a write transaction that takes the database write lock at `BEGIN`.
///
/// Transactions that read before they write must start this way: a deferred
/// transaction that later upgrades to a writer fails with `SQLITE_BUSY`
/// immediately instead of waiting out the busy timeout.
///
/// # Errors
///
/// Returns `DomainError::Contention` if the lock is still held when the busy
/// timeout expires, or `DomainError::Infrastructure` for other failures.
pub async fn begin_write(
    pool: &SqlitePool,
    operation: &str,
) -> Result<Transaction<'static, Sqlite>, DomainError> {
    pool.begin_with("BEGIN IMMEDIATE")
        .await
        .map_err(db_error(operation))
}

/// Opens the pool and brings the schema up to date.
///
/// # Errors
///
/// Returns `DomainError` if connecting or migrating fails.
pub async fn connect(config: &StoreConfig) -> Result<SqlitePool, DomainError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(connect_options(config)?)
        .await
        .map_err(db_error("open store"))?;

    schema::migrate(&pool).await?;

    info!(
        max_connections = config.max_connections,
        busy_timeout_ms = u64::try_from(config.busy_timeout.as_millis()).unwrap_or(u64::MAX),
        "store opened"
    );

    Ok(pool)
}
