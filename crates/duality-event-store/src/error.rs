//! Classification of SQLite errors into domain errors.

use duality_core::error::DomainError;

/// Primary SQLite result code for `SQLITE_BUSY`.
const SQLITE_BUSY: i32 = 5;
/// Primary SQLite result code for `SQLITE_LOCKED`.
const SQLITE_LOCKED: i32 = 6;

/// Returns true when the store reported a lock-busy condition.
#[must_use]
pub fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            // Extended result codes carry the primary code in the low byte.
            let primary = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(SQLITE_BUSY | SQLITE_LOCKED))
                || db.message().contains("database is locked")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Returns true when `err` is a unique-constraint failure naming `target`
/// (for example `events.hash`).
#[must_use]
pub fn is_unique_violation_on(err: &sqlx::Error, target: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation() && db.message().contains(target),
        _ => false,
    }
}

/// Converts a SQLx error into a `DomainError`, naming the failed operation.
#[must_use]
pub fn classify(err: &sqlx::Error, operation: &str) -> DomainError {
    if is_busy(err) {
        DomainError::Contention(format!("{operation}: {err}"))
    } else {
        DomainError::Infrastructure(format!("{operation}: {err}"))
    }
}

/// Returns a `map_err` adapter that classifies SQLx errors for `operation`.
pub fn db_error(operation: &str) -> impl FnOnce(sqlx::Error) -> DomainError + '_ {
    move |err| classify(&err, operation)
}
