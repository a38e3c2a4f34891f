//! Conversions between domain values and their SQLite column encodings.
//!
//! Event timestamps are stored as Unix nanoseconds, bookkeeping timestamps
//! (outbox, checkpoints, projections) as Unix milliseconds. Sequence numbers
//! are `u64` in the domain and `INTEGER` in SQLite.

use chrono::{DateTime, TimeZone, Utc};
use duality_core::error::DomainError;

/// Encodes a bookkeeping timestamp.
#[must_use]
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Decodes a bookkeeping timestamp.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the stored value is out of range.
pub fn from_millis(millis: i64) -> Result<DateTime<Utc>, DomainError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DomainError::Infrastructure(format!("stored timestamp {millis} out of range")))
}

/// Encodes an event timestamp.
///
/// # Errors
///
/// Returns `DomainError::Validation` for timestamps outside 1677–2262.
pub fn to_nanos(at: DateTime<Utc>) -> Result<i64, DomainError> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| DomainError::Validation(format!("event timestamp {at} out of range")))
}

/// Decodes an event timestamp.
#[must_use]
pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

/// Encodes a sequence number.
///
/// # Errors
///
/// Returns `DomainError::Validation` if `seq` does not fit a SQLite integer.
pub fn seq_to_sql(seq: u64) -> Result<i64, DomainError> {
    i64::try_from(seq).map_err(|_| DomainError::Validation(format!("sequence {seq} out of range")))
}

/// Decodes a sequence number.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the stored value is negative.
pub fn seq_from_sql(seq: i64) -> Result<u64, DomainError> {
    u64::try_from(seq)
        .map_err(|_| DomainError::Infrastructure(format!("stored sequence {seq} is negative")))
}

/// Converts a `std` duration to whole milliseconds, saturating.
#[must_use]
pub fn duration_millis(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
