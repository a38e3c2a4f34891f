//! Domain error types.

use thiserror::Error;

/// Top-level domain error type.
///
/// Callers distinguish conditions by matching on the variant, never by
/// inspecting the message.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A keyed lookup matched no row.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// The kind of record that was looked up.
        entity: &'static str,
        /// The key that matched nothing.
        key: String,
    },

    /// A validation error, raised before any transaction is opened.
    #[error("validation error: {0}")]
    Validation(String),

    /// A roll outcome with the same request identity already committed.
    #[error(
        "outcome already applied: campaign {campaign_id}, session {session_id}, request {request_id}"
    )]
    AlreadyApplied {
        /// The campaign the outcome belongs to.
        campaign_id: String,
        /// The session the roll happened in.
        session_id: String,
        /// The request that produced the outcome.
        request_id: String,
    },

    /// Something already happened that makes the operation inapplicable.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store reported a lock-busy condition.
    #[error("store contention: {0}")]
    Contention(String),

    /// An expected single-row mutation affected zero or several rows.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The caller cancelled the operation while it was waiting.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Builds a `NotFound` error for the given entity kind and key.
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Returns true when the error is a store lock-contention condition.
    #[must_use]
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention(_))
    }

    /// Prefixes the error message with the operation that failed, keeping
    /// the variant intact.
    #[must_use]
    pub fn context(self, operation: &str) -> Self {
        match self {
            Self::NotFound { entity, key } => Self::NotFound {
                entity,
                key: format!("{key} ({operation})"),
            },
            Self::Validation(msg) => Self::Validation(format!("{operation}: {msg}")),
            Self::Conflict(msg) => Self::Conflict(format!("{operation}: {msg}")),
            Self::Contention(msg) => Self::Contention(format!("{operation}: {msg}")),
            Self::InvariantViolation(msg) => {
                Self::InvariantViolation(format!("{operation}: {msg}"))
            }
            Self::Cancelled(msg) => Self::Cancelled(format!("{operation}: {msg}")),
            Self::Infrastructure(msg) => Self::Infrastructure(format!("{operation}: {msg}")),
            already @ Self::AlreadyApplied { .. } => already,
        }
    }
}
