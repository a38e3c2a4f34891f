//! Duality worker error types.

use duality_core::error::DomainError;
use thiserror::Error;

/// Startup and runtime errors for the outbox worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A store or projection operation failed.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Machine-readable code for a domain error, used as a structured log field.
#[must_use]
pub fn error_code(err: &DomainError) -> &'static str {
    match err {
        DomainError::NotFound { .. } => "not_found",
        DomainError::Validation(_) => "validation_error",
        DomainError::AlreadyApplied { .. } => "already_applied",
        DomainError::Conflict(_) => "conflict",
        DomainError::Contention(_) => "contention",
        DomainError::InvariantViolation(_) => "invariant_violation",
        DomainError::Cancelled(_) => "cancelled",
        DomainError::Infrastructure(_) => "infrastructure_error",
    }
}
