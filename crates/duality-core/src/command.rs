//! Command abstractions.

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Caller-supplied request identifier, used for tracing and idempotency.
    fn request_id(&self) -> &str;
}
