//! Event type registry abstraction.

/// Answers questions about event types that the storage layer cannot answer
/// from the opaque payload alone.
pub trait EventRegistry: Send + Sync {
    /// Returns true when events of this type have no projection effect and
    /// only exist for audit purposes.
    fn is_audit_only(&self, event_type: &str) -> bool;
}
