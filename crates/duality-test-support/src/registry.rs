//! Test event registry.

use std::collections::HashSet;

use duality_core::registry::EventRegistry;

/// A registry that marks a fixed set of event types as audit-only.
#[derive(Debug, Default)]
pub struct StaticEventRegistry {
    audit_only: HashSet<String>,
}

impl StaticEventRegistry {
    /// Creates a registry treating `audit_only` types as having no
    /// projection effect.
    #[must_use]
    pub fn new(audit_only: &[&str]) -> Self {
        Self {
            audit_only: audit_only.iter().map(|t| (*t).to_owned()).collect(),
        }
    }
}

impl EventRegistry for StaticEventRegistry {
    fn is_audit_only(&self, event_type: &str) -> bool {
        self.audit_only.contains(event_type)
    }
}
