//! Event builders for tests.

use chrono::{DateTime, TimeZone, Utc};
use duality_core::event::NewEvent;

/// The reference instant used across tests: 2026-01-15T10:00:00Z.
#[must_use]
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

/// Builds a system-authored event whose payload carries `marker`, so
/// different markers always fingerprint differently.
#[must_use]
pub fn sample_event(campaign_id: &str, event_type: &str, marker: u32) -> NewEvent {
    NewEvent::new(
        campaign_id,
        event_type,
        "system",
        serde_json::json!({ "marker": marker }),
    )
    .at(fixed_time())
}
