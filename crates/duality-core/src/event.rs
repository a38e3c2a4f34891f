//! Journal event envelopes and content fingerprinting.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// An event submitted for appending. The journal assigns `seq` and `hash`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Campaign this event belongs to (the partition key).
    pub campaign_id: String,
    /// Type tag identifying the event's meaning and payload shape.
    pub event_type: String,
    /// When the event happened. Defaults to the journal clock when absent.
    pub timestamp: Option<DateTime<Utc>>,
    /// Session the event happened in, if any.
    pub session_id: Option<String>,
    /// Request that produced the event, if any.
    pub request_id: Option<String>,
    /// Tool or service invocation that produced the event, if any.
    pub invocation_id: Option<String>,
    /// Kind of actor responsible (`system`, `participant`, `gm`, ...).
    pub actor_type: String,
    /// Identifier of the actor, if any.
    pub actor_id: Option<String>,
    /// Kind of entity the event is about, if any.
    pub entity_type: Option<String>,
    /// Identifier of the entity the event is about, if any.
    pub entity_id: Option<String>,
    /// Serialized event payload.
    pub payload: serde_json::Value,
}

impl NewEvent {
    /// Creates an event with the required fields; correlation fields start empty.
    pub fn new(
        campaign_id: impl Into<String>,
        event_type: impl Into<String>,
        actor_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            event_type: event_type.into(),
            timestamp: None,
            session_id: None,
            request_id: None,
            invocation_id: None,
            actor_type: actor_type.into(),
            actor_id: None,
            entity_type: None,
            entity_id: None,
            payload,
        }
    }

    /// Sets the event timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the session identifier.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the request identifier.
    #[must_use]
    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Sets the invocation identifier.
    #[must_use]
    pub fn with_invocation(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = Some(invocation_id.into());
        self
    }

    /// Sets the actor identifier.
    #[must_use]
    pub fn with_actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Sets the entity the event is about.
    #[must_use]
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }
}

/// Stored representation of a journal event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Campaign this event belongs to.
    pub campaign_id: String,
    /// Position within the campaign stream, starting at 1.
    pub seq: u64,
    /// Content fingerprint (hex SHA-256), unique across the journal.
    pub hash: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Event type name.
    pub event_type: String,
    /// Session correlation identifier.
    pub session_id: Option<String>,
    /// Request correlation identifier.
    pub request_id: Option<String>,
    /// Invocation correlation identifier.
    pub invocation_id: Option<String>,
    /// Kind of actor responsible.
    pub actor_type: String,
    /// Identifier of the actor.
    pub actor_id: Option<String>,
    /// Kind of entity the event is about.
    pub entity_type: Option<String>,
    /// Identifier of the entity the event is about.
    pub entity_id: Option<String>,
    /// Serialized event payload.
    pub payload: serde_json::Value,
}

/// Canonical envelope hashed into the fingerprint. Field order is fixed by
/// the struct declaration.
#[derive(Serialize)]
struct FingerprintEnvelope<'a> {
    campaign_id: &'a str,
    event_type: &'a str,
    timestamp: String,
    actor_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actor_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_id: Option<&'a str>,
    payload: &'a serde_json::Value,
}

/// Returns the value when it is present and non-empty.
#[must_use]
pub fn present(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

/// Formats a timestamp the way the fingerprint expects it.
#[must_use]
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Computes the content fingerprint of an event at the given timestamp.
///
/// Every field except the sequence number takes part; optional fields are
/// included only when non-empty, so `None` and `Some("")` hash the same.
#[must_use]
pub fn fingerprint(event: &NewEvent, timestamp: DateTime<Utc>) -> String {
    let envelope = FingerprintEnvelope {
        campaign_id: &event.campaign_id,
        event_type: &event.event_type,
        timestamp: format_timestamp(timestamp),
        actor_type: &event.actor_type,
        session_id: present(event.session_id.as_ref()),
        request_id: present(event.request_id.as_ref()),
        invocation_id: present(event.invocation_id.as_ref()),
        actor_id: present(event.actor_id.as_ref()),
        entity_type: present(event.entity_type.as_ref()),
        entity_id: present(event.entity_id.as_ref()),
        payload: &event.payload,
    };
    // Serializing borrowed strings and a JSON value is infallible.
    let bytes = serde_json::to_vec(&envelope).expect("fingerprint envelope serialization");
    format!("{:x}", Sha256::digest(&bytes))
}
