//! SQLite implementation of the campaign event journal.
//!
//! Events are appended inside a single transaction that reserves the next
//! per-campaign sequence number, fingerprints the content and, when outbox
//! delivery is enabled, enqueues the event for projection.

use std::sync::Arc;

use duality_core::clock::Clock;
use duality_core::error::DomainError;
use duality_core::event::{NewEvent, StoredEvent, fingerprint, present};
use sqlx::{SqliteConnection, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::convert::{from_nanos, seq_from_sql, seq_to_sql, to_nanos};
use crate::error::{db_error, is_unique_violation_on};
use crate::outbox;
use crate::retry::{RetryPolicy, retry_on_contention};
use crate::store::begin_write;

/// Column list shared by every event query.
pub(crate) const EVENT_COLUMNS: &str = "campaign_id, seq, hash, timestamp, event_type, \
     session_id, request_id, invocation_id, actor_type, actor_id, entity_type, entity_id, payload";

/// Raw `events` row.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    campaign_id: String,
    seq: i64,
    hash: String,
    timestamp: i64,
    event_type: String,
    session_id: Option<String>,
    request_id: Option<String>,
    invocation_id: Option<String>,
    actor_type: String,
    actor_id: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    payload: String,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let payload = serde_json::from_str(&row.payload).map_err(|e| {
            DomainError::Infrastructure(format!(
                "event {}/{} payload is not valid JSON: {e}",
                row.campaign_id, row.seq
            ))
        })?;
        Ok(Self {
            seq: seq_from_sql(row.seq)?,
            timestamp: from_nanos(row.timestamp),
            campaign_id: row.campaign_id,
            hash: row.hash,
            event_type: row.event_type,
            session_id: row.session_id,
            request_id: row.request_id,
            invocation_id: row.invocation_id,
            actor_type: row.actor_type,
            actor_id: row.actor_id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            payload,
        })
    }
}

/// Converts fetched rows into stored events.
pub(crate) fn rows_to_events(rows: Vec<EventRow>) -> Result<Vec<StoredEvent>, DomainError> {
    rows.into_iter().map(StoredEvent::try_from).collect()
}

/// Result of appending inside a caller-owned transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Appended {
    /// The event as stored.
    pub event: StoredEvent,
    /// False when an event with the same fingerprint already existed and was
    /// returned instead of writing a new row.
    pub created: bool,
}

/// SQLite-backed campaign event journal.
#[derive(Clone)]
pub struct Journal {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    outbox_enabled: bool,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("outbox_enabled", &self.outbox_enabled)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Journal {
    /// Creates a journal over `pool`. Outbox delivery starts disabled.
    #[must_use]
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            outbox_enabled: false,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the contention retry policy used by [`Journal::append`].
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables enqueueing an outbox row for every new event.
    #[must_use]
    pub fn with_outbox(mut self, enabled: bool) -> Self {
        self.outbox_enabled = enabled;
        self
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the journal clock.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Returns whether new events are enqueued for outbox delivery.
    #[must_use]
    pub fn outbox_enabled(&self) -> bool {
        self.outbox_enabled
    }

    /// Appends an event in its own transaction.
    ///
    /// Appending content whose fingerprint is already stored returns the
    /// stored event instead of failing. Lock contention restarts the
    /// transaction with linear backoff.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for missing required fields,
    /// `DomainError::Contention` once the retry budget is spent,
    /// `DomainError::Cancelled`, or `DomainError::Infrastructure` for other
    /// store failures. The transaction is rolled back on any error.
    #[instrument(skip(self, cancel, event), fields(campaign_id = %event.campaign_id, event_type = %event.event_type))]
    pub async fn append(
        &self,
        cancel: &CancellationToken,
        event: NewEvent,
    ) -> Result<StoredEvent, DomainError> {
        validate_new_event(&event)?;

        let operation = format!("append to {}", event.campaign_id);
        let appended = retry_on_contention(cancel, &self.retry, &operation, || {
            self.try_append(event.clone())
        })
        .await?;

        if appended.created {
            info!(seq = appended.event.seq, "event appended");
        } else {
            info!(
                seq = appended.event.seq,
                hash = %appended.event.hash,
                "duplicate append returned stored event"
            );
        }
        Ok(appended.event)
    }

    async fn try_append(&self, event: NewEvent) -> Result<Appended, DomainError> {
        let mut tx = begin_write(&self.pool, "begin append").await?;
        let appended = self.append_in_tx(&mut tx, event).await?;
        tx.commit().await.map_err(db_error("commit append"))?;
        Ok(appended)
    }

    /// Appends an event using a transaction owned by the caller.
    ///
    /// The counter row is written first so the transaction holds the write
    /// lock before the fingerprint lookup; a duplicate therefore never
    /// consumes a sequence number.
    ///
    /// # Errors
    ///
    /// See [`Journal::append`]. The caller decides whether to roll back.
    pub async fn append_in_tx(
        &self,
        conn: &mut SqliteConnection,
        event: NewEvent,
    ) -> Result<Appended, DomainError> {
        validate_new_event(&event)?;

        let campaign_id = event.campaign_id.clone();
        let timestamp = event.timestamp.unwrap_or_else(|| self.clock.now());
        let timestamp_nanos = to_nanos(timestamp)?;
        let hash = fingerprint(&event, timestamp);

        sqlx::query(
            "INSERT INTO event_seq (campaign_id, next_seq) VALUES (?, 1) \
             ON CONFLICT (campaign_id) DO NOTHING",
        )
        .bind(&campaign_id)
        .execute(&mut *conn)
        .await
        .map_err(db_error(&format!("init sequence for {campaign_id}")))?;

        if let Some(existing) = fetch_by_hash(&mut *conn, &hash).await? {
            debug!(seq = existing.seq, "fingerprint already stored");
            return Ok(Appended {
                event: existing,
                created: false,
            });
        }

        let next_seq: i64 = sqlx::query_scalar("SELECT next_seq FROM event_seq WHERE campaign_id = ?")
            .bind(&campaign_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_error(&format!("read sequence for {campaign_id}")))?;

        let bumped = sqlx::query("UPDATE event_seq SET next_seq = next_seq + 1 WHERE campaign_id = ?")
            .bind(&campaign_id)
            .execute(&mut *conn)
            .await
            .map_err(db_error(&format!("advance sequence for {campaign_id}")))?;
        if bumped.rows_affected() != 1 {
            return Err(DomainError::InvariantViolation(format!(
                "advance sequence for {campaign_id}: expected 1 row, affected {}",
                bumped.rows_affected()
            )));
        }

        let payload = serde_json::to_string(&event.payload).map_err(|e| {
            DomainError::Validation(format!("event payload is not serializable: {e}"))
        })?;

        let inserted = sqlx::query(
            "INSERT INTO events (campaign_id, seq, hash, timestamp, event_type, session_id, \
             request_id, invocation_id, actor_type, actor_id, entity_type, entity_id, payload) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&campaign_id)
        .bind(next_seq)
        .bind(&hash)
        .bind(timestamp_nanos)
        .bind(&event.event_type)
        .bind(present(event.session_id.as_ref()))
        .bind(present(event.request_id.as_ref()))
        .bind(present(event.invocation_id.as_ref()))
        .bind(&event.actor_type)
        .bind(present(event.actor_id.as_ref()))
        .bind(present(event.entity_type.as_ref()))
        .bind(present(event.entity_id.as_ref()))
        .bind(&payload)
        .execute(&mut *conn)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation_on(&err, "events.hash") {
                warn!(%hash, "fingerprint collision on insert, returning stored event");
                let existing = fetch_by_hash(&mut *conn, &hash)
                    .await?
                    .ok_or_else(|| DomainError::not_found("event", format!("hash {hash}")))?;
                return Ok(Appended {
                    event: existing,
                    created: false,
                });
            }
            return Err(db_error(&format!("insert event {campaign_id}/{next_seq}"))(err));
        }

        let seq = seq_from_sql(next_seq)?;
        if self.outbox_enabled {
            outbox::enqueue(&mut *conn, &campaign_id, seq, &event.event_type, self.clock.now())
                .await?;
        }

        let stored = StoredEvent {
            campaign_id,
            seq,
            hash,
            timestamp,
            event_type: event.event_type,
            session_id: present(event.session_id.as_ref()).map(str::to_owned),
            request_id: present(event.request_id.as_ref()).map(str::to_owned),
            invocation_id: present(event.invocation_id.as_ref()).map(str::to_owned),
            actor_type: event.actor_type,
            actor_id: present(event.actor_id.as_ref()).map(str::to_owned),
            entity_type: present(event.entity_type.as_ref()).map(str::to_owned),
            entity_id: present(event.entity_id.as_ref()).map(str::to_owned),
            payload: event.payload,
        };
        Ok(Appended {
            event: stored,
            created: true,
        })
    }

    /// Loads one event by campaign and sequence number.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if no such event exists.
    pub async fn get_event(&self, campaign_id: &str, seq: u64) -> Result<StoredEvent, DomainError> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE campaign_id = ? AND seq = ?"
        ))
        .bind(campaign_id)
        .bind(seq_to_sql(seq)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error(&format!("get event {campaign_id}/{seq}")))?;

        row.ok_or_else(|| DomainError::not_found("event", format!("{campaign_id}/{seq}")))?
            .try_into()
    }

    /// Loads one event by its content fingerprint.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if no event has this fingerprint.
    pub async fn get_event_by_hash(&self, hash: &str) -> Result<StoredEvent, DomainError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(db_error("acquire connection"))?;
        fetch_by_hash(&mut conn, hash)
            .await?
            .ok_or_else(|| DomainError::not_found("event", format!("hash {hash}")))
    }

    /// Lists a campaign's events with `seq > after_seq`, ascending.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an empty campaign id or a zero
    /// limit.
    pub async fn list_events(
        &self,
        campaign_id: &str,
        after_seq: u64,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        require_non_empty(campaign_id, "campaign id")?;
        require_positive_limit(limit)?;

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE campaign_id = ? AND seq > ? \
             ORDER BY seq ASC LIMIT ?"
        ))
        .bind(campaign_id)
        .bind(seq_to_sql(after_seq)?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error(&format!("list events for {campaign_id}")))?;

        rows_to_events(rows)
    }

    /// Lists a session's events with `seq > after_seq`, ascending.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for empty identifiers or a zero
    /// limit.
    pub async fn list_session_events(
        &self,
        campaign_id: &str,
        session_id: &str,
        after_seq: u64,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        require_non_empty(campaign_id, "campaign id")?;
        require_non_empty(session_id, "session id")?;
        require_positive_limit(limit)?;

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE campaign_id = ? AND session_id = ? AND seq > ? \
             ORDER BY seq ASC LIMIT ?"
        ))
        .bind(campaign_id)
        .bind(session_id)
        .bind(seq_to_sql(after_seq)?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error(&format!(
            "list session events for {campaign_id}/{session_id}"
        )))?;

        rows_to_events(rows)
    }

    /// Returns the highest sequence number stored for a campaign, or 0.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the query fails.
    pub async fn latest_seq(&self, campaign_id: &str) -> Result<u64, DomainError> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(seq) FROM events WHERE campaign_id = ?")
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error(&format!("latest seq for {campaign_id}")))?;
        latest.map_or(Ok(0), seq_from_sql)
    }
}

async fn fetch_by_hash(
    conn: &mut SqliteConnection,
    hash: &str,
) -> Result<Option<StoredEvent>, DomainError> {
    let row: Option<EventRow> =
        sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE hash = ?"))
            .bind(hash)
            .fetch_optional(conn)
            .await
            .map_err(db_error(&format!("get event by hash {hash}")))?;
    row.map(StoredEvent::try_from).transpose()
}

fn validate_new_event(event: &NewEvent) -> Result<(), DomainError> {
    require_non_empty(&event.campaign_id, "campaign id")?;
    require_non_empty(&event.event_type, "event type")?;
    require_non_empty(&event.actor_type, "actor type")
}

pub(crate) fn require_non_empty(value: &str, what: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::Validation(format!("{what} is required")));
    }
    Ok(())
}

pub(crate) fn require_positive_limit(limit: u32) -> Result<(), DomainError> {
    if limit == 0 {
        return Err(DomainError::Validation(
            "page size must be greater than zero".into(),
        ));
    }
    Ok(())
}
