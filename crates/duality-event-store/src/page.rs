//! Cursor pagination over a campaign's events.

use duality_core::error::DomainError;
use duality_core::event::StoredEvent;
use serde::{Deserialize, Serialize};
use sqlx::Sqlite;
use sqlx::query::{QueryAs, QueryScalar};
use sqlx::sqlite::SqliteArguments;
use tracing::debug;

use crate::convert::seq_to_sql;
use crate::error::db_error;
use crate::journal::{
    EVENT_COLUMNS, EventRow, Journal, require_non_empty, require_positive_limit, rows_to_events,
};

/// A bound parameter of a caller-supplied filter clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// A text parameter.
    Text(String),
    /// An integer parameter.
    Integer(i64),
}

/// Additional SQL condition over event columns, with positional `?`
/// placeholders matching `params` in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Condition text, for example `event_type = ?`.
    pub clause: String,
    /// Parameters bound to the clause's placeholders.
    pub params: Vec<FilterValue>,
}

impl EventFilter {
    /// Creates a filter from a clause and its parameters.
    pub fn new(clause: impl Into<String>, params: Vec<FilterValue>) -> Self {
        Self {
            clause: clause.into(),
            params,
        }
    }

    /// Filters to one event type.
    pub fn event_type(event_type: impl Into<String>) -> Self {
        Self::new("event_type = ?", vec![FilterValue::Text(event_type.into())])
    }

    /// Filters to one session.
    pub fn session(session_id: impl Into<String>) -> Self {
        Self::new("session_id = ?", vec![FilterValue::Text(session_id.into())])
    }
}

/// Sequence ordering of a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Oldest first.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

impl SortOrder {
    fn inverted(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }

    fn cursor_operator(self) -> &'static str {
        match self {
            Self::Ascending => ">",
            Self::Descending => "<",
        }
    }
}

/// Parameters of a page query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPageRequest {
    /// Campaign to page through.
    pub campaign_id: String,
    /// Maximum number of events in the page.
    pub page_size: u32,
    /// Sequence number to continue from, exclusive.
    pub cursor_seq: Option<u64>,
    /// Walk backwards from the cursor (the "previous page" direction).
    pub reverse: bool,
    /// Primary ordering of the listing.
    pub order: SortOrder,
    /// Optional extra condition.
    pub filter: Option<EventFilter>,
}

impl EventPageRequest {
    /// First ascending page of `page_size` events.
    pub fn first(campaign_id: impl Into<String>, page_size: u32) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            page_size,
            cursor_seq: None,
            reverse: false,
            order: SortOrder::Ascending,
            filter: None,
        }
    }

    /// Continues from `cursor_seq` in the request's direction.
    #[must_use]
    pub fn after(mut self, cursor_seq: u64) -> Self {
        self.cursor_seq = Some(cursor_seq);
        self
    }

    /// Sets the primary ordering.
    #[must_use]
    pub fn ordered(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Walks towards the previous page.
    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Restricts the listing with an extra condition.
    #[must_use]
    pub fn filtered(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Ordering actually used by the SQL query.
    fn effective_order(&self) -> SortOrder {
        if self.reverse {
            self.order.inverted()
        } else {
            self.order
        }
    }
}

/// One page of events, always presented in the request's primary order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    /// Events in the page.
    pub events: Vec<StoredEvent>,
    /// Number of events matching campaign and filter, ignoring the cursor.
    pub total_count: u64,
    /// More events exist after this page in primary order.
    pub has_next_page: bool,
    /// More events exist before this page in primary order.
    pub has_previous_page: bool,
}

/// Computes `(has_next_page, has_previous_page)`.
fn page_flags(reverse: bool, has_more: bool, has_cursor: bool) -> (bool, bool) {
    if reverse {
        (has_cursor, has_more)
    } else {
        (has_more, has_cursor)
    }
}

fn bind_filter<'q>(
    mut query: QueryAs<'q, Sqlite, EventRow, SqliteArguments<'q>>,
    filter: Option<&'q EventFilter>,
) -> QueryAs<'q, Sqlite, EventRow, SqliteArguments<'q>> {
    for param in filter.map(|f| f.params.as_slice()).unwrap_or_default() {
        query = match param {
            FilterValue::Text(value) => query.bind(value.as_str()),
            FilterValue::Integer(value) => query.bind(*value),
        };
    }
    query
}

fn bind_filter_scalar<'q>(
    mut query: QueryScalar<'q, Sqlite, i64, SqliteArguments<'q>>,
    filter: Option<&'q EventFilter>,
) -> QueryScalar<'q, Sqlite, i64, SqliteArguments<'q>> {
    for param in filter.map(|f| f.params.as_slice()).unwrap_or_default() {
        query = match param {
            FilterValue::Text(value) => query.bind(value.as_str()),
            FilterValue::Integer(value) => query.bind(*value),
        };
    }
    query
}

impl Journal {
    /// Returns one page of a campaign's events.
    ///
    /// The query fetches one row beyond `page_size` to detect whether
    /// another page exists. Reverse pages are read in the inverted order and
    /// flipped back before returning.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an empty campaign id, a zero
    /// page size or an empty filter clause.
    pub async fn list_events_page(
        &self,
        request: &EventPageRequest,
    ) -> Result<EventPage, DomainError> {
        require_non_empty(&request.campaign_id, "campaign id")?;
        require_positive_limit(request.page_size)?;
        if let Some(filter) = &request.filter {
            require_non_empty(&filter.clause, "filter clause")?;
        }

        let filter_sql = request
            .filter
            .as_ref()
            .map(|f| format!(" AND ({})", f.clause))
            .unwrap_or_default();
        let order = request.effective_order();
        let cursor_sql = if request.cursor_seq.is_some() {
            format!(" AND seq {} ?", order.cursor_operator())
        } else {
            String::new()
        };

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE campaign_id = ?{filter_sql}{cursor_sql} \
             ORDER BY seq {} LIMIT ?",
            order.sql()
        );
        let mut query = bind_filter(
            sqlx::query_as::<_, EventRow>(&sql).bind(request.campaign_id.as_str()),
            request.filter.as_ref(),
        );
        if let Some(cursor) = request.cursor_seq {
            query = query.bind(seq_to_sql(cursor)?);
        }
        let rows = query
            .bind(i64::from(request.page_size) + 1)
            .fetch_all(self.pool())
            .await
            .map_err(db_error(&format!("page events for {}", request.campaign_id)))?;

        let count_sql =
            format!("SELECT COUNT(*) FROM events WHERE campaign_id = ?{filter_sql}");
        let total: i64 = bind_filter_scalar(
            sqlx::query_scalar::<_, i64>(&count_sql).bind(request.campaign_id.as_str()),
            request.filter.as_ref(),
        )
        .fetch_one(self.pool())
        .await
        .map_err(db_error(&format!("count events for {}", request.campaign_id)))?;

        let page_size = usize::try_from(request.page_size).unwrap_or(usize::MAX);
        let has_more = rows.len() > page_size;
        let mut events = rows_to_events(rows.into_iter().take(page_size).collect())?;
        if request.reverse {
            events.reverse();
        }

        let (has_next_page, has_previous_page) =
            page_flags(request.reverse, has_more, request.cursor_seq.is_some());
        debug!(
            campaign_id = %request.campaign_id,
            returned = events.len(),
            total,
            has_next_page,
            has_previous_page,
            "event page loaded"
        );

        Ok(EventPage {
            events,
            total_count: u64::try_from(total).unwrap_or_default(),
            has_next_page,
            has_previous_page,
        })
    }
}
