//! Worker configuration read from the environment.

use std::time::Duration;

use duality_event_store::outbox::OutboxConfig;
use duality_event_store::retry::RetryPolicy;
use duality_event_store::store::{DEFAULT_BUSY_TIMEOUT, DEFAULT_MAX_CONNECTIONS, StoreConfig};

use crate::error::WorkerError;

/// How claimed outbox rows are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutboxMode {
    /// Deliver events to the projector.
    #[default]
    Apply,
    /// Record a retry failure for every row without delivering.
    Shadow,
}

impl std::str::FromStr for OutboxMode {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "apply" => Ok(Self::Apply),
            "shadow" => Ok(Self::Shadow),
            other => Err(WorkerError::Config(format!(
                "OUTBOX_MODE must be `apply` or `shadow`, got `{other}`"
            ))),
        }
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Store connection settings.
    pub store: StoreConfig,
    /// Apply or shadow mode.
    pub mode: OutboxMode,
    /// Rows claimed per pass.
    pub batch_size: u32,
    /// Pause between passes that found less than a full batch.
    pub poll_interval: Duration,
    /// Outbox retry and lease tuning.
    pub outbox: OutboxConfig,
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, WorkerError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| WorkerError::Config(format!("{key} is invalid: {e}"))),
        _ => Ok(default),
    }
}

fn positive(key: &str, value: u64) -> Result<u64, WorkerError> {
    if value == 0 {
        return Err(WorkerError::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

impl WorkerConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Config` if a variable is missing or invalid.
    pub fn from_env() -> Result<Self, WorkerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Config` if `DATABASE_URL` is missing or any
    /// value fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WorkerError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                WorkerError::Config("DATABASE_URL environment variable must be set".into())
            })?;

        let max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(WorkerError::Config(
                "DB_MAX_CONNECTIONS must be greater than zero".into(),
            ));
        }
        let busy_timeout_ms = parse_or(
            &lookup,
            "DB_BUSY_TIMEOUT_MS",
            u64::try_from(DEFAULT_BUSY_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        )?;

        let mode = parse_or(&lookup, "OUTBOX_MODE", OutboxMode::Apply)?;
        let batch_size = parse_or(&lookup, "OUTBOX_BATCH_SIZE", 50_u32)?;
        if batch_size == 0 {
            return Err(WorkerError::Config(
                "OUTBOX_BATCH_SIZE must be greater than zero".into(),
            ));
        }
        let poll_interval_ms =
            positive("OUTBOX_POLL_INTERVAL_MS", parse_or(&lookup, "OUTBOX_POLL_INTERVAL_MS", 1_000)?)?;
        let max_attempts = parse_or(&lookup, "OUTBOX_MAX_ATTEMPTS", 8_u32)?;
        if max_attempts == 0 {
            return Err(WorkerError::Config(
                "OUTBOX_MAX_ATTEMPTS must be greater than zero".into(),
            ));
        }
        let lease_secs = positive("OUTBOX_LEASE_SECS", parse_or(&lookup, "OUTBOX_LEASE_SECS", 120)?)?;

        Ok(Self {
            store: StoreConfig {
                database_url,
                max_connections,
                busy_timeout: Duration::from_millis(busy_timeout_ms),
            },
            mode,
            batch_size,
            poll_interval: Duration::from_millis(poll_interval_ms),
            outbox: OutboxConfig {
                max_attempts,
                lease: Duration::from_secs(lease_secs),
                retry: RetryPolicy::default(),
            },
        })
    }
}
