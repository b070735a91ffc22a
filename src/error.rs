//! Error types for the field state core.
//!
//! Aggregation and report errors are returned to the caller. Errors raised by
//! background polling are logged by the collectors and never surfaced.

use chrono::NaiveDate;

/// Result type for field state operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the field state core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Aggregation range with `start` after `end`.
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// Report period that cannot be compiled.
    #[error("Invalid report period: {0} month(s)")]
    InvalidPeriod(u32),

    /// Anomaly flag or device state with no known mapping.
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// A roster, reading, anomaly or tally source could not be reached.
    #[error("Upstream {source_name} unavailable: {reason}")]
    UpstreamUnavailable { source_name: String, reason: String },

    /// The narrative collaborator failed.
    #[error("Narrative generation failed: {0}")]
    Generation(String),

    /// Malformed caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The entity already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The reconciler task is no longer running.
    #[error("Reconciler stopped")]
    ReconcilerStopped,

    /// Database error from Postgres.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error talking to a collaborator.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Build an [`Error::UpstreamUnavailable`] from any displayable cause.
    pub fn upstream(source_name: &str, reason: impl std::fmt::Display) -> Self {
        Error::UpstreamUnavailable {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }
}
