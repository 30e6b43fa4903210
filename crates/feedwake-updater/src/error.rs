//! Error types for wake orchestration and its collaborators.

use thiserror::Error;

use feedwake_ledger::LedgerError;
use feedwake_scheduler::SchedulerError;

/// Errors that can occur while running or configuring the updater.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Scheduling primitive error.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Ledger persistence error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A feed source definition could not be parsed.
    #[error("invalid feed source {0:?}: expected ID=URL")]
    InvalidSource(String),

    /// The preference key is not one feedwake reads.
    #[error("unknown preference key {0:?}")]
    UnknownPreference(String),

    /// A preference value could not be interpreted.
    #[error("invalid value {value:?} for preference {key}")]
    InvalidPreference { key: String, value: String },
}

/// Errors from a single feed fetch. All are transient from the wake's point
/// of view: the source is skipped until the next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an error status.
    #[error("server returned status {0}")]
    Status(u16),

    /// Body was not a feed we understand.
    #[error("feed parse error: {0}")]
    Parse(String),
}
