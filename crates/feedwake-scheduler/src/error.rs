//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// IO error while reading or writing the job store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The job store could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Job already exists.
    #[error("job already exists: {0}")]
    JobExists(String),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The platform refused the requested schedule.
    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),
}
