//! Error types for the notification ledger.

use thiserror::Error;

/// Errors that can occur in ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The item id contains a reserved character.
    #[error("invalid item id {0:?}: contains a reserved character")]
    InvalidItemId(String),
}
