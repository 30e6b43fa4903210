//! Notification deduplication ledger for feedwake.
//!
//! Tracks which feed items have already been surfaced so the same item is
//! never notified twice within the retention horizon, across process
//! restarts.

mod error;
mod ledger;

pub use error::LedgerError;
pub use ledger::{FIELD_SEPARATOR, LedgerEntry, LoadReport, NotificationLedger, RETENTION_HOURS};
