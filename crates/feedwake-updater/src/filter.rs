//! Per-source candidate selection.

use chrono::{DateTime, Utc};
use tracing::debug;

use feedwake_ledger::NotificationLedger;

use crate::source::Candidate;

/// Rules a candidate must pass, apart from the ledger check.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    /// Items published at or before this were already seen by the user.
    pub last_manual_refresh: Option<DateTime<Utc>>,
    pub breaking_only: bool,
    /// Lowercased.
    pub blocked_words: Vec<String>,
}

impl CandidateFilter {
    /// Whether `candidate` may be surfaced, ignoring the ledger.
    ///
    /// Undated items pass the refresh check.
    pub fn accepts(&self, candidate: &Candidate) -> bool {
        if candidate.item_id.is_none() {
            return false;
        }

        if let (Some(refreshed), Some(published)) = (self.last_manual_refresh, candidate.published) {
            if published <= refreshed {
                return false;
            }
        }

        if self.breaking_only && !candidate.breaking {
            return false;
        }

        !self.is_blocked(candidate)
    }

    fn is_blocked(&self, candidate: &Candidate) -> bool {
        if self.blocked_words.is_empty() {
            return false;
        }
        let title = candidate.title.to_lowercase();
        let summary = candidate
            .summary
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();
        self.blocked_words
            .iter()
            .any(|word| title.contains(word.as_str()) || summary.contains(word.as_str()))
    }
}

/// Pick and claim the first surfaceable candidate, scanning in the given
/// (newest-first) order.
///
/// The claim is made in the ledger before returning, so a concurrent wake
/// presenting the same item cannot surface it too.
pub async fn claim_first(
    candidates: &[Candidate],
    filter: &CandidateFilter,
    ledger: &NotificationLedger,
    now: DateTime<Utc>,
) -> Option<Candidate> {
    for candidate in candidates {
        if !filter.accepts(candidate) {
            continue;
        }
        let Some(item_id) = candidate.item_id.as_deref() else {
            continue;
        };

        match ledger.try_mark_shown(item_id, now).await {
            Ok(true) => return Some(candidate.clone()),
            Ok(false) => debug!(item_id, "already shown"),
            Err(e) => debug!(item_id, error = %e, "item id rejected by ledger"),
        }
    }
    None
}
