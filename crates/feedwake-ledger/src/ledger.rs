//! The notification ledger.
//!
//! Records which items have already been surfaced, keyed by item id, with the
//! time each was first shown. The in-memory mirror is authoritative for the
//! life of the process; a dirty flag tracks whether a flush is owed.
//!
//! ## File format
//!
//! One entry per line, `item_id<TAB>first_shown_at_ms`. Updates are written
//! to a sibling temp file and renamed over the original, so a reader never
//! sees a half-written ledger.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::LedgerError;

/// Entries older than this are pruned and may be surfaced again.
pub const RETENTION_HOURS: i64 = 48;

/// Separates the item id from the timestamp on each line.
pub const FIELD_SEPARATOR: char = '\t';

/// One surfaced item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub item_id: String,
    pub first_shown_at: DateTime<Utc>,
}

/// What a [`NotificationLedger::load`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Entries in the mirror after loading.
    pub retained: usize,
    /// Entries dropped for being past the retention horizon.
    pub expired: usize,
    /// Lines that could not be parsed.
    pub malformed: usize,
}

#[derive(Debug, Default)]
struct Persisted {
    entries: HashMap<String, DateTime<Utc>>,
    expired: usize,
    malformed: usize,
    rewrite: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: HashMap<String, DateTime<Utc>>,
    dirty: bool,
}

/// Durable item id -> first-shown-time store with a retention horizon.
///
/// All operations take the same mutex, including the file write in
/// [`flush`](Self::flush), so a prune or flush never interleaves with a
/// concurrent [`mark_shown`](Self::mark_shown).
pub struct NotificationLedger {
    path: PathBuf,
    retention: Duration,
    state: Mutex<LedgerState>,
}

impl NotificationLedger {
    /// Create an empty ledger backed by `path`. Call [`load`](Self::load)
    /// to reconcile with what is on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retention: Duration::hours(RETENTION_HOURS),
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Override the retention horizon.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Create a ledger and load it from disk.
    pub async fn open(path: impl Into<PathBuf>, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        let ledger = Self::new(path);
        ledger.load(now).await?;
        Ok(ledger)
    }

    /// Create a ledger holding the unexpired entries on disk, without
    /// writing anything back.
    pub async fn peek(path: impl Into<PathBuf>, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        let ledger = Self::new(path);
        let persisted = ledger.read_persisted(now).await?;
        ledger.state.lock().await.entries = persisted.entries;
        Ok(ledger)
    }

    /// Reconcile the mirror with the file on disk.
    ///
    /// Persisted entries are merged with anything already in the mirror
    /// (keeping the earliest timestamp per id), expired entries are dropped,
    /// and the file is rewritten if that changed anything. Lines that are not
    /// valid UTF-8 or do not parse count as malformed and are dropped by the
    /// rewrite. A failed rewrite leaves the ledger dirty rather than failing
    /// the load.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self, now: DateTime<Utc>) -> Result<LoadReport, LedgerError> {
        let mut state = self.state.lock().await;

        // Expire persisted entries first so a stale line never shadows a
        // fresher in-memory mark for the same id.
        let Persisted {
            entries: mut merged,
            expired,
            malformed,
            mut rewrite,
        } = self.read_persisted(now).await?;
        let mut report = LoadReport {
            retained: 0,
            expired,
            malformed,
        };

        for (item_id, first_shown_at) in state.entries.drain() {
            match merged.get_mut(&item_id) {
                Some(existing) if *existing <= first_shown_at => {}
                Some(existing) => {
                    *existing = first_shown_at;
                    rewrite = true;
                }
                None => {
                    merged.insert(item_id, first_shown_at);
                    rewrite = true;
                }
            }
        }

        let before = merged.len();
        merged.retain(|_, first_shown_at| !self.is_expired(*first_shown_at, now));
        report.expired += before - merged.len();
        report.retained = merged.len();

        state.entries = merged;
        state.dirty = false;

        if report.expired > 0 || report.malformed > 0 || rewrite {
            if let Err(e) = self.write_entries(&state.entries).await {
                warn!(error = %e, "failed to write back pruned ledger, will retry on next flush");
                state.dirty = true;
            }
        }

        if report.malformed > 0 {
            warn!(malformed = report.malformed, "skipped malformed ledger lines");
        }
        info!(
            retained = report.retained,
            expired = report.expired,
            "loaded notification ledger"
        );
        Ok(report)
    }

    /// Force the next [`flush_if_dirty`](Self::flush_if_dirty) to rewrite
    /// the file from the mirror.
    pub async fn mark_dirty(&self) {
        self.state.lock().await.dirty = true;
    }

    /// Whether `item_id` has already been surfaced.
    pub async fn has_been_shown(&self, item_id: &str) -> bool {
        self.state.lock().await.entries.contains_key(item_id)
    }

    /// Record `item_id` as shown at `now`. Already-shown items keep their
    /// original timestamp.
    pub async fn mark_shown(&self, item_id: &str, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.try_mark_shown(item_id, now).await.map(|_| ())
    }

    /// Claim `item_id` for surfacing.
    ///
    /// Returns `true` only for the caller that moved the item from unseen to
    /// shown; racing callers for the same id see `false`.
    pub async fn try_mark_shown(
        &self,
        item_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        validate_item_id(item_id)?;

        let mut state = self.state.lock().await;
        if state.entries.contains_key(item_id) {
            return Ok(false);
        }
        state.entries.insert(item_id.to_string(), now);
        state.dirty = true;
        debug!(item_id, "marked item shown");
        Ok(true)
    }

    /// Drop entries past the retention horizon from the mirror. Returns the
    /// number removed.
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|_, first_shown_at| !self.is_expired(*first_shown_at, now));
        let removed = before - state.entries.len();
        if removed > 0 {
            state.dirty = true;
            debug!(removed, "pruned expired ledger entries");
        }
        removed
    }

    /// Write the whole mirror to disk.
    ///
    /// Idempotent. The dirty flag is cleared only once the rename succeeds;
    /// on failure the original file is untouched and the next flush starts
    /// over.
    pub async fn flush(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        self.write_entries(&state.entries).await?;
        state.dirty = false;
        debug!(entries = state.entries.len(), "flushed notification ledger");
        Ok(())
    }

    /// Flush only if something changed since the last successful write.
    /// Returns whether a write happened.
    pub async fn flush_if_dirty(&self) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(false);
        }
        self.write_entries(&state.entries).await?;
        state.dirty = false;
        debug!(entries = state.entries.len(), "flushed notification ledger");
        Ok(true)
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    /// All entries, oldest first.
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        let state = self.state.lock().await;
        sorted_entries(&state.entries)
    }

    /// Unexpired entries on disk, earliest timestamp per id.
    async fn read_persisted(&self, now: DateTime<Utc>) -> Result<Persisted, LedgerError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut persisted = Persisted::default();
        for raw in bytes.split(|b| *b == b'\n') {
            let Ok(line) = std::str::from_utf8(raw) else {
                persisted.malformed += 1;
                continue;
            };
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() {
                continue;
            }
            let Some((item_id, first_shown_at)) = parse_line(line) else {
                persisted.malformed += 1;
                continue;
            };
            if let Some(existing) = persisted.entries.get_mut(item_id) {
                // Duplicate line; the rewrite drops it.
                persisted.rewrite = true;
                if first_shown_at < *existing {
                    *existing = first_shown_at;
                }
            } else {
                persisted.entries.insert(item_id.to_string(), first_shown_at);
            }
        }

        let before = persisted.entries.len();
        persisted
            .entries
            .retain(|_, first_shown_at| !self.is_expired(*first_shown_at, now));
        persisted.expired = before - persisted.entries.len();
        Ok(persisted)
    }

    fn is_expired(&self, first_shown_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - first_shown_at > self.retention
    }

    async fn write_entries(
        &self,
        entries: &HashMap<String, DateTime<Utc>>,
    ) -> Result<(), LedgerError> {
        let mut contents = String::new();
        for entry in sorted_entries(entries) {
            contents.push_str(&entry.item_id);
            contents.push(FIELD_SEPARATOR);
            contents.push_str(&entry.first_shown_at.timestamp_millis().to_string());
            contents.push('\n');
        }

        let tmp = temp_path(&self.path);
        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(contents.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        Ok(result?)
    }
}

fn sorted_entries(entries: &HashMap<String, DateTime<Utc>>) -> Vec<LedgerEntry> {
    let mut sorted: Vec<LedgerEntry> = entries
        .iter()
        .map(|(item_id, first_shown_at)| LedgerEntry {
            item_id: item_id.clone(),
            first_shown_at: *first_shown_at,
        })
        .collect();
    sorted.sort_by(|a, b| {
        a.first_shown_at
            .cmp(&b.first_shown_at)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    sorted
}

fn parse_line(line: &str) -> Option<(&str, DateTime<Utc>)> {
    let (item_id, millis) = line.split_once(FIELD_SEPARATOR)?;
    if item_id.is_empty() {
        return None;
    }
    let millis: i64 = millis.trim().parse().ok()?;
    Some((item_id, DateTime::from_timestamp_millis(millis)?))
}

fn validate_item_id(item_id: &str) -> Result<(), LedgerError> {
    if item_id.is_empty() || item_id.contains([FIELD_SEPARATOR, '\n', '\r']) {
        return Err(LedgerError::InvalidItemId(item_id.to_string()));
    }
    Ok(())
}

/// A sibling of `path` no other writer uses, so concurrent flushes from
/// separate processes never share a temp file.
fn temp_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}
