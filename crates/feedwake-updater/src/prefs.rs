//! Flat key/value preference storage.
//!
//! Values are strings; typed interpretation happens in
//! [`UpdateConfig`](crate::UpdateConfig). The file store re-reads on every
//! access so the daemon picks up `feedwake config set` without a restart.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::UpdateError;
use crate::atomic::write_atomic;

/// Read/write access to user preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// The raw value for `key`, if set.
    async fn get(&self, key: &str) -> Option<String>;

    /// Set `key` to `value`.
    async fn set(&self, key: &str, value: &str) -> Result<(), UpdateError>;

    /// Remove `key`. Returns whether it was set.
    async fn remove(&self, key: &str) -> Result<bool, UpdateError>;

    /// Every key and value, sorted by key.
    async fn all(&self) -> BTreeMap<String, String>;
}

/// Read a timestamp preference stored as epoch milliseconds.
pub async fn get_timestamp(store: &dyn PreferenceStore, key: &str) -> Option<DateTime<Utc>> {
    let raw = store.get(key).await?;
    match raw.trim().parse::<i64>() {
        Ok(millis) => DateTime::from_timestamp_millis(millis),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable timestamp preference");
            None
        }
    }
}

/// Store a timestamp preference as epoch milliseconds.
pub async fn set_timestamp(
    store: &dyn PreferenceStore,
    key: &str,
    at: DateTime<Utc>,
) -> Result<(), UpdateError> {
    store.set(key, &at.timestamp_millis().to_string()).await
}

/// Preferences persisted as a single JSON object of strings.
pub struct FilePreferences {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<BTreeMap<String, String>, UpdateError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_or_empty(&self) -> BTreeMap<String, String> {
        match self.read().await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "failed to read preferences, using defaults");
                BTreeMap::new()
            }
        }
    }

    async fn write(&self, values: &BTreeMap<String, String>) -> Result<(), UpdateError> {
        let json = serde_json::to_vec_pretty(values)?;
        write_atomic(&self.path, &json).await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FilePreferences {
    async fn get(&self, key: &str) -> Option<String> {
        self.read_or_empty().await.remove(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), UpdateError> {
        let _guard = self.write_lock.lock().await;
        let mut values = self.read().await?;
        values.insert(key.to_string(), value.to_string());
        self.write(&values).await?;
        debug!(key, value, "preference set");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, UpdateError> {
        let _guard = self.write_lock.lock().await;
        let mut values = self.read().await?;
        if values.remove(key).is_none() {
            return Ok(false);
        }
        self.write(&values).await?;
        debug!(key, "preference removed");
        Ok(true)
    }

    async fn all(&self) -> BTreeMap<String, String> {
        self.read_or_empty().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = FilePreferences::new(dir.path().join("preferences.json"));
        assert_eq!(prefs.get("enabled").await, None);
        assert!(prefs.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.json");
        let prefs = FilePreferences::new(&path);

        prefs.set("interval.day_minutes", "30").await.unwrap();
        assert_eq!(prefs.get("interval.day_minutes").await.as_deref(), Some("30"));

        // A second handle on the same file sees the write
        let other = FilePreferences::new(&path);
        assert_eq!(other.get("interval.day_minutes").await.as_deref(), Some("30"));

        assert!(prefs.remove("interval.day_minutes").await.unwrap());
        assert!(!prefs.remove("interval.day_minutes").await.unwrap());
        assert_eq!(other.get("interval.day_minutes").await, None);
    }

    #[tokio::test]
    async fn test_timestamp_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = FilePreferences::new(dir.path().join("preferences.json"));
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 0).unwrap();

        set_timestamp(&prefs, "poll_failed_at", at).await.unwrap();
        assert_eq!(get_timestamp(&prefs, "poll_failed_at").await, Some(at));

        prefs.set("poll_failed_at", "yesterday").await.unwrap();
        assert_eq!(get_timestamp(&prefs, "poll_failed_at").await, None);
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty_but_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "{not json").unwrap();
        let prefs = FilePreferences::new(&path);

        assert_eq!(prefs.get("enabled").await, None);
        assert!(prefs.set("enabled", "true").await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
    }
}
