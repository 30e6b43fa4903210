//! Process-wide state, built once at startup and shared by reference.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use feedwake_ledger::NotificationLedger;
use feedwake_scheduler::{
    JobPlatform, ScheduleConfig, ScheduledJob, SchedulerError, ensure_armed, rearm,
};

use crate::UpdateError;
use crate::config::keys;
use crate::prefs::{FilePreferences, PreferenceStore, set_timestamp};
use crate::stats::StatisticsRecorder;

/// Layout of the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger(&self) -> PathBuf {
        self.root.join("ledger.tsv")
    }

    pub fn preferences(&self) -> PathBuf {
        self.root.join("preferences.json")
    }

    pub fn stats(&self) -> PathBuf {
        self.root.join("stats.json")
    }

    pub fn jobs(&self) -> PathBuf {
        self.root.join("jobs.json")
    }

    pub fn icons(&self) -> PathBuf {
        self.root.join("icons")
    }

    /// Create the directory if missing.
    pub async fn ensure(&self) -> Result<(), UpdateError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

/// Everything a wake reads and writes besides the network.
pub struct SchedulerState {
    pub ledger: NotificationLedger,
    pub preferences: Arc<dyn PreferenceStore>,
    pub stats: StatisticsRecorder,
    pub platform: Arc<dyn JobPlatform>,
}

impl SchedulerState {
    pub fn new(
        ledger: NotificationLedger,
        preferences: Arc<dyn PreferenceStore>,
        stats: StatisticsRecorder,
        platform: Arc<dyn JobPlatform>,
    ) -> Self {
        Self {
            ledger,
            preferences,
            stats,
            platform,
        }
    }

    /// Build the state from the files under `data_dir`, loading the ledger.
    ///
    /// A ledger that cannot be read starts empty and dirty, so the next
    /// flush replaces the file instead of the process refusing to start.
    pub async fn open(
        data_dir: &DataDir,
        platform: Arc<dyn JobPlatform>,
        now: DateTime<Utc>,
    ) -> Result<Self, UpdateError> {
        data_dir.ensure().await?;
        let ledger = match NotificationLedger::open(data_dir.ledger(), now).await {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!(
                    error = %e,
                    path = %data_dir.ledger().display(),
                    "failed to load notification ledger, starting empty"
                );
                let ledger = NotificationLedger::new(data_dir.ledger());
                ledger.mark_dirty().await;
                ledger
            }
        };
        let preferences = Arc::new(FilePreferences::new(data_dir.preferences()));
        let stats = StatisticsRecorder::open(data_dir.stats(), now).await;
        Ok(Self::new(ledger, preferences, stats, platform))
    }

    /// Replace the job with one computed for `now`.
    ///
    /// A failure is recorded under `poll_failed_at`; a success clears it.
    pub async fn rearm(
        &self,
        config: &ScheduleConfig,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob, UpdateError> {
        let result = rearm(self.platform.as_ref(), config, job_id, now).await;
        self.note_arm_result(result.as_ref().err(), now).await;
        Ok(result?)
    }

    /// Arm the job unless it is already outstanding.
    pub async fn ensure_armed(
        &self,
        config: &ScheduleConfig,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob, UpdateError> {
        let result = ensure_armed(self.platform.as_ref(), config, job_id, now).await;
        self.note_arm_result(result.as_ref().err(), now).await;
        Ok(result?)
    }

    /// Best-effort ledger flush.
    pub async fn flush_ledger(&self) {
        if let Err(e) = self.ledger.flush_if_dirty().await {
            warn!(error = %e, "failed to flush notification ledger, will retry next tick");
        }
    }

    async fn note_arm_result(&self, failure: Option<&SchedulerError>, now: DateTime<Utc>) {
        let prefs = self.preferences.as_ref();
        let Some(failure) = failure else {
            if let Err(e) = prefs.remove(keys::POLL_FAILED_AT).await {
                warn!(error = %e, "failed to clear poll failure marker");
            }
            return;
        };

        error!(error = %failure, "failed to arm update job");
        if let Err(e) = set_timestamp(prefs, keys::POLL_FAILED_AT, now).await {
            warn!(error = %e, "failed to record poll failure");
        }
    }
}
