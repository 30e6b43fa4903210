//! Execution counters for display.

use std::path::{Path, PathBuf};

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::UpdateError;
use crate::atomic::write_atomic;

/// Accumulated since `window_start`, until the user resets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    #[serde(with = "ts_milliseconds")]
    pub window_start: DateTime<Utc>,
    pub run_count: u64,
    pub bytes_received: u64,
    /// Set once any recorded byte count was an estimate.
    pub estimated: bool,
}

impl ExecutionStats {
    pub fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            window_start,
            run_count: 0,
            bytes_received: 0,
            estimated: false,
        }
    }
}

/// File-backed [`ExecutionStats`].
///
/// Every update re-reads the file so a reset from another process is not
/// overwritten by stale counters.
pub struct StatisticsRecorder {
    path: PathBuf,
    stats: Mutex<ExecutionStats>,
}

impl StatisticsRecorder {
    /// Open the counters at `path`, starting a fresh window at `now` if the
    /// file is missing or unreadable.
    pub async fn open(path: impl Into<PathBuf>, now: DateTime<Utc>) -> Self {
        let path = path.into();
        let stats = match read_stats(&path).await {
            Ok(Some(stats)) => stats,
            Ok(None) => ExecutionStats::new(now),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to read statistics, starting fresh");
                ExecutionStats::new(now)
            }
        };
        Self {
            path,
            stats: Mutex::new(stats),
        }
    }

    /// Count one execution that received `bytes`.
    pub async fn record(
        &self,
        bytes: u64,
        estimated: bool,
    ) -> Result<ExecutionStats, UpdateError> {
        let mut stats = self.stats.lock().await;
        if let Ok(Some(on_disk)) = read_stats(&self.path).await {
            *stats = on_disk;
        }

        stats.run_count += 1;
        stats.bytes_received = stats.bytes_received.saturating_add(bytes);
        stats.estimated |= estimated;

        write_stats(&self.path, &stats).await?;
        debug!(
            run_count = stats.run_count,
            bytes_received = stats.bytes_received,
            "recorded execution"
        );
        Ok(stats.clone())
    }

    /// Zero the counters and start a new window at `now`.
    pub async fn reset(&self, now: DateTime<Utc>) -> Result<(), UpdateError> {
        let mut stats = self.stats.lock().await;
        let fresh = ExecutionStats::new(now);
        write_stats(&self.path, &fresh).await?;
        *stats = fresh;
        Ok(())
    }

    /// Current counters, as last read or written.
    pub async fn snapshot(&self) -> ExecutionStats {
        self.stats.lock().await.clone()
    }
}

async fn read_stats(path: &Path) -> Result<Option<ExecutionStats>, UpdateError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(None),
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_stats(path: &Path, stats: &ExecutionStats) -> Result<(), UpdateError> {
    let json = serde_json::to_vec_pretty(stats)?;
    write_atomic(path, &json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_record_accumulates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let recorder = StatisticsRecorder::open(&path, t0()).await;

        recorder.record(1_000, false).await.unwrap();
        let stats = recorder.record(500, true).await.unwrap();
        assert_eq!(
            stats,
            ExecutionStats {
                window_start: t0(),
                run_count: 2,
                bytes_received: 1_500,
                estimated: true,
            }
        );

        let reopened = StatisticsRecorder::open(&path, t0() + Duration::hours(1)).await;
        assert_eq!(reopened.snapshot().await, stats);
    }

    #[tokio::test]
    async fn test_reset_from_another_handle_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let daemon = StatisticsRecorder::open(&path, t0()).await;
        daemon.record(100, false).await.unwrap();

        let cli = StatisticsRecorder::open(&path, t0()).await;
        let later = t0() + Duration::days(1);
        cli.reset(later).await.unwrap();

        let stats = daemon.record(10, false).await.unwrap();
        assert_eq!(stats.window_start, later);
        assert_eq!(stats.run_count, 1);
        assert_eq!(stats.bytes_received, 10);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, "garbage").unwrap();

        let recorder = StatisticsRecorder::open(&path, t0()).await;
        assert_eq!(recorder.snapshot().await, ExecutionStats::new(t0()));
        let stats = recorder.record(1, false).await.unwrap();
        assert_eq!(stats.run_count, 1);
    }
}
