//! The scheduling primitive jobs are armed with, and its file-backed
//! implementation.
//!
//! A [`JobPlatform`] holds at most one outstanding [`JobDescriptor`] per job
//! id. Re-arming is cancel-then-schedule: the two calls are not atomic and
//! callers accept the gap between them.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::policy::{ABSOLUTE_MIN_INTERVAL_MINUTES, ScheduleConfig};
use crate::types::{JobDescriptor, JobTrigger, ScheduledJob};
use crate::SchedulerError;

/// Minimum sleep duration between platform checks.
const MIN_SLEEP_SECS: u64 = 1;

/// Maximum sleep duration between platform checks.
const MAX_SLEEP_SECS: u64 = 60;

/// Type alias for the function invoked when a job falls due.
///
/// The receiver flips to `true` when the platform wants the job stopped.
pub type WakeHandler = Box<
    dyn Fn(JobDescriptor, watch::Receiver<bool>) -> Pin<Box<dyn Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Arms, cancels and tracks jobs.
#[async_trait]
pub trait JobPlatform: Send + Sync {
    /// Install a job. Fails if one with the same id is outstanding.
    async fn schedule(&self, job: &ScheduledJob) -> Result<(), SchedulerError>;

    /// Remove the outstanding job with this id. Returns whether one existed.
    async fn cancel(&self, job_id: &str) -> Result<bool, SchedulerError>;

    /// The outstanding descriptor for `job_id`, if any.
    async fn outstanding(&self, job_id: &str) -> Option<JobDescriptor>;

    /// Record that an execution of `job_id` finished at `at`.
    async fn finish(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), SchedulerError>;
}

/// Replace whatever is outstanding for `job_id` with a job computed for
/// `now`.
#[tracing::instrument(skip(platform, config))]
pub async fn rearm(
    platform: &dyn JobPlatform,
    config: &ScheduleConfig,
    job_id: &str,
    now: DateTime<Utc>,
) -> Result<ScheduledJob, SchedulerError> {
    let job = ScheduledJob::periodic(job_id, config, now);

    let cancelled = platform.cancel(job_id).await?;
    platform.schedule(&job).await?;

    info!(
        job_id,
        window = %job.window,
        interval_minutes = job.interval_minutes,
        replaced = cancelled,
        "armed job"
    );
    Ok(job)
}

/// Arm `job_id` unless a job with that id is already outstanding.
pub async fn ensure_armed(
    platform: &dyn JobPlatform,
    config: &ScheduleConfig,
    job_id: &str,
    now: DateTime<Utc>,
) -> Result<ScheduledJob, SchedulerError> {
    if let Some(existing) = platform.outstanding(job_id).await {
        debug!(job_id, "job already armed");
        return Ok(existing.scheduled_job());
    }
    rearm(platform, config, job_id, now).await
}

/// Job platform persisted as a JSON file.
///
/// Every mutation re-reads the file first, so several processes (the
/// daemon and one-shot CLI invocations) can share it.
pub struct FilePlatform {
    path: PathBuf,
    jobs: RwLock<Vec<JobDescriptor>>,
}

impl FilePlatform {
    /// Open the job store at `path`, creating an empty one if missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SchedulerError> {
        let path = path.into();
        let jobs = read_jobs(&path).await?;
        info!(count = jobs.len(), path = %path.display(), "loaded jobs");
        Ok(Self {
            path,
            jobs: RwLock::new(jobs),
        })
    }

    /// Re-read the job store from disk.
    pub async fn reload(&self) -> Result<(), SchedulerError> {
        let jobs = read_jobs(&self.path).await?;
        *self.jobs.write().await = jobs;
        Ok(())
    }

    /// List all outstanding jobs.
    pub async fn list(&self) -> Vec<JobDescriptor> {
        self.jobs.read().await.clone()
    }

    /// Get all jobs that are due to run.
    async fn due_jobs(&self, now: DateTime<Utc>) -> Vec<JobDescriptor> {
        self.jobs
            .read()
            .await
            .iter()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect()
    }

    /// Calculate how long to sleep until the next job is due.
    pub async fn calculate_sleep_duration(&self, now: DateTime<Utc>) -> std::time::Duration {
        let jobs = self.jobs.read().await;

        let next_due = jobs
            .iter()
            .filter(|j| j.is_periodic() || j.last_run.is_none())
            .map(|j| j.next_run())
            .min();

        let secs = match next_due {
            Some(next) => {
                let diff = (next - now).num_seconds();
                (diff.max(MIN_SLEEP_SECS as i64) as u64).min(MAX_SLEEP_SECS)
            }
            None => MAX_SLEEP_SECS,
        };

        std::time::Duration::from_secs(secs)
    }

    /// Run the wake loop until shutdown.
    ///
    /// Each due job runs in its own task so a panicking wake still gets
    /// reported as finished.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>, handler: WakeHandler) {
        info!("wake loop starting");

        loop {
            if *shutdown_rx.borrow() {
                info!("wake loop shutting down");
                break;
            }

            if let Err(e) = self.reload().await {
                warn!(error = %e, "failed to reload job store, using last known jobs");
            }

            for descriptor in self.due_jobs(Utc::now()).await {
                if *shutdown_rx.borrow() {
                    info!("shutdown requested, not starting new wakes");
                    break;
                }

                let job_id = descriptor.job_id.clone();
                debug!(job_id = %job_id, "waking job");

                let wake = tokio::spawn(handler(descriptor, shutdown_rx.clone()));
                if let Err(e) = wake.await {
                    error!(job_id = %job_id, error = %e, "wake aborted");
                }

                if let Err(e) = self.finish(&job_id, Utc::now()).await {
                    error!(job_id = %job_id, error = %e, "failed to record job completion");
                }
            }

            let sleep_duration = self.calculate_sleep_duration(Utc::now()).await;

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("wake loop received shutdown signal");
                    }
                }
                _ = sleep(sleep_duration) => {}
            }
        }

        info!("wake loop shut down gracefully");
    }

    async fn persist(&self, jobs: &[JobDescriptor]) -> Result<(), SchedulerError> {
        let json = serde_json::to_vec_pretty(jobs)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // The CLI and the daemon may persist at once; each gets its own temp file.
        let tmp = temp_path(&self.path);
        let result = async {
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        Ok(result?)
    }
}

#[async_trait]
impl JobPlatform for FilePlatform {
    async fn schedule(&self, job: &ScheduledJob) -> Result<(), SchedulerError> {
        if !job.one_off && job.interval_minutes < ABSOLUTE_MIN_INTERVAL_MINUTES {
            return Err(SchedulerError::InvalidConfig(format!(
                "interval of {} minutes is below the {} minute floor",
                job.interval_minutes, ABSOLUTE_MIN_INTERVAL_MINUTES
            )));
        }

        let mut jobs = self.jobs.write().await;
        *jobs = read_jobs(&self.path).await?;

        if jobs.iter().any(|j| j.job_id == job.job_id) {
            return Err(SchedulerError::JobExists(job.job_id.clone()));
        }

        jobs.push(job.to_descriptor());
        self.persist(&jobs).await
    }

    async fn cancel(&self, job_id: &str) -> Result<bool, SchedulerError> {
        let mut jobs = self.jobs.write().await;
        *jobs = read_jobs(&self.path).await?;

        let before = jobs.len();
        jobs.retain(|j| j.job_id != job_id);
        if jobs.len() == before {
            return Ok(false);
        }

        self.persist(&jobs).await?;
        debug!(job_id, "cancelled job");
        Ok(true)
    }

    async fn outstanding(&self, job_id: &str) -> Option<JobDescriptor> {
        if let Err(e) = self.reload().await {
            warn!(error = %e, "failed to reload job store");
        }
        self.jobs
            .read()
            .await
            .iter()
            .find(|j| j.job_id == job_id)
            .cloned()
    }

    async fn finish(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write().await;
        *jobs = read_jobs(&self.path).await?;

        let Some(index) = jobs.iter().position(|j| j.job_id == job_id) else {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        };

        if matches!(jobs[index].trigger, JobTrigger::OneOff { .. }) {
            jobs.remove(index);
            debug!(job_id, "one-off job completed");
        } else {
            jobs[index].last_run = Some(at);
            debug!(job_id, next_run = %jobs[index].next_run(), "job finished");
        }

        self.persist(&jobs).await
    }
}

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

async fn read_jobs(path: &Path) -> Result<Vec<JobDescriptor>, SchedulerError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
