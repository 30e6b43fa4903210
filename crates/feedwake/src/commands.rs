//! One-shot commands that inspect or adjust the daemon's state.
//!
//! Every store re-reads its file, so these are safe to run while the daemon
//! is up.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use miette::Result;

use feedwake_ledger::NotificationLedger;
use feedwake_scheduler::{FilePlatform, JobPlatform, JobTrigger, UPDATE_JOB_ID};
use feedwake_updater::config::keys;
use feedwake_updater::prefs::get_timestamp;
use feedwake_updater::{
    DataDir, FilePreferences, PreferenceStore, SchedulerState, StatisticsRecorder, UpdateConfig,
    is_schedule_key, validate_preference,
};

async fn open_platform(data_dir: &DataDir) -> Result<Arc<FilePlatform>> {
    let platform = FilePlatform::open(data_dir.jobs())
        .await
        .map_err(|e| miette::miette!("failed to open job store: {}", e))?;
    Ok(Arc::new(platform))
}

/// State for commands that only touch the schedule. The ledger is never
/// loaded or flushed, so the daemon's copy on disk is left alone.
async fn arming_state(data_dir: &DataDir) -> Result<(Arc<FilePlatform>, SchedulerState)> {
    data_dir.ensure().await.map_err(|e| miette::miette!("{}", e))?;
    let platform = open_platform(data_dir).await?;
    let state = SchedulerState::new(
        NotificationLedger::new(data_dir.ledger()),
        Arc::new(FilePreferences::new(data_dir.preferences())),
        StatisticsRecorder::open(data_dir.stats(), Utc::now()).await,
        platform.clone(),
    );
    Ok((platform, state))
}

fn fmt_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Arm the update job, replacing an existing one only with `force`.
pub async fn arm(data_dir: &DataDir, force: bool) -> Result<()> {
    let (_, state) = arming_state(data_dir).await?;
    let config = UpdateConfig::from_store(state.preferences.as_ref()).await;
    let now = Utc::now();

    let job = if force {
        state.rearm(&config.schedule, UPDATE_JOB_ID, now).await
    } else {
        state.ensure_armed(&config.schedule, UPDATE_JOB_ID, now).await
    }
    .map_err(|e| miette::miette!("{}", e))?;

    println!(
        "{} armed for {} window, every {} min",
        job.job_id, job.window, job.interval_minutes
    );
    Ok(())
}

/// Read-only: nothing under the data directory is written.
pub async fn status(data_dir: &DataDir) -> Result<()> {
    let now = Utc::now();
    let platform = open_platform(data_dir).await?;
    let preferences = FilePreferences::new(data_dir.preferences());
    let config = UpdateConfig::from_store(&preferences).await;

    match platform.outstanding(UPDATE_JOB_ID).await {
        Some(job) => {
            let every = match &job.trigger {
                JobTrigger::Periodic { interval_minutes } => {
                    format!("every {interval_minutes} min")
                }
                JobTrigger::OneOff { deadline } => format!("once at {}", fmt_time(*deadline)),
            };
            println!("job:        {} ({})", job.job_id, every);
            println!(
                "armed for:  {} window at {}",
                job.extras.scheduled_window,
                fmt_time(job.scheduled_at)
            );
            if let Some(last_run) = job.last_run {
                println!("last run:   {}", fmt_time(last_run));
            }
            println!("next run:   {}", fmt_time(job.next_run()));
        }
        None => println!("job:        not armed (run `feedwake arm`)"),
    }

    let window = config.schedule.current_window(now);
    let to_boundary = config.schedule.time.minutes_until_opposite(now, window);
    println!(
        "window now: {} ({:.0} min until {})",
        window,
        to_boundary,
        window.opposite()
    );
    println!("enabled:    {}", config.enabled);

    if let Some(failed_at) =
        get_timestamp(&preferences, keys::POLL_FAILED_AT).await
    {
        println!("WARNING:    arming failed at {}", fmt_time(failed_at));
    }

    match NotificationLedger::peek(data_dir.ledger(), now).await {
        Ok(ledger) => println!("ledger:     {} items", ledger.len().await),
        Err(e) => println!("ledger:     unreadable ({e})"),
    }

    let stats = StatisticsRecorder::open(data_dir.stats(), now)
        .await
        .snapshot()
        .await;
    println!(
        "stats:      {} runs, {} bytes{} since {}",
        stats.run_count,
        stats.bytes_received,
        if stats.estimated { " (estimated)" } else { "" },
        fmt_time(stats.window_start)
    );
    Ok(())
}

pub async fn config_get(data_dir: &DataDir, key: &str) -> Result<()> {
    let prefs = FilePreferences::new(data_dir.preferences());
    match prefs.get(key).await {
        Some(value) => println!("{value}"),
        None => println!("{key} is not set"),
    }
    Ok(())
}

/// Store a preference. Schedule keys re-arm an armed job so the change takes
/// effect now rather than after the current interval.
pub async fn config_set(data_dir: &DataDir, key: &str, value: &str) -> Result<()> {
    validate_preference(key, value).map_err(|e| miette::miette!("{}", e))?;

    let prefs = FilePreferences::new(data_dir.preferences());
    prefs
        .set(key, value.trim())
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!("{key} = {}", value.trim());

    if !is_schedule_key(key) {
        return Ok(());
    }

    let (platform, state) = arming_state(data_dir).await?;
    if platform.outstanding(UPDATE_JOB_ID).await.is_none() {
        println!("job not armed, run `feedwake arm` to start polling");
        return Ok(());
    }

    let config = UpdateConfig::from_store(state.preferences.as_ref()).await;
    let job = state
        .rearm(&config.schedule, UPDATE_JOB_ID, Utc::now())
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!(
        "re-armed for {} window, every {} min",
        job.window, job.interval_minutes
    );
    Ok(())
}

pub async fn config_list(data_dir: &DataDir) -> Result<()> {
    let prefs = FilePreferences::new(data_dir.preferences());
    for (key, value) in prefs.all().await {
        println!("{key} = {value}");
    }
    Ok(())
}

pub async fn ledger_list(data_dir: &DataDir) -> Result<()> {
    let ledger = NotificationLedger::peek(data_dir.ledger(), Utc::now())
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    for entry in ledger.entries().await {
        println!("{}\t{}", fmt_time(entry.first_shown_at), entry.item_id);
    }
    Ok(())
}

pub async fn ledger_prune(data_dir: &DataDir) -> Result<()> {
    let ledger = NotificationLedger::new(data_dir.ledger());
    let report = ledger
        .load(Utc::now())
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    ledger
        .flush_if_dirty()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!(
        "removed {} expired entries, {} remain",
        report.expired, report.retained
    );
    Ok(())
}

pub async fn stats_show(data_dir: &DataDir) -> Result<()> {
    let stats = StatisticsRecorder::open(data_dir.stats(), Utc::now())
        .await
        .snapshot()
        .await;
    println!("since:    {}", fmt_time(stats.window_start));
    println!("runs:     {}", stats.run_count);
    println!(
        "received: {} bytes{}",
        stats.bytes_received,
        if stats.estimated { " (estimated)" } else { "" }
    );
    Ok(())
}

pub async fn stats_reset(data_dir: &DataDir) -> Result<()> {
    let now = Utc::now();
    StatisticsRecorder::open(data_dir.stats(), now)
        .await
        .reset(now)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!("statistics reset");
    Ok(())
}

/// Record a manual refresh of `source`, hiding everything published up to
/// now from future notifications.
pub async fn refreshed(data_dir: &DataDir, source: &str) -> Result<()> {
    let key = keys::last_manual_refresh(source);
    let now = Utc::now();
    validate_preference(&key, &now.timestamp_millis().to_string())
        .map_err(|e| miette::miette!("{}", e))?;

    let prefs = FilePreferences::new(data_dir.preferences());
    feedwake_updater::prefs::set_timestamp(&prefs, &key, now)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!("{source} refreshed at {}", fmt_time(now));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_config_set_rejects_unknown_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());

        assert!(config_set(&data_dir, "colour", "blue").await.is_err());
        assert!(config_set(&data_dir, keys::NIGHT_START_HOUR, "31").await.is_err());
        assert!(!data_dir.preferences().exists());
    }

    #[tokio::test]
    async fn test_config_set_schedule_key_rearms() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());

        arm(&data_dir, false).await.unwrap();
        config_set(&data_dir, keys::DAY_MINUTES, "45").await.unwrap();
        config_set(&data_dir, keys::NIGHT_MINUTES, "45").await.unwrap();

        let platform = FilePlatform::open(data_dir.jobs()).await.unwrap();
        let job = platform.outstanding(UPDATE_JOB_ID).await.unwrap();
        let JobTrigger::Periodic { interval_minutes } = job.trigger else {
            panic!("expected periodic job");
        };
        // Capped near a boundary, otherwise the configured 45
        assert!(interval_minutes <= 45);
        assert_eq!(platform.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_config_set_without_job_does_not_arm() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());

        config_set(&data_dir, keys::DAY_MINUTES, "30").await.unwrap();
        let platform = FilePlatform::open(data_dir.jobs()).await.unwrap();
        assert!(platform.outstanding(UPDATE_JOB_ID).await.is_none());
    }

    #[tokio::test]
    async fn test_refreshed_records_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());

        refreshed(&data_dir, "bbc").await.unwrap();
        let prefs = FilePreferences::new(data_dir.preferences());
        assert!(
            get_timestamp(&prefs, &keys::last_manual_refresh("bbc"))
                .await
                .is_some()
        );
        assert!(refreshed(&data_dir, "").await.is_err());
    }

    #[tokio::test]
    async fn test_arm_is_idempotent_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());

        arm(&data_dir, false).await.unwrap();
        let platform = FilePlatform::open(data_dir.jobs()).await.unwrap();
        let first = platform.outstanding(UPDATE_JOB_ID).await.unwrap();

        arm(&data_dir, false).await.unwrap();
        assert_eq!(platform.outstanding(UPDATE_JOB_ID).await.unwrap(), first);

        arm(&data_dir, true).await.unwrap();
        assert_eq!(platform.list().await.len(), 1);
    }

    /// A ledger `load` would rewrite: one expired entry and one bad line.
    fn write_stale_ledger(data_dir: &DataDir) -> Vec<u8> {
        std::fs::create_dir_all(data_dir.root()).unwrap();
        let old = (Utc::now() - chrono::Duration::days(5)).timestamp_millis();
        let fresh = Utc::now().timestamp_millis();
        let mut contents = format!("old\t{old}\nfresh\t{fresh}\n").into_bytes();
        contents.extend_from_slice(b"bad\xff\n");
        std::fs::write(data_dir.ledger(), &contents).unwrap();
        contents
    }

    #[tokio::test]
    async fn test_status_and_ledger_list_leave_ledger_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());
        let contents = write_stale_ledger(&data_dir);

        status(&data_dir).await.unwrap();
        ledger_list(&data_dir).await.unwrap();

        assert_eq!(std::fs::read(data_dir.ledger()).unwrap(), contents);
        assert!(!data_dir.jobs().exists());
    }

    #[tokio::test]
    async fn test_arm_leaves_ledger_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());
        let contents = write_stale_ledger(&data_dir);

        arm(&data_dir, false).await.unwrap();
        arm(&data_dir, false).await.unwrap();
        config_set(&data_dir, keys::DAY_MINUTES, "30").await.unwrap();

        assert_eq!(std::fs::read(data_dir.ledger()).unwrap(), contents);
    }

    #[tokio::test]
    async fn test_ledger_prune_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());
        write_stale_ledger(&data_dir);

        ledger_prune(&data_dir).await.unwrap();

        let rewritten = std::fs::read_to_string(data_dir.ledger()).unwrap();
        assert!(rewritten.starts_with("fresh\t"));
        assert_eq!(rewritten.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_stats_reset_then_show() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());
        stats_reset(&data_dir).await.unwrap();
        stats_show(&data_dir).await.unwrap();
        assert!(data_dir.stats().exists());
    }
}
