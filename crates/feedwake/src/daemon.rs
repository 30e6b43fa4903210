//! Daemon command: arms the update job and drives wakes until interrupted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use miette::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use feedwake_scheduler::{FilePlatform, UPDATE_JOB_ID};
use feedwake_updater::{
    ConnectionClass, DataDir, DesktopRenderer, FeedSource, HttpDownloader, HttpThumbnailLoader,
    LogRenderer, NotificationRenderer, SchedulerState, StaticNetwork, UpdateConfig,
    UpdateScheduler, wake_handler,
};

/// Configuration for the daemon.
pub struct DaemonConfig {
    pub data_dir: DataDir,
    pub feeds: String,
    pub connection: ConnectionClass,
    pub desktop: bool,
    pub thumbnail_timeout: Duration,
    pub max_parallel: Option<usize>,
}

pub async fn run(config: DaemonConfig) -> Result<()> {
    let sources = FeedSource::parse_list(&config.feeds).map_err(|e| miette::miette!("{}", e))?;
    if sources.is_empty() {
        return Err(miette::miette!("no feeds configured, pass --feeds ID=URL"));
    }

    let now = Utc::now();
    let data_dir = &config.data_dir;
    data_dir.ensure().await.map_err(|e| miette::miette!("{}", e))?;

    let platform = Arc::new(
        FilePlatform::open(data_dir.jobs())
            .await
            .map_err(|e| miette::miette!("failed to open job store: {}", e))?,
    );

    let state = Arc::new(
        SchedulerState::open(data_dir, platform.clone(), now)
            .await
            .map_err(|e| miette::miette!("failed to open state: {}", e))?,
    );

    let update_config = UpdateConfig::from_store(state.preferences.as_ref()).await;
    match state
        .ensure_armed(&update_config.schedule, UPDATE_JOB_ID, now)
        .await
    {
        Ok(job) => info!(
            window = %job.window,
            interval_minutes = job.interval_minutes,
            "update job armed"
        ),
        // Recorded as poll_failed_at; the loop still serves whatever is stored.
        Err(e) => warn!(error = %e, "failed to arm update job"),
    }

    let renderer: Arc<dyn NotificationRenderer> = if config.desktop {
        Arc::new(DesktopRenderer::new(data_dir.icons()))
    } else {
        Arc::new(LogRenderer)
    };

    let mut scheduler = UpdateScheduler::new(
        Arc::clone(&state),
        sources,
        Arc::new(HttpDownloader::new()),
        renderer,
    )
    .with_thumbnails(Arc::new(HttpThumbnailLoader::new()), config.thumbnail_timeout)
    .with_network(Arc::new(StaticNetwork(config.connection)));
    if let Some(max_parallel) = config.max_parallel {
        scheduler = scheduler.with_max_parallel(max_parallel);
    }

    info!(
        sources = scheduler.sources().len(),
        connection = %config.connection,
        data_dir = %data_dir.root().display(),
        "starting feedwake daemon"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    platform.run(shutdown_rx, wake_handler(Arc::new(scheduler))).await;

    state.flush_ledger().await;
    info!("daemon stopped");
    Ok(())
}
