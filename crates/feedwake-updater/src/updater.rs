//! Wake orchestration.
//!
//! One call to [`UpdateScheduler::on_wake`] is one tick:
//! - Re-arm first if the window has moved under the job
//! - Gate on the enabled flag and the connection
//! - Expire old ledger entries
//! - Fetch every source concurrently, on a bounded pool
//! - Claim at most one unseen item per source and render it
//! - Record statistics and flush the ledger
//!
//! Reporting completion to the platform is left to the caller, so it still
//! happens when a wake panics.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use feedwake_scheduler::{JobDescriptor, ScheduledJob, WakeHandler, needs_reschedule};

use crate::config::{UpdateConfig, keys, last_fetch, last_manual_refresh};
use crate::filter::{CandidateFilter, claim_first};
use crate::network::{ConnectionClass, GateReason, NetworkMonitor, StaticNetwork, check_gate};
use crate::prefs::set_timestamp;
use crate::render::{Notification, NotificationRenderer};
use crate::source::{Candidate, Downloader, FeedSource, FetchResponse};
use crate::state::SchedulerState;
use crate::thumbnail::{NoThumbnails, ThumbnailLoader, load_with_timeout};
use crate::FetchError;

/// How long a thumbnail may hold up its notification.
pub const DEFAULT_THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(5);

/// Fallback pool size when the host parallelism is unknown.
const DEFAULT_MAX_PARALLEL: usize = 4;

/// What a wake is handed.
#[derive(Debug, Clone)]
pub struct WakeContext {
    pub job: JobDescriptor,
    pub now: DateTime<Utc>,
    /// Flips to `true` when the wake should stop.
    pub cancel: watch::Receiver<bool>,
}

impl WakeContext {
    pub fn new(job: JobDescriptor, now: DateTime<Utc>, cancel: watch::Receiver<bool>) -> Self {
        Self { job, now, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// An item surfaced by a wake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfacedItem {
    pub source_id: String,
    pub item_id: String,
}

/// Summary of one wake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WakeOutcome {
    /// The replacement job, if the wake re-armed.
    pub rearmed: Option<ScheduledJob>,
    /// Set when the wake did not fetch.
    pub gated: Option<GateReason>,
    pub sources_fetched: usize,
    pub sources_failed: usize,
    pub surfaced: Vec<SurfacedItem>,
    pub bytes_received: u64,
    /// The wake stopped early on request.
    pub cancelled: bool,
}

/// Runs wakes against a fixed set of sources and collaborators.
pub struct UpdateScheduler {
    state: Arc<SchedulerState>,
    sources: Vec<FeedSource>,
    downloader: Arc<dyn Downloader>,
    renderer: Arc<dyn NotificationRenderer>,
    thumbnails: Arc<dyn ThumbnailLoader>,
    network: Arc<dyn NetworkMonitor>,
    thumbnail_timeout: Duration,
    max_parallel: usize,
}

impl UpdateScheduler {
    pub fn new(
        state: Arc<SchedulerState>,
        sources: Vec<FeedSource>,
        downloader: Arc<dyn Downloader>,
        renderer: Arc<dyn NotificationRenderer>,
    ) -> Self {
        let max_parallel = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(DEFAULT_MAX_PARALLEL);

        Self {
            state,
            sources,
            downloader,
            renderer,
            thumbnails: Arc::new(NoThumbnails),
            network: Arc::new(StaticNetwork(ConnectionClass::Unmetered)),
            thumbnail_timeout: DEFAULT_THUMBNAIL_TIMEOUT,
            max_parallel,
        }
    }

    pub fn with_thumbnails(mut self, loader: Arc<dyn ThumbnailLoader>, timeout: Duration) -> Self {
        self.thumbnails = loader;
        self.thumbnail_timeout = timeout;
        self
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = network;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    /// Run one tick.
    #[tracing::instrument(skip(self, ctx), fields(job_id = %ctx.job.job_id))]
    pub async fn on_wake(&self, ctx: &WakeContext) -> WakeOutcome {
        let mut outcome = WakeOutcome::default();
        let config = UpdateConfig::from_store(self.state.preferences.as_ref()).await;

        outcome.rearmed = self.rearm_if_needed(ctx, &config).await;

        let connection = self.network.connection().await;
        if let Some(reason) = check_gate(config.enabled, config.allow_metered, connection) {
            info!(reason = %reason, "skipping fetch");
            outcome.gated = Some(reason);
            return outcome;
        }

        if ctx.is_cancelled() {
            self.on_stop(ctx).await;
            outcome.cancelled = true;
            return outcome;
        }

        // A long-lived process never reloads, so expire entries here.
        self.state.ledger.prune(ctx.now).await;

        let mut cancel = ctx.cancel.clone();
        let results = tokio::select! {
            results = self.fetch_all() => results,
            _ = wait_for_stop(&mut cancel) => {
                info!("stop requested while fetching");
                self.on_stop(ctx).await;
                outcome.cancelled = true;
                return outcome;
            }
        };

        let mut estimated = false;
        let mut picks: Vec<(FeedSource, Candidate)> = Vec::new();

        for (source, result) in results {
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    outcome.sources_failed += 1;
                    log_fetch_failure(&source, &e);
                    continue;
                }
            };

            outcome.sources_fetched += 1;
            outcome.bytes_received += response.bytes_received;
            estimated |= response.bytes_estimated;
            self.note_fetched(&source, ctx.now).await;

            if let Some(pick) = self.pick(&source, &response, &config, ctx.now).await {
                picks.push((source, pick));
            }
        }

        for (source, pick) in picks {
            if let Some(item) = self.surface(&source, pick, ctx).await {
                outcome.surfaced.push(item);
            }
        }

        if let Err(e) = self.state.stats.record(outcome.bytes_received, estimated).await {
            warn!(error = %e, "failed to record statistics");
        }

        self.state.flush_ledger().await;

        info!(
            fetched = outcome.sources_fetched,
            failed = outcome.sources_failed,
            surfaced = outcome.surfaced.len(),
            bytes = outcome.bytes_received,
            "wake complete"
        );
        outcome
    }

    /// Stop request: flush what we have and return.
    pub async fn on_stop(&self, ctx: &WakeContext) {
        debug!(job_id = %ctx.job.job_id, "wake stopping");
        self.state.flush_ledger().await;
    }

    async fn rearm_if_needed(
        &self,
        ctx: &WakeContext,
        config: &UpdateConfig,
    ) -> Option<ScheduledJob> {
        let job = ctx.job.scheduled_job();
        if !needs_reschedule(&job, ctx.now, &config.schedule) {
            return None;
        }

        info!(window = %job.window, interval_minutes = job.interval_minutes, "job needs re-arming");
        // Failure is already logged and recorded; the wake carries on.
        self.state
            .rearm(&config.schedule, &job.job_id, ctx.now)
            .await
            .ok()
    }

    async fn fetch_all(&self) -> Vec<(FeedSource, Result<FetchResponse, FetchError>)> {
        let prefs = self.state.preferences.as_ref();

        let mut results: Vec<(usize, FeedSource, Result<FetchResponse, FetchError>)> =
            stream::iter(self.sources.iter().cloned().enumerate())
                .map(|(index, source)| async move {
                    let since = last_fetch(prefs, &source.id).await;
                    let result = self.downloader.fetch(&source.url, since).await;
                    (index, source, result)
                })
                .buffer_unordered(self.max_parallel)
                .collect()
                .await;

        // Keep configuration order so rendering is deterministic.
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, source, result)| (source, result))
            .collect()
    }

    async fn note_fetched(&self, source: &FeedSource, now: DateTime<Utc>) {
        let key = keys::last_fetch(&source.id);
        if let Err(e) = set_timestamp(self.state.preferences.as_ref(), &key, now).await {
            warn!(source = %source.id, error = %e, "failed to record fetch time");
        }
    }

    async fn pick(
        &self,
        source: &FeedSource,
        response: &FetchResponse,
        config: &UpdateConfig,
        now: DateTime<Utc>,
    ) -> Option<Candidate> {
        if response.candidates.is_empty() {
            return None;
        }

        let filter = CandidateFilter {
            last_manual_refresh: last_manual_refresh(self.state.preferences.as_ref(), &source.id)
                .await,
            breaking_only: config.breaking_only,
            blocked_words: config.blocked_words.clone(),
        };

        let pick = claim_first(&response.candidates, &filter, &self.state.ledger, now).await;
        if pick.is_none() {
            debug!(source = %source.id, candidates = response.candidates.len(), "nothing new");
        }
        pick
    }

    async fn surface(
        &self,
        source: &FeedSource,
        candidate: Candidate,
        ctx: &WakeContext,
    ) -> Option<SurfacedItem> {
        let item_id = candidate.item_id?;

        // No thumbnail downloads once a stop has been requested.
        let thumbnail = match candidate.thumbnail_url.as_deref() {
            Some(url) if !ctx.is_cancelled() => {
                load_with_timeout(self.thumbnails.as_ref(), url, self.thumbnail_timeout).await
            }
            _ => None,
        };

        let notification = Notification {
            source_id: source.id.clone(),
            item_id: item_id.clone(),
            title: candidate.title,
            body: candidate.summary,
            link: candidate.link,
            breaking: candidate.breaking,
            thumbnail,
        };
        self.renderer.render(&notification).await;

        info!(source = %source.id, item_id = %item_id, "surfaced item");
        Some(SurfacedItem {
            source_id: source.id.clone(),
            item_id,
        })
    }
}

/// Adapt a scheduler into the platform's wake handler.
pub fn wake_handler(scheduler: Arc<UpdateScheduler>) -> WakeHandler {
    Box::new(move |job, cancel| {
        let scheduler = Arc::clone(&scheduler);
        Box::pin(async move {
            let ctx = WakeContext::new(job, Utc::now(), cancel);
            let outcome = scheduler.on_wake(&ctx).await;
            if let Some(job) = &outcome.rearmed {
                debug!(window = %job.window, interval_minutes = job.interval_minutes, "wake re-armed job");
            }
        })
    })
}

fn log_fetch_failure(source: &FeedSource, error: &FetchError) {
    match error {
        FetchError::Parse(_) => debug!(source = %source.id, error = %error, "feed did not parse"),
        _ => warn!(source = %source.id, error = %error, "fetch failed"),
    }
}

/// Resolves once `cancel` reads `true`. Never resolves if the sender is gone.
async fn wait_for_stop(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
