//! Wake orchestration for feedwake.
//!
//! This crate provides:
//! - `UpdateScheduler`, which runs one tick per platform wake
//! - Feed downloading and candidate selection against the ledger
//! - Notification rendering with best-effort thumbnails
//! - Preferences, network gating and execution statistics

mod atomic;
pub mod config;
mod error;
mod filter;
mod network;
pub mod prefs;
mod render;
mod source;
mod state;
mod stats;
mod thumbnail;
mod updater;

pub use config::{UpdateConfig, is_schedule_key, validate_preference};
pub use error::{FetchError, UpdateError};
pub use filter::{CandidateFilter, claim_first};
pub use network::{ConnectionClass, GateReason, NetworkMonitor, StaticNetwork, check_gate};
pub use prefs::{FilePreferences, PreferenceStore};
pub use render::{DesktopRenderer, LogRenderer, Notification, NotificationRenderer};
pub use source::{
    Candidate, Downloader, FeedSource, FetchResponse, HttpDownloader, parse_channel,
    sanitize_item_id,
};
pub use state::{DataDir, SchedulerState};
pub use stats::{ExecutionStats, StatisticsRecorder};
pub use thumbnail::{
    DEFAULT_MAX_THUMBNAIL_BYTES, HttpThumbnailLoader, NoThumbnails, Thumbnail, ThumbnailLoader,
    load_with_timeout,
};
pub use updater::{
    DEFAULT_THUMBNAIL_TIMEOUT, SurfacedItem, UpdateScheduler, WakeContext, WakeOutcome,
    wake_handler,
};
