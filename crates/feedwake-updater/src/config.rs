//! Typed view of the preferences read on every wake.

use chrono::{DateTime, FixedOffset, Utc};
use tracing::warn;

use feedwake_scheduler::{IntervalPrefs, NightWindow, ScheduleConfig, TimeWindow, utc_offset};

use crate::UpdateError;
use crate::prefs::{PreferenceStore, get_timestamp};

/// Preference keys.
pub mod keys {
    pub const ENABLED: &str = "enabled";
    pub const DAY_MINUTES: &str = "interval.day_minutes";
    pub const NIGHT_MINUTES: &str = "interval.night_minutes";
    pub const NIGHT_START_HOUR: &str = "night.start_hour";
    pub const NIGHT_END_HOUR: &str = "night.end_hour";
    pub const PLATFORM_MIN_MINUTES: &str = "platform.min_period_minutes";
    pub const ZONE_OFFSET_MINUTES: &str = "zone.offset_minutes";
    pub const BREAKING_ONLY: &str = "breaking_only";
    pub const ALLOW_METERED: &str = "allow_metered";
    pub const BLOCKED_WORDS: &str = "filters.blocked_words";
    pub const POLL_FAILED_AT: &str = "poll_failed_at";

    /// Keys that change when the job fires.
    pub const SCHEDULE_KEYS: &[&str] = &[
        DAY_MINUTES,
        NIGHT_MINUTES,
        NIGHT_START_HOUR,
        NIGHT_END_HOUR,
        PLATFORM_MIN_MINUTES,
        ZONE_OFFSET_MINUTES,
    ];

    pub fn last_manual_refresh(source_id: &str) -> String {
        format!("source.{source_id}.last_manual_refresh")
    }

    pub fn last_fetch(source_id: &str) -> String {
        format!("source.{source_id}.last_fetch")
    }
}

const DEFAULT_PLATFORM_MIN_MINUTES: u32 = 15;

/// Largest zone offset accepted, just under a day either way.
const MAX_ZONE_OFFSET_MINUTES: i32 = 24 * 60 - 1;

/// Everything a wake reads from preferences, parsed and clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateConfig {
    pub enabled: bool,
    pub schedule: ScheduleConfig,
    pub breaking_only: bool,
    pub allow_metered: bool,
    /// Lowercased words; an item mentioning any of them is never surfaced.
    pub blocked_words: Vec<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: ScheduleConfig::default(),
            breaking_only: false,
            allow_metered: false,
            blocked_words: Vec::new(),
        }
    }
}

impl UpdateConfig {
    /// Read the configuration from `store`. Unset or unparsable values fall
    /// back to defaults; out-of-range values are clamped.
    pub async fn from_store(store: &dyn PreferenceStore) -> Self {
        let defaults = NightWindow::default();

        let night = NightWindow {
            start_hour: read_hour(store, keys::NIGHT_START_HOUR, defaults.start_hour).await,
            end_hour: read_hour(store, keys::NIGHT_END_HOUR, defaults.end_hour).await,
        };

        let schedule = ScheduleConfig {
            time: TimeWindow::new(night, read_zone(store).await),
            intervals: IntervalPrefs {
                day_minutes: read_parsed(store, keys::DAY_MINUTES).await,
                night_minutes: read_parsed(store, keys::NIGHT_MINUTES).await,
            },
            platform_min_minutes: read_parsed(store, keys::PLATFORM_MIN_MINUTES)
                .await
                .unwrap_or(DEFAULT_PLATFORM_MIN_MINUTES),
        };

        Self {
            enabled: read_bool(store, keys::ENABLED, true).await,
            schedule,
            breaking_only: read_bool(store, keys::BREAKING_ONLY, false).await,
            allow_metered: read_bool(store, keys::ALLOW_METERED, false).await,
            blocked_words: store
                .get(keys::BLOCKED_WORDS)
                .await
                .map(|raw| parse_word_list(&raw))
                .unwrap_or_default(),
        }
    }
}

/// When the user last refreshed `source_id` by hand.
pub async fn last_manual_refresh(
    store: &dyn PreferenceStore,
    source_id: &str,
) -> Option<DateTime<Utc>> {
    get_timestamp(store, &keys::last_manual_refresh(source_id)).await
}

/// When `source_id` was last fetched successfully.
pub async fn last_fetch(store: &dyn PreferenceStore, source_id: &str) -> Option<DateTime<Utc>> {
    get_timestamp(store, &keys::last_fetch(source_id)).await
}

/// Whether `key` feeds the schedule, so changing it means re-arming.
pub fn is_schedule_key(key: &str) -> bool {
    keys::SCHEDULE_KEYS.contains(&key)
}

/// Check that `value` is acceptable for `key` before it is stored.
pub fn validate_preference(key: &str, value: &str) -> Result<(), UpdateError> {
    let invalid = || UpdateError::InvalidPreference {
        key: key.to_string(),
        value: value.to_string(),
    };

    match key {
        keys::ENABLED | keys::BREAKING_ONLY | keys::ALLOW_METERED => {
            parse_bool(value).map(|_| ()).ok_or_else(invalid)
        }
        keys::DAY_MINUTES | keys::NIGHT_MINUTES | keys::PLATFORM_MIN_MINUTES => {
            value.trim().parse::<u32>().map(|_| ()).map_err(|_| invalid())
        }
        keys::NIGHT_START_HOUR | keys::NIGHT_END_HOUR => match value.trim().parse::<f64>() {
            Ok(hour) if (0.0..24.0).contains(&hour) => Ok(()),
            _ => Err(invalid()),
        },
        keys::ZONE_OFFSET_MINUTES => match value.trim().parse::<i32>() {
            Ok(offset) if offset.abs() <= MAX_ZONE_OFFSET_MINUTES => Ok(()),
            _ => Err(invalid()),
        },
        keys::BLOCKED_WORDS => Ok(()),
        keys::POLL_FAILED_AT => value.trim().parse::<i64>().map(|_| ()).map_err(|_| invalid()),
        _ if is_source_timestamp_key(key) => {
            value.trim().parse::<i64>().map(|_| ()).map_err(|_| invalid())
        }
        _ => Err(UpdateError::UnknownPreference(key.to_string())),
    }
}

fn is_source_timestamp_key(key: &str) -> bool {
    key.strip_prefix("source.")
        .and_then(|rest| {
            rest.strip_suffix(".last_manual_refresh")
                .or_else(|| rest.strip_suffix(".last_fetch"))
        })
        .is_some_and(|id| !id.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_word_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

async fn read_bool(store: &dyn PreferenceStore, key: &str, default: bool) -> bool {
    let Some(raw) = store.get(key).await else {
        return default;
    };
    parse_bool(&raw).unwrap_or_else(|| {
        warn!(key, value = %raw, "unparsable boolean preference, using default");
        default
    })
}

async fn read_parsed<T: std::str::FromStr>(store: &dyn PreferenceStore, key: &str) -> Option<T> {
    let raw = store.get(key).await?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "unparsable preference, using default");
            None
        }
    }
}

async fn read_hour(store: &dyn PreferenceStore, key: &str, default: f64) -> f64 {
    match read_parsed::<f64>(store, key).await {
        Some(hour) if (0.0..24.0).contains(&hour) => hour,
        Some(hour) => {
            warn!(key, hour, "hour out of range, using default");
            default
        }
        None => default,
    }
}

async fn read_zone(store: &dyn PreferenceStore) -> FixedOffset {
    let Some(minutes) = read_parsed::<i32>(store, keys::ZONE_OFFSET_MINUTES).await else {
        return utc_offset();
    };
    let clamped = minutes.clamp(-MAX_ZONE_OFFSET_MINUTES, MAX_ZONE_OFFSET_MINUTES);
    FixedOffset::east_opt(clamped * 60).unwrap_or_else(utc_offset)
}
