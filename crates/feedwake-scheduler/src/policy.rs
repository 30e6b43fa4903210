//! Recurrence interval selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::window::{ScheduleWindow, TimeWindow};

/// No schedule is ever shorter than this, whatever the platform reports.
pub const ABSOLUTE_MIN_INTERVAL_MINUTES: u32 = 5;

/// User-configured interval per window, in minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalPrefs {
    pub day_minutes: Option<u32>,
    pub night_minutes: Option<u32>,
}

impl IntervalPrefs {
    pub fn minutes_for(&self, window: ScheduleWindow) -> Option<u32> {
        match window {
            ScheduleWindow::Day => self.day_minutes,
            ScheduleWindow::Night => self.night_minutes,
        }
    }
}

/// Everything the scheduling decisions read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleConfig {
    pub time: TimeWindow,
    pub intervals: IntervalPrefs,
    /// Shortest period the platform accepts for a recurring job.
    pub platform_min_minutes: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time: TimeWindow::default(),
            intervals: IntervalPrefs::default(),
            platform_min_minutes: 15,
        }
    }
}

impl ScheduleConfig {
    /// Effective minimum period: the platform minimum, never below the
    /// absolute floor.
    pub fn min_period_minutes(&self) -> u32 {
        self.platform_min_minutes.max(ABSOLUTE_MIN_INTERVAL_MINUTES)
    }

    /// The user's interval for `window` clamped to the minimum period,
    /// before any boundary cap.
    pub fn configured_minutes(&self, window: ScheduleWindow) -> u32 {
        let min = self.min_period_minutes();
        self.intervals.minutes_for(window).unwrap_or(min).max(min)
    }

    pub fn current_window(&self, now: DateTime<Utc>) -> ScheduleWindow {
        self.time.current_window(now)
    }
}

/// Interval in minutes for a job armed at `now` under `window`.
///
/// A run that would land at or after the opposite window's start is pulled
/// in to `floor(minutes_to_boundary) + 1` so it lands just inside the new
/// window. That cap may go below the platform minimum but never below
/// [`ABSOLUTE_MIN_INTERVAL_MINUTES`].
pub fn compute_interval_minutes(
    config: &ScheduleConfig,
    window: ScheduleWindow,
    now: DateTime<Utc>,
) -> u32 {
    let configured = config.configured_minutes(window);
    let to_boundary = config.time.minutes_until_opposite(now, window);

    if (configured as f64) < to_boundary {
        return configured;
    }

    let capped = to_boundary.floor() as u32 + 1;
    capped.max(ABSOLUTE_MIN_INTERVAL_MINUTES)
}
