//! Day/night classification of wall-clock time.
//!
//! Everything here is a pure function of an instant and the configured night
//! window. Hours are evaluated in a fixed reference offset, never the host's
//! local zone, so the same instant always classifies the same way.

use chrono::{DateTime, FixedOffset, Offset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

const SECS_PER_DAY: i64 = 86_400;

/// Which interval profile is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleWindow {
    Day,
    Night,
}

impl ScheduleWindow {
    /// The window that follows this one.
    pub fn opposite(self) -> Self {
        match self {
            ScheduleWindow::Day => ScheduleWindow::Night,
            ScheduleWindow::Night => ScheduleWindow::Day,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleWindow::Day => "day",
            ScheduleWindow::Night => "night",
        }
    }
}

impl std::fmt::Display for ScheduleWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Night window boundaries as fractional hours in `[0, 24)`.
///
/// `start_hour > end_hour` wraps across midnight (the usual case, e.g.
/// 23.0 to 6.0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NightWindow {
    pub start_hour: f64,
    pub end_hour: f64,
}

impl Default for NightWindow {
    fn default() -> Self {
        Self {
            start_hour: 23.0,
            end_hour: 6.0,
        }
    }
}

/// A night window evaluated in a fixed reference offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub night: NightWindow,
    pub zone: FixedOffset,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            night: NightWindow::default(),
            zone: utc_offset(),
        }
    }
}

impl TimeWindow {
    pub fn new(night: NightWindow, zone: FixedOffset) -> Self {
        Self { night, zone }
    }

    /// Hour of day at `now` in the reference offset.
    pub fn hour_of_day(&self, now: DateTime<Utc>) -> f64 {
        hour_of_day(now, &self.zone)
    }

    /// Classify `now` as day or night.
    pub fn current_window(&self, now: DateTime<Utc>) -> ScheduleWindow {
        let hour = self.hour_of_day(now);
        let NightWindow {
            start_hour,
            end_hour,
        } = self.night;

        let is_night = if start_hour > end_hour {
            hour >= start_hour || hour < end_hour
        } else {
            // Non-wrapping window; equal bounds means no night at all.
            hour >= start_hour && hour < end_hour
        };

        if is_night {
            ScheduleWindow::Night
        } else {
            ScheduleWindow::Day
        }
    }

    /// Hour at which the window *after* `window` begins.
    pub fn opposite_window_start(&self, window: ScheduleWindow) -> f64 {
        match window {
            ScheduleWindow::Day => self.night.start_hour,
            ScheduleWindow::Night => self.night.end_hour,
        }
    }

    /// Minutes from `now` until `target_hour` next comes around.
    pub fn minutes_until(&self, now: DateTime<Utc>, target_hour: f64) -> f64 {
        minutes_until(now, target_hour, &self.zone)
    }

    /// Minutes from `now` until the window following `window` begins.
    pub fn minutes_until_opposite(&self, now: DateTime<Utc>, window: ScheduleWindow) -> f64 {
        self.minutes_until(now, self.opposite_window_start(window))
    }
}

/// The UTC offset, used as the default reference zone.
pub fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// Fractional hour of day in `[0, 24)`, including minutes and seconds.
pub fn hour_of_day(now: DateTime<Utc>, zone: &FixedOffset) -> f64 {
    let local = now.with_timezone(zone);
    let seconds = local.second() as f64 + local.nanosecond().min(999_999_999) as f64 / 1e9;
    local.hour() as f64 + local.minute() as f64 / 60.0 + seconds / 3600.0
}

/// Non-negative minutes from `now` until the next occurrence of
/// `target_hour`, wrapping through midnight.
///
/// Whole seconds are compared as integers so that boundaries expressed in
/// whole minutes come out exact.
pub fn minutes_until(now: DateTime<Utc>, target_hour: f64, zone: &FixedOffset) -> f64 {
    let local = now.with_timezone(zone);
    let now_secs = local.num_seconds_from_midnight() as i64;
    let target_secs = ((target_hour.rem_euclid(24.0) * 3600.0).round() as i64) % SECS_PER_DAY;
    let nanos = local.nanosecond().min(999_999_999) as f64 / 1e9;

    let mut diff = (target_secs - now_secs).rem_euclid(SECS_PER_DAY);
    if diff == 0 && nanos > 0.0 {
        diff = SECS_PER_DAY;
    }
    (diff as f64 - nanos) / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_hour_of_day_is_fractional() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 22, 30, 36).unwrap();
        let hour = hour_of_day(now, &utc_offset());
        assert!((hour - 22.51).abs() < 1e-9);
    }

    #[test]
    fn test_hour_of_day_uses_reference_offset() {
        let zone = FixedOffset::east_opt(2 * 3600).unwrap();
        assert!((hour_of_day(at(22, 0), &zone) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_window_classification() {
        let window = TimeWindow::default();
        assert_eq!(window.current_window(at(22, 59)), ScheduleWindow::Day);
        assert_eq!(window.current_window(at(23, 0)), ScheduleWindow::Night);
        assert_eq!(window.current_window(at(2, 0)), ScheduleWindow::Night);
        assert_eq!(window.current_window(at(5, 59)), ScheduleWindow::Night);
        assert_eq!(window.current_window(at(6, 0)), ScheduleWindow::Day);
        assert_eq!(window.current_window(at(12, 0)), ScheduleWindow::Day);
    }

    #[test]
    fn test_non_wrapping_window() {
        let window = TimeWindow::new(
            NightWindow {
                start_hour: 1.0,
                end_hour: 5.0,
            },
            utc_offset(),
        );
        assert_eq!(window.current_window(at(0, 30)), ScheduleWindow::Day);
        assert_eq!(window.current_window(at(3, 0)), ScheduleWindow::Night);
        assert_eq!(window.current_window(at(5, 0)), ScheduleWindow::Day);
    }

    #[test]
    fn test_empty_window_is_always_day() {
        let window = TimeWindow::new(
            NightWindow {
                start_hour: 4.0,
                end_hour: 4.0,
            },
            utc_offset(),
        );
        assert_eq!(window.current_window(at(4, 0)), ScheduleWindow::Day);
        assert_eq!(window.current_window(at(23, 0)), ScheduleWindow::Day);
    }

    #[test]
    fn test_minutes_until_same_day() {
        let minutes = minutes_until(at(22, 50), 23.0, &utc_offset());
        assert!((minutes - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_minutes_until_wraps_midnight() {
        let minutes = minutes_until(at(23, 0), 6.0, &utc_offset());
        assert!((minutes - 420.0).abs() < 1e-9);
    }

    #[test]
    fn test_minutes_until_exact_boundary_is_zero() {
        assert_eq!(minutes_until(at(6, 0), 6.0, &utc_offset()), 0.0);
    }

    #[test]
    fn test_opposite_window_start() {
        let window = TimeWindow::default();
        assert_eq!(window.opposite_window_start(ScheduleWindow::Day), 23.0);
        assert_eq!(window.opposite_window_start(ScheduleWindow::Night), 6.0);
        assert_eq!(ScheduleWindow::Day.opposite(), ScheduleWindow::Night);
    }

    proptest! {
        // Wrapping windows classify exactly as [start, 24) U [0, end)
        #[test]
        fn night_iff_hour_in_wrapped_range(
            secs in 0i64..86_400,
            start in 12.0f64..24.0,
            end in 0.0f64..12.0,
        ) {
            let now = DateTime::from_timestamp(1_700_006_400 + secs, 0).unwrap();
            let window = TimeWindow::new(
                NightWindow { start_hour: start, end_hour: end },
                utc_offset(),
            );
            let hour = window.hour_of_day(now);
            let expected = (hour >= start && hour < 24.0) || (hour >= 0.0 && hour < end);

            prop_assert_eq!(window.current_window(now) == ScheduleWindow::Night, expected);
        }

        #[test]
        fn minutes_until_is_bounded(secs in 0i64..86_400, target in 0.0f64..24.0) {
            let now = DateTime::from_timestamp(1_700_006_400 + secs, 0).unwrap();
            let minutes = minutes_until(now, target, &utc_offset());
            prop_assert!(minutes >= 0.0);
            prop_assert!(minutes < 24.0 * 60.0);
        }

        #[test]
        fn hour_of_day_in_range(secs in 0i64..10_000_000, offset in -12i32..14) {
            let now = DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap();
            let zone = FixedOffset::east_opt(offset * 3600).unwrap();
            let hour = hour_of_day(now, &zone);
            prop_assert!((0.0..24.0).contains(&hour));
        }
    }
}
