//! Day/night adaptive scheduling for feedwake.
//!
//! This crate provides:
//! - Day/night classification of wall-clock time in a fixed reference zone
//! - Interval selection that never lets a run straddle a window boundary
//! - The re-arm decision taken on every wake
//! - A persistent job platform that survives restarts and drives wakes

mod decider;
mod error;
mod platform;
mod policy;
mod types;
mod window;

pub use decider::{BOUNDARY_TOLERANCE_MINUTES, needs_reschedule};
pub use error::SchedulerError;
pub use platform::{FilePlatform, JobPlatform, WakeHandler, ensure_armed, rearm};
pub use policy::{
    ABSOLUTE_MIN_INTERVAL_MINUTES, IntervalPrefs, ScheduleConfig, compute_interval_minutes,
};
pub use types::{JobDescriptor, JobExtras, JobTrigger, ScheduledJob, UPDATE_JOB_ID};
pub use window::{NightWindow, ScheduleWindow, TimeWindow, hour_of_day, minutes_until, utc_offset};
