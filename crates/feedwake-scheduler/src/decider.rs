//! Decides whether a running job must re-arm before it exits.

use chrono::{DateTime, Utc};

use crate::policy::ScheduleConfig;
use crate::types::ScheduledJob;

/// How far into the opposite window the next run may land before the job
/// is re-armed anyway.
pub const BOUNDARY_TOLERANCE_MINUTES: f64 = 10.0;

/// Whether `job` must be replaced by a freshly computed schedule.
///
/// True when the window has flipped since the job was armed, or when the
/// next run (one interval from `now`) would land more than
/// [`BOUNDARY_TOLERANCE_MINUTES`] into the opposite window. One-off jobs
/// never re-arm.
pub fn needs_reschedule(job: &ScheduledJob, now: DateTime<Utc>, config: &ScheduleConfig) -> bool {
    if job.one_off {
        return false;
    }

    if config.current_window(now) != job.window {
        return true;
    }

    let to_boundary = config.time.minutes_until_opposite(now, job.window);
    job.interval_minutes as f64 >= to_boundary + BOUNDARY_TOLERANCE_MINUTES
}
