//! Scheduler types.

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{ScheduleConfig, compute_interval_minutes};
use crate::window::ScheduleWindow;

/// Job id of the recurring feed update.
pub const UPDATE_JOB_ID: &str = "feed-update";

/// An intent to run, as decided by the scheduler.
///
/// Never mutated after creation: re-arming builds a new value that replaces
/// the old one at the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job_id: String,
    pub interval_minutes: u32,
    /// Window the interval was computed for.
    pub window: ScheduleWindow,
    #[serde(with = "ts_milliseconds")]
    pub scheduled_at: DateTime<Utc>,
    pub one_off: bool,
}

impl ScheduledJob {
    /// Build the recurring job for the window `now` falls in.
    pub fn periodic(job_id: impl Into<String>, config: &ScheduleConfig, now: DateTime<Utc>) -> Self {
        let window = config.current_window(now);
        Self {
            job_id: job_id.into(),
            interval_minutes: compute_interval_minutes(config, window, now),
            window,
            scheduled_at: now,
            one_off: false,
        }
    }

    /// Build a single, non-repeating job firing `delay_minutes` after `now`.
    pub fn one_off(
        job_id: impl Into<String>,
        window: ScheduleWindow,
        delay_minutes: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            interval_minutes: delay_minutes,
            window,
            scheduled_at: now,
            one_off: true,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(self.interval_minutes as i64)
    }

    /// Platform descriptor for this job.
    pub fn to_descriptor(&self) -> JobDescriptor {
        let trigger = if self.one_off {
            JobTrigger::OneOff {
                deadline: self.scheduled_at + self.interval(),
            }
        } else {
            JobTrigger::Periodic {
                interval_minutes: self.interval_minutes,
            }
        };

        JobDescriptor {
            job_id: self.job_id.clone(),
            trigger,
            extras: JobExtras {
                scheduled_window: self.window,
                one_off: self.one_off,
            },
            scheduled_at: self.scheduled_at,
            last_run: None,
        }
    }
}

/// When a descriptor fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTrigger {
    /// Every N minutes, measured from the previous run.
    Periodic { interval_minutes: u32 },
    /// Once, at the deadline.
    OneOff {
        #[serde(with = "ts_milliseconds")]
        deadline: DateTime<Utc>,
    },
}

/// Extras carried alongside the trigger and handed back on every wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExtras {
    pub scheduled_window: ScheduleWindow,
    pub one_off: bool,
}

/// What the platform stores for an outstanding job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    pub trigger: JobTrigger,
    pub extras: JobExtras,
    #[serde(with = "ts_milliseconds")]
    pub scheduled_at: DateTime<Utc>,
    /// When the platform last reported this job finished.
    #[serde(default, with = "ts_milliseconds_option")]
    pub last_run: Option<DateTime<Utc>>,
}

impl JobDescriptor {
    /// When this job should next fire.
    pub fn next_run(&self) -> DateTime<Utc> {
        match &self.trigger {
            JobTrigger::Periodic { interval_minutes } => {
                let base = self.last_run.unwrap_or(self.scheduled_at);
                base + Duration::minutes(*interval_minutes as i64)
            }
            JobTrigger::OneOff { deadline } => *deadline,
        }
    }

    /// Check if this job is due to run.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match &self.trigger {
            JobTrigger::OneOff { .. } if self.last_run.is_some() => false,
            _ => self.next_run() <= now,
        }
    }

    /// Whether the job recurs.
    pub fn is_periodic(&self) -> bool {
        matches!(self.trigger, JobTrigger::Periodic { .. })
    }

    /// The scheduler-side view of this descriptor.
    pub fn scheduled_job(&self) -> ScheduledJob {
        let interval_minutes = match &self.trigger {
            JobTrigger::Periodic { interval_minutes } => *interval_minutes,
            JobTrigger::OneOff { deadline } => {
                (*deadline - self.scheduled_at).num_minutes().max(0) as u32
            }
        };

        ScheduledJob {
            job_id: self.job_id.clone(),
            interval_minutes,
            window: self.extras.scheduled_window,
            scheduled_at: self.scheduled_at,
            one_off: self.extras.one_off,
        }
    }
}
