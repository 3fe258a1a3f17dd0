//! Scheduled jobs for TinyClaw — CRON expressions, fixed intervals, and
//! one-shot timestamps, persisted as a single JSON document and driven by a
//! 1 Hz ticker.

pub mod service;
pub mod types;

pub use service::{OnJobFn, Scheduler};
pub use types::{CronJob, JobDocument, JobPayload, JobState, JobStatus, Schedule, ScheduleError};
