//! Scheduler data model — schedules, payloads, job state, and the persisted
//! document.
//!
//! Serialised with camelCase keys; the schedule kind is tagged
//! `{"kind": "CRON" | "EVERY" | "AT", expr?, everyMs?, atMs?}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────
// Schedule
// ─────────────────────────────────────────────

/// When a job fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Schedule {
    /// Standard 5-field cron expression, evaluated against the wall clock.
    #[serde(rename = "CRON")]
    Cron { expr: String },
    /// Fixed interval in milliseconds.
    #[serde(rename = "EVERY")]
    Every {
        #[serde(rename = "everyMs")]
        every_ms: i64,
    },
    /// One-shot at a Unix-epoch-millisecond timestamp.
    #[serde(rename = "AT")]
    At {
        #[serde(rename = "atMs")]
        at_ms: i64,
    },
}

/// Errors raised when registering a job.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
    #[error("interval must be positive, got {0}ms")]
    NonPositiveInterval(i64),
    #[error("duplicate job id '{0}'")]
    DuplicateId(String),
}

impl Schedule {
    /// Validate the schedule; bad cron expressions are rejected at add time.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Schedule::Cron { expr } => parse_cron(expr).map(|_| ()),
            Schedule::Every { every_ms } if *every_ms <= 0 => {
                Err(ScheduleError::NonPositiveInterval(*every_ms))
            }
            _ => Ok(()),
        }
    }

    /// Compute the next run after `now_ms`. `None` for an AT schedule whose
    /// time has passed (one-shots never re-arm).
    pub fn next_run_after(&self, now_ms: i64) -> Option<i64> {
        match self {
            Schedule::At { at_ms } => (*at_ms >= now_ms).then_some(*at_ms),
            Schedule::Every { every_ms } => Some(now_ms + (*every_ms).max(1)),
            Schedule::Cron { expr } => {
                let parsed = parse_cron(expr).ok()?;
                let now: DateTime<Utc> = DateTime::from_timestamp_millis(now_ms)?;
                parsed
                    .after(&now)
                    .next()
                    .map(|next| next.timestamp_millis())
            }
        }
    }
}

/// Parse a 5-field cron expression (the `cron` crate wants seconds first, so
/// a 5-field input gets `0 ` prepended; a 6/7-field input passes through).
fn parse_cron(expr: &str) -> Result<cron::Schedule, ScheduleError> {
    let fields = expr.split_whitespace().count();
    let normalised = if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    normalised
        .parse::<cron::Schedule>()
        .map_err(|e| ScheduleError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

// ─────────────────────────────────────────────
// Payload and state
// ─────────────────────────────────────────────

/// What the job does when it fires.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobPayload {
    /// Prompt routed into the agent loop.
    pub message: String,
    /// Deliver the agent's response to a channel.
    pub deliver: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
    Skipped,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// ─────────────────────────────────────────────
// Job
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    /// Unique id (uuid v4, first 8 chars).
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: Schedule,
    pub payload: JobPayload,
    #[serde(default)]
    pub state: JobState,
    /// Remove the job entirely after a one-shot run.
    #[serde(default)]
    pub delete_after_run: bool,
}

fn default_true() -> bool {
    true
}

impl CronJob {
    pub fn new(name: impl Into<String>, schedule: Schedule, payload: JobPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            name: name.into(),
            enabled: true,
            schedule,
            payload,
            state: JobState::default(),
            delete_after_run: false,
        }
    }

    /// Session key backing this job's agent conversations.
    pub fn session_key(&self) -> String {
        format!("cron:{}", self.id)
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.enabled
            && self
                .state
                .next_run_at_ms
                .map(|next| next <= now_ms)
                .unwrap_or(false)
    }
}

// ─────────────────────────────────────────────
// Persisted document
// ─────────────────────────────────────────────

/// The single JSON document under `cron/jobs.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobDocument {
    pub jobs: Vec<CronJob>,
}

impl JobDocument {
    pub fn find(&self, id: &str) -> Option<&CronJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut CronJob> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.id != id);
        self.jobs.len() < before
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
