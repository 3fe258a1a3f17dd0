//! `cron` — lets the agent manage its own scheduled jobs.
//!
//! Thin façade over the scheduler: create, list, enable, disable, delete.
//! Schedule validation errors (bad cron expressions) come back as tool
//! errors the LLM can read and correct.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use tinyclaw_cron::{CronJob, JobPayload, Schedule, Scheduler};

use super::base::{optional_bool, optional_i64, optional_string, require_string, Tool};

/// Scheduled-job management tool.
pub struct CronTool {
    scheduler: Arc<Scheduler>,
    /// Current conversation, used as the default delivery target.
    context: Mutex<(String, String)>,
}

impl CronTool {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock().await = (channel.to_string(), chat_id.to_string());
    }

    fn schedule_from_args(args: &HashMap<String, Value>) -> anyhow::Result<Schedule> {
        if let Some(expr) = optional_string(args, "cron_expr") {
            return Ok(Schedule::Cron { expr });
        }
        if let Some(every_ms) = optional_i64(args, "every_ms") {
            return Ok(Schedule::Every { every_ms });
        }
        if let Some(at_ms) = optional_i64(args, "at_ms") {
            return Ok(Schedule::At { at_ms });
        }
        anyhow::bail!("provide one of cron_expr, every_ms, or at_ms")
    }

    fn render_job(job: &CronJob) -> String {
        let schedule = match &job.schedule {
            Schedule::Cron { expr } => format!("cron '{expr}'"),
            Schedule::Every { every_ms } => format!("every {every_ms}ms"),
            Schedule::At { at_ms } => format!("once at {at_ms}"),
        };
        let state = if job.enabled { "enabled" } else { "disabled" };
        format!(
            "[{}] {} — {schedule}, {state}, next={:?}, last={:?}",
            job.id, job.name, job.state.next_run_at_ms, job.state.last_status
        )
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Manage scheduled jobs: create, list, enable, disable, or delete. \
         Jobs run a prompt through the agent on a schedule and can deliver \
         the result to a chat channel."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "list", "enable", "disable", "delete"],
                    "description": "What to do"
                },
                "name": {
                    "type": "string",
                    "description": "Job name (create)"
                },
                "message": {
                    "type": "string",
                    "description": "Prompt the job sends to the agent (create)"
                },
                "cron_expr": {
                    "type": "string",
                    "description": "5-field cron expression (create)"
                },
                "every_ms": {
                    "type": "integer",
                    "description": "Interval in milliseconds (create)"
                },
                "at_ms": {
                    "type": "integer",
                    "description": "One-shot Unix timestamp in milliseconds (create)"
                },
                "deliver": {
                    "type": "boolean",
                    "description": "Deliver the result to the current chat (create, default false)"
                },
                "job_id": {
                    "type": "string",
                    "description": "Target job id (enable/disable/delete)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let action = require_string(&args, "action")?;

        match action.as_str() {
            "create" => {
                let name = require_string(&args, "name")?;
                let message = require_string(&args, "message")?;
                let schedule = Self::schedule_from_args(&args)?;
                let deliver = optional_bool(&args, "deliver").unwrap_or(false);

                let (channel, chat_id) = self.context.lock().await.clone();
                let payload = JobPayload {
                    message,
                    deliver,
                    channel: deliver.then_some(channel),
                    chat_id: deliver.then_some(chat_id),
                };

                let job = CronJob::new(name, schedule, payload);
                let id = self
                    .scheduler
                    .add_job(job)
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                Ok(format!("Created job {id}"))
            }
            "list" => {
                let jobs = self.scheduler.list_jobs();
                if jobs.is_empty() {
                    Ok("No scheduled jobs".into())
                } else {
                    Ok(jobs.iter().map(Self::render_job).collect::<Vec<_>>().join("\n"))
                }
            }
            "enable" | "disable" => {
                let id = require_string(&args, "job_id")?;
                let enable = action == "enable";
                if self.scheduler.set_enabled(&id, enable) {
                    Ok(format!(
                        "Job {id} {}",
                        if enable { "enabled" } else { "disabled" }
                    ))
                } else {
                    anyhow::bail!("no job with id '{id}'")
                }
            }
            "delete" => {
                let id = require_string(&args, "job_id")?;
                if self.scheduler.remove_job(&id) {
                    Ok(format!("Job {id} deleted"))
                } else {
                    anyhow::bail!("no job with id '{id}'")
                }
            }
            other => anyhow::bail!("unknown action '{other}'"),
        }
    }
}
