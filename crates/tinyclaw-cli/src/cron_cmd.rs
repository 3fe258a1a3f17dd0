//! `cron` subcommands — manage scheduled jobs from the shell.

use std::sync::Arc;

use anyhow::Result;
use chrono::TimeZone;
use colored::Colorize;

use tinyclaw_core::bus::MessageBus;
use tinyclaw_core::config::load_config;
use tinyclaw_cron::{CronJob, JobPayload, Schedule, Scheduler};

use crate::helpers;

fn open_scheduler() -> Result<Scheduler> {
    let config = load_config(None)?;
    let workspace = helpers::prepare_workspace(&config)?;
    let scheduler = Scheduler::new(
        Arc::new(MessageBus::default()),
        workspace.join("cron").join("jobs.json"),
    );
    scheduler.load().ok();
    Ok(scheduler)
}

fn format_ms(ms: Option<i64>) -> String {
    match ms.and_then(|ms| chrono::Utc.timestamp_millis_opt(ms).single()) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

pub fn list() -> Result<()> {
    let scheduler = open_scheduler()?;
    let jobs = scheduler.list_jobs();
    if jobs.is_empty() {
        println!("  No scheduled jobs.");
        return Ok(());
    }
    for job in jobs {
        let schedule = match &job.schedule {
            Schedule::Cron { expr } => format!("cron '{expr}'"),
            Schedule::Every { every_ms } => format!("every {every_ms}ms"),
            Schedule::At { at_ms } => format!("once at {}", format_ms(Some(*at_ms))),
        };
        let state = if job.enabled {
            "enabled".green()
        } else {
            "disabled".yellow()
        };
        println!(
            "  [{}] {} — {schedule} ({state}) next: {}",
            job.id.bold(),
            job.name,
            format_ms(job.state.next_run_at_ms)
        );
    }
    Ok(())
}

pub fn add(
    name: String,
    message: String,
    cron_expr: Option<String>,
    every_ms: Option<i64>,
    at_ms: Option<i64>,
) -> Result<()> {
    let schedule = match (cron_expr, every_ms, at_ms) {
        (Some(expr), None, None) => Schedule::Cron { expr },
        (None, Some(every_ms), None) => Schedule::Every { every_ms },
        (None, None, Some(at_ms)) => Schedule::At { at_ms },
        _ => anyhow::bail!("provide exactly one of --cron, --every-ms, --at-ms"),
    };

    let scheduler = open_scheduler()?;
    let job = CronJob::new(
        name,
        schedule,
        JobPayload {
            message,
            ..Default::default()
        },
    );
    let id = scheduler.add_job(job).map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("  Added job {}", id.bold());
    Ok(())
}

pub fn remove(id: &str) -> Result<()> {
    let scheduler = open_scheduler()?;
    if scheduler.remove_job(id) {
        println!("  Removed job {id}");
        Ok(())
    } else {
        anyhow::bail!("no job with id '{id}'")
    }
}

pub fn set_enabled(id: &str, enabled: bool) -> Result<()> {
    let scheduler = open_scheduler()?;
    if scheduler.set_enabled(id, enabled) {
        println!(
            "  Job {id} {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    } else {
        anyhow::bail!("no job with id '{id}'")
    }
}
