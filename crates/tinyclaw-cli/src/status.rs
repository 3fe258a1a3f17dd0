//! `status` — a quick look at config, sessions, and scheduled jobs.

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;

use tinyclaw_core::bus::MessageBus;
use tinyclaw_core::config::load_config;
use tinyclaw_core::session::SessionStore;
use tinyclaw_cron::Scheduler;

use crate::helpers;

pub fn run() -> Result<()> {
    helpers::print_banner();
    println!();

    let config = load_config(None)?;
    let workspace = helpers::prepare_workspace(&config)?;

    println!("  Model:      {}", config.agent.model);
    let provider = config.llm.provider_for(&config.agent.model);
    match provider {
        Some(p) if p.is_configured() => {
            println!("  Provider:   {} {}", p.api_base, "(configured)".green())
        }
        Some(_) => println!("  Provider:   {}", "incomplete (missing key or base)".yellow()),
        None => println!("  Provider:   {}", "not configured".red()),
    }
    println!("  Workspace:  {}", workspace.display());

    let sessions = SessionStore::new(workspace.join("sessions"))?;
    let keys = sessions.keys();
    println!("  Sessions:   {}", keys.len());
    for key in keys.iter().take(10) {
        println!("    - {key}");
    }

    let scheduler = Scheduler::new(
        Arc::new(MessageBus::default()),
        workspace.join("cron").join("jobs.json"),
    );
    scheduler.load().ok();
    let jobs = scheduler.list_jobs();
    let enabled = jobs.iter().filter(|j| j.enabled).count();
    println!("  Cron jobs:  {} ({enabled} enabled)", jobs.len());

    let ch = &config.channels;
    let mut enabled_channels = Vec::new();
    if ch.telegram.enabled {
        enabled_channels.push("telegram");
    }
    if ch.discord.enabled {
        enabled_channels.push("discord");
    }
    if ch.whatsapp.enabled {
        enabled_channels.push("whatsapp");
    }
    if ch.feishu.enabled {
        enabled_channels.push("feishu");
    }
    if ch.dingtalk.enabled {
        enabled_channels.push("dingtalk");
    }
    if ch.qq.enabled {
        enabled_channels.push("qq");
    }
    if ch.camera.enabled {
        enabled_channels.push("camera");
    }
    println!(
        "  Channels:   {}",
        if enabled_channels.is_empty() {
            "none".to_string()
        } else {
            enabled_channels.join(", ")
        }
    );
    println!(
        "  Heartbeat:  {}",
        if config.heartbeat.enabled {
            format!("every {}s", config.heartbeat.interval_secs)
        } else {
            "disabled".to_string()
        }
    );
    Ok(())
}
