//! Gateway — the composition root.
//!
//! Construction order: config → workspace → SecurityGuard → SessionStore →
//! LLM client → Scheduler → AgentLoop (tools included) → ChannelManager →
//! Heartbeat → WebhookReceiver. Shutdown runs in reverse, and the agent
//! loop gets a bounded grace period to drain its in-flight turn before the
//! process exits.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use tinyclaw_agent::AgentLoop;
use tinyclaw_channels::camera::CameraChannel;
use tinyclaw_channels::dingtalk::DingTalkChannel;
use tinyclaw_channels::discord::DiscordChannel;
use tinyclaw_channels::feishu::FeishuChannel;
use tinyclaw_channels::qq::QqChannel;
use tinyclaw_channels::telegram::TelegramChannel;
use tinyclaw_channels::whatsapp::WhatsAppChannel;
use tinyclaw_channels::{Channel, ChannelManager, WebhookReceiver};
use tinyclaw_core::bus::MessageBus;
use tinyclaw_core::config::load_config;
use tinyclaw_core::heartbeat::{HeartbeatService, OnHeartbeatFn};
use tinyclaw_core::session::SessionStore;
use tinyclaw_cron::{OnJobFn, Scheduler};

use crate::helpers;

/// How long a shutdown waits for the in-flight agent turn.
const SHUTDOWN_GRACE_SECS: u64 = 30;

pub async fn run() -> Result<()> {
    println!();
    helpers::print_banner();
    println!("  Mode: gateway");
    println!();

    // Config errors abort startup with a non-zero exit.
    let config = load_config(None)?;
    let workspace = helpers::prepare_workspace(&config)?;

    let guard = helpers::build_guard(&config, &workspace);
    let sessions = Arc::new(
        SessionStore::new(workspace.join("sessions")).context("failed to open session store")?,
    );
    let client = Arc::new(helpers::build_llm_client(&config)?);

    let bus = Arc::new(MessageBus::default());
    let scheduler = Arc::new(Scheduler::new(
        bus.clone(),
        workspace.join("cron").join("jobs.json"),
    ));

    let agent = Arc::new(AgentLoop::new(
        bus.clone(),
        client,
        guard,
        sessions.clone(),
        Some(scheduler.clone()),
        helpers::agent_settings(&config, &workspace),
    ));

    // Scheduler fires jobs into the agent; delivery to channels is handled
    // by the scheduler itself from the job payload.
    {
        let agent = agent.clone();
        let handler: OnJobFn = Arc::new(move |job: tinyclaw_cron::CronJob| {
            let agent = agent.clone();
            Box::pin(async move {
                match (&job.payload.channel, &job.payload.chat_id) {
                    (Some(channel), Some(chat_id)) => {
                        agent
                            .process_direct_with_channel(
                                &job.payload.message,
                                &job.session_key(),
                                channel,
                                chat_id,
                            )
                            .await
                    }
                    _ => {
                        agent
                            .process_direct(&job.payload.message, &job.session_key())
                            .await
                    }
                }
            })
        });
        scheduler.set_on_job(handler);
    }

    // Channels: construct each enabled one; a failure to construct is
    // isolated to that channel.
    let mut manager = ChannelManager::new(bus.clone());
    let mut push_channels: HashMap<String, Arc<dyn Channel>> = HashMap::new();

    let ch = &config.channels;
    if ch.telegram.enabled && !ch.telegram.token.is_empty() {
        manager.register(Arc::new(TelegramChannel::new(
            ch.telegram.token.clone(),
            bus.clone(),
            ch.telegram.allowed_senders.clone(),
        )));
    }
    if ch.discord.enabled && !ch.discord.token.is_empty() {
        manager.register(Arc::new(DiscordChannel::new(
            ch.discord.token.clone(),
            bus.clone(),
            ch.discord.allowed_senders.clone(),
        )));
    }
    if ch.whatsapp.enabled && !ch.whatsapp.bridge_url.is_empty() {
        manager.register(Arc::new(WhatsAppChannel::new(
            ch.whatsapp.bridge_url.clone(),
            bus.clone(),
            ch.whatsapp.allowed_senders.clone(),
        )));
    }
    if ch.feishu.enabled && !ch.feishu.app_id.is_empty() {
        let feishu = Arc::new(FeishuChannel::new(
            ch.feishu.app_id.clone(),
            ch.feishu.app_secret.clone(),
            bus.clone(),
            ch.feishu.allowed_senders.clone(),
        ));
        push_channels.insert("feishu".into(), feishu.clone());
        manager.register(feishu);
    }
    if ch.dingtalk.enabled && !ch.dingtalk.client_id.is_empty() {
        let dingtalk = Arc::new(DingTalkChannel::new(
            ch.dingtalk.client_id.clone(),
            ch.dingtalk.client_secret.clone(),
            bus.clone(),
            ch.dingtalk.allowed_senders.clone(),
        ));
        push_channels.insert("dingtalk".into(), dingtalk.clone());
        manager.register(dingtalk);
    }
    if ch.qq.enabled && !ch.qq.api_url.is_empty() {
        let qq = Arc::new(QqChannel::new(
            ch.qq.api_url.clone(),
            ch.qq.access_token.clone(),
            bus.clone(),
            ch.qq.allowed_senders.clone(),
        ));
        push_channels.insert("qq".into(), qq.clone());
        manager.register(qq);
    }
    if ch.camera.enabled {
        manager.register(Arc::new(CameraChannel::new(
            ch.camera.bind_host.clone(),
            ch.camera.bind_port,
            bus.clone(),
            ch.camera.allowed_senders.clone(),
        )));
    }

    agent.set_known_channels(manager.channel_names());
    let manager = Arc::new(manager);

    // Heartbeat (optional).
    let heartbeat = if config.heartbeat.enabled {
        let agent = agent.clone();
        let callback: OnHeartbeatFn = Arc::new(move |prompt| {
            let agent = agent.clone();
            Box::pin(async move { agent.process_direct(&prompt, "heartbeat:tick").await })
        });
        Some(Arc::new(HeartbeatService::new(
            workspace.clone(),
            callback,
            config.heartbeat.interval_secs,
        )))
    } else {
        None
    };

    // Webhook receiver (only when a push channel wants it).
    let webhook = if push_channels.is_empty() {
        None
    } else {
        Some(Arc::new(WebhookReceiver::new(
            config.gateway.host.clone(),
            config.gateway.port,
            push_channels,
        )))
    };

    info!(
        model = %config.agent.model,
        workspace = %workspace.display(),
        channels = ?manager.channel_names(),
        "gateway starting"
    );
    println!("  Model:     {}", config.agent.model);
    println!("  Workspace: {}", workspace.display());
    println!("  Channels:  {}", manager.channel_names().join(", "));
    println!("  Cron jobs: {}", scheduler.list_jobs().len());
    if webhook.is_some() {
        println!(
            "  Webhooks:  http://{}:{}/webhook/…",
            config.gateway.host, config.gateway.port
        );
    }
    println!();
    println!("  Ctrl+C to stop");
    println!();

    // Long-running workers.
    let agent_task = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.run().await })
    };
    let manager_task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start_all().await })
    };
    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start().await })
    };
    let heartbeat_task = heartbeat.as_ref().map(|hb| {
        let hb = hb.clone();
        tokio::spawn(async move { hb.start().await })
    });
    let webhook_task = webhook.as_ref().map(|wh| {
        let wh = wh.clone();
        tokio::spawn(async move {
            if let Err(e) = wh.run().await {
                error!(error = %e, "webhook receiver failed");
            }
        })
    });

    tokio::signal::ctrl_c().await.ok();
    println!();
    println!("  Shutting down…");
    info!("shutdown requested");

    // Reverse order: webhook → heartbeat → scheduler → channels → agent.
    if let Some(ref wh) = webhook {
        wh.stop();
    }
    if let Some(ref hb) = heartbeat {
        hb.stop();
    }
    scheduler.stop();
    manager.stop_all().await;

    // Drain the agent's in-flight turn, bounded.
    agent.stop();
    match tokio::time::timeout(
        std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS),
        agent_task,
    )
    .await
    {
        Ok(_) => info!("agent loop drained"),
        Err(_) => {
            warn!("agent loop did not drain within grace period, aborting");
        }
    }

    manager_task.abort();
    scheduler_task.abort();
    if let Some(task) = heartbeat_task {
        task.abort();
    }
    if let Some(task) = webhook_task {
        task.abort();
    }

    println!("  Gateway stopped.");
    Ok(())
}
