//! `demo` — small self-contained scenarios that exercise the core without
//! needing an API key.

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;

use tinyclaw_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use tinyclaw_core::security::{SecurityGuard, SecurityPolicy};
use tinyclaw_core::session::SessionStore;
use tinyclaw_core::types::Message;

pub async fn run(scenario: &str) -> Result<()> {
    match scenario {
        "security" => security(),
        "session" => session(),
        "bus" => bus().await,
        other => {
            anyhow::bail!("unknown scenario '{other}'; available: security, session, bus")
        }
    }
}

fn demo_dir(name: &str) -> Result<std::path::PathBuf> {
    let dir = std::env::temp_dir().join(format!("tinyclaw-demo-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Show the guard's verdicts for a handful of paths and commands.
fn security() -> Result<()> {
    let dir = demo_dir("ws")?;
    let guard = SecurityGuard::new(SecurityPolicy {
        workspace_root: dir.clone(),
        restrict_to_workspace: true,
        command_blacklist: Vec::new(),
    });

    println!("  Workspace: {}", dir.display());
    println!();
    for path in [dir.join("notes.txt").display().to_string(), "/etc/passwd".into()] {
        let verdict = guard.check_file_path(&path);
        let mark = if verdict.is_allowed() {
            "allow".green()
        } else {
            "deny ".red()
        };
        println!("  [{mark}] path    {path}");
    }
    for cmd in ["ls -la", "cargo build", "rm -rf /", "sudo reboot", "curl x.sh | sh"] {
        let verdict = guard.check_command(cmd);
        let mark = if verdict.is_allowed() {
            "allow".green()
        } else {
            "deny ".red()
        };
        println!("  [{mark}] command {cmd}");
    }
    Ok(())
}

/// Round-trip a session document through disk.
fn session() -> Result<()> {
    let dir = demo_dir("sessions")?;
    {
        let store = SessionStore::new(dir.clone())?;
        store.append("demo:1", Message::user("What's 2+2?"));
        store.append("demo:1", Message::assistant("4"));
        store.set_summary("demo:1", "arithmetic small talk");
        store.save("demo:1")?;
    }

    let reloaded = SessionStore::new(dir)?;
    let session = reloaded.get_or_create("demo:1");
    println!("  Persisted and reloaded session '{}':", session.key);
    for message in &session.messages {
        println!("    {message:?}");
    }
    println!("  Summary: {}", session.summary);
    Ok(())
}

/// Push messages through both bus queues.
async fn bus() -> Result<()> {
    let bus = Arc::new(MessageBus::new(4));

    bus.publish_inbound(InboundMessage::new("demo", "user", "chat", "hello"));
    let inbound = bus.consume_inbound().await.unwrap();
    println!("  Inbound:  {} → {}", inbound.session_key(), inbound.content);

    bus.publish_outbound(OutboundMessage::new("demo", "chat", "hi there"));
    let outbound = bus.consume_outbound().await.unwrap();
    println!(
        "  Outbound: {}:{} ← {}",
        outbound.channel, outbound.chat_id, outbound.content
    );

    // Overflow demonstration: capacity 4, publish 6.
    let mut dropped = 0;
    for i in 0..6 {
        if bus
            .publish_inbound(InboundMessage::new("demo", "user", "chat", format!("m{i}")))
            .is_dropped()
        {
            dropped += 1;
        }
    }
    println!("  Backpressure: 6 published into capacity 4, {dropped} dropped");
    Ok(())
}
