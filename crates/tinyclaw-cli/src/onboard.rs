//! `onboard` — write a starter config and seed the workspace.

use anyhow::Result;
use colored::Colorize;

use tinyclaw_core::config::{config_path, load_config, save_config, Config};

use crate::helpers;

const STARTER_AGENTS: &str = "# Agent Guide\n\nYou are TinyClaw, a personal AI agent.\n\
Keep replies short and act through your tools.\n";
const STARTER_SOUL: &str = "# Soul\n\nCurious, direct, and careful with the user's machine.\n";
const STARTER_USER: &str = "# User\n\nNotes about the user go here.\n";
const STARTER_IDENTITY: &str = "# Identity\n\nName: TinyClaw\n";
const STARTER_MEMORY: &str = "# Memory\n";
const STARTER_HEARTBEAT: &str =
    "# Heartbeat notes\n\n<!-- Tasks written here run on the heartbeat tick -->\n";

pub fn run() -> Result<()> {
    helpers::print_banner();
    println!();

    let path = config_path();
    if path.exists() {
        println!("  Config already exists at {}", path.display());
    } else {
        save_config(&Config::default(), Some(&path))?;
        println!("  {} {}", "Wrote".green(), path.display());
    }

    let config = load_config(None)?;
    let workspace = helpers::prepare_workspace(&config)?;

    let seeds = [
        ("AGENTS.md", STARTER_AGENTS),
        ("SOUL.md", STARTER_SOUL),
        ("USER.md", STARTER_USER),
        ("IDENTITY.md", STARTER_IDENTITY),
        ("memory/MEMORY.md", STARTER_MEMORY),
        ("memory/HEARTBEAT.md", STARTER_HEARTBEAT),
    ];
    for (rel, content) in seeds {
        let target = workspace.join(rel);
        if target.exists() {
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, content)?;
        println!("  {} {}", "Seeded".green(), target.display());
    }

    println!();
    println!("  Next steps:");
    println!("    1. Add a provider under llm.providers in {}", path.display());
    println!("       (or set TINYCLAW_PROVIDERS_<NAME>_API_KEY / _API_BASE)");
    println!("    2. Point llm.defaultProvider at it");
    println!("    3. Run {} to chat, {} to start channels", "tinyclaw agent".cyan(), "tinyclaw gateway".cyan());
    Ok(())
}
