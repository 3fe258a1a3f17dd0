//! `skills` subcommands — list and inspect workspace skills.

use anyhow::Result;
use colored::Colorize;

use tinyclaw_agent::SkillsIndex;
use tinyclaw_core::config::load_config;

use crate::helpers;

pub fn list() -> Result<()> {
    let config = load_config(None)?;
    let workspace = helpers::prepare_workspace(&config)?;

    let entries = SkillsIndex::new(&workspace).entries();
    if entries.is_empty() {
        println!("  No skills installed under {}", workspace.join("skills").display());
        println!("  Add one as skills/<name>/SKILL.md");
        return Ok(());
    }
    for entry in entries {
        println!("  {} — {}", entry.name.bold(), entry.description);
    }
    Ok(())
}

pub fn show(name: &str) -> Result<()> {
    let config = load_config(None)?;
    let workspace = helpers::prepare_workspace(&config)?;

    let entries = SkillsIndex::new(&workspace).entries();
    let entry = entries
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| anyhow::anyhow!("no skill named '{name}'"))?;

    let body = std::fs::read_to_string(&entry.path)?;
    println!("{body}");
    Ok(())
}
