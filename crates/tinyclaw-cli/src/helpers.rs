//! Shared CLI helpers: banner, workspace resolution, client construction.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use tinyclaw_core::config::Config;
use tinyclaw_core::security::{SecurityGuard, SecurityPolicy};
use tinyclaw_core::utils::expand_home;
use tinyclaw_llm::HttpLlmClient;

pub fn print_banner() {
    println!("  {}", "tinyclaw".bold().cyan());
    println!("  {}", "a personal AI agent runtime".dimmed());
}

/// Resolve and create the workspace directory from config.
pub fn prepare_workspace(config: &Config) -> Result<PathBuf> {
    let workspace = expand_home(&config.agent.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;
    Ok(workspace)
}

/// Build the security guard from config.
pub fn build_guard(config: &Config, workspace: &std::path::Path) -> Arc<SecurityGuard> {
    Arc::new(SecurityGuard::new(SecurityPolicy {
        workspace_root: workspace.to_path_buf(),
        restrict_to_workspace: config.tools.restrict_to_workspace,
        command_blacklist: config.tools.command_blacklist.clone(),
    }))
}

/// Resolve the configured model to an HTTP client via the explicit
/// model → provider routing table.
pub fn build_llm_client(config: &Config) -> Result<HttpLlmClient> {
    let provider = config
        .llm
        .provider_for(&config.agent.model)
        .context(format!(
            "no provider configured for model '{}'; set llm.defaultProvider and \
             llm.providers in the config (or TINYCLAW_PROVIDERS_<NAME>_API_KEY)",
            config.agent.model
        ))?;
    if !provider.is_configured() {
        anyhow::bail!(
            "provider for model '{}' is missing apiKey or apiBase",
            config.agent.model
        );
    }
    Ok(HttpLlmClient::new(
        provider.api_base.clone(),
        provider.api_key.clone(),
    ))
}

/// Agent settings assembled from config + workspace.
pub fn agent_settings(config: &Config, workspace: &std::path::Path) -> tinyclaw_agent::AgentSettings {
    tinyclaw_agent::AgentSettings {
        workspace: workspace.to_path_buf(),
        agent_name: "TinyClaw".into(),
        model: config.agent.model.clone(),
        max_tokens: config.agent.max_tokens,
        temperature: config.agent.temperature,
        max_tool_iterations: config.agent.max_tool_iterations as usize,
        context_window_tokens: config.agent.context_window_tokens as usize,
        search_api_key: if config.tools.search_api_key.is_empty() {
            None
        } else {
            Some(config.tools.search_api_key.clone())
        },
        exec_timeout_secs: config.tools.exec_timeout_secs,
    }
}
