//! Config loader — JSON file plus `TINYCLAW_*` environment overrides.
//!
//! Loading precedence:
//! 1. `Config::default()`
//! 2. JSON file at `~/.tinyclaw/config.json` (or an explicit path)
//! 3. Environment variables `TINYCLAW_<PATH>` in upper snake case,
//!    e.g. `TINYCLAW_AGENT_MODEL`, `TINYCLAW_PROVIDERS_OPENAI_API_KEY`.
//!
//! A missing file is not an error; an unparseable file is a `ConfigError`
//! surfaced at startup so the process can exit non-zero.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::schema::{Config, ProviderConfig};
use crate::utils;

/// Default config file path (`~/.tinyclaw/config.json`).
pub fn config_path() -> PathBuf {
    utils::data_dir().join("config.json")
}

/// Load the config from the default path (or `path` when given).
///
/// Returns `Err` only for a present-but-invalid file — that is a startup
/// abort per the error design.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(config_path);

    let config = if config_path.exists() {
        debug!(path = %config_path.display(), "loading config");
        let content = std::fs::read_to_string(&config_path)?;
        serde_json::from_str(&content).map_err(|e| {
            anyhow::anyhow!("invalid config file {}: {e}", config_path.display())
        })?
    } else {
        info!(path = %config_path.display(), "no config file, using defaults");
        Config::default()
    };

    Ok(apply_env_overrides(config))
}

/// Persist the config as pretty-printed camelCase JSON.
pub fn save_config(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(config_path);
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config_path, serde_json::to_string_pretty(config)?)?;
    debug!(path = %config_path.display(), "config saved");
    Ok(())
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Apply `TINYCLAW_*` env var overrides on top of a loaded config.
fn apply_env_overrides(mut config: Config) -> Config {
    // Agent
    if let Some(v) = env("TINYCLAW_AGENT_WORKSPACE") {
        config.agent.workspace = v;
    }
    if let Some(v) = env("TINYCLAW_AGENT_MODEL") {
        config.agent.model = v;
    }
    if let Some(v) = env("TINYCLAW_AGENT_MAX_TOKENS").and_then(|v| v.parse().ok()) {
        config.agent.max_tokens = v;
    }
    if let Some(v) = env("TINYCLAW_AGENT_TEMPERATURE").and_then(|v| v.parse().ok()) {
        config.agent.temperature = v;
    }
    if let Some(v) = env("TINYCLAW_AGENT_MAX_TOOL_ITERATIONS").and_then(|v| v.parse().ok()) {
        config.agent.max_tool_iterations = v;
    }

    if let Some(v) = env("TINYCLAW_LLM_DEFAULT_PROVIDER") {
        config.llm.default_provider = v;
    }

    // Providers: TINYCLAW_PROVIDERS_<NAME>_API_KEY / _API_BASE for every
    // provider already present, plus any referenced by the routing table.
    let mut names: Vec<String> = config.llm.providers.keys().cloned().collect();
    names.extend(config.llm.model_routes.values().cloned());
    if !config.llm.default_provider.is_empty() {
        names.push(config.llm.default_provider.clone());
    }
    names.sort();
    names.dedup();
    for name in names {
        let upper = name.to_uppercase().replace(['-', '.'], "_");
        let key = env(&format!("TINYCLAW_PROVIDERS_{upper}_API_KEY"));
        let base = env(&format!("TINYCLAW_PROVIDERS_{upper}_API_BASE"));
        if key.is_none() && base.is_none() {
            continue;
        }
        let entry = config
            .llm
            .providers
            .entry(name)
            .or_insert_with(ProviderConfig::default);
        if let Some(k) = key {
            entry.api_key = k;
        }
        if let Some(b) = base {
            entry.api_base = b;
        }
    }

    // Channels (credentials only; enable flags stay in the file)
    if let Some(v) = env("TINYCLAW_CHANNELS_TELEGRAM_TOKEN") {
        config.channels.telegram.token = v;
    }
    if let Some(v) = env("TINYCLAW_CHANNELS_DISCORD_TOKEN") {
        config.channels.discord.token = v;
    }
    if let Some(v) = env("TINYCLAW_CHANNELS_WHATSAPP_BRIDGE_URL") {
        config.channels.whatsapp.bridge_url = v;
    }
    if let Some(v) = env("TINYCLAW_CHANNELS_FEISHU_APP_SECRET") {
        config.channels.feishu.app_secret = v;
    }
    if let Some(v) = env("TINYCLAW_CHANNELS_DINGTALK_CLIENT_SECRET") {
        config.channels.dingtalk.client_secret = v;
    }
    if let Some(v) = env("TINYCLAW_CHANNELS_QQ_ACCESS_TOKEN") {
        config.channels.qq.access_token = v;
    }

    // Tools
    if let Some(v) = env("TINYCLAW_TOOLS_RESTRICT_TO_WORKSPACE") {
        config.tools.restrict_to_workspace = v == "true" || v == "1";
    }
    if let Some(v) = env("TINYCLAW_TOOLS_SEARCH_API_KEY") {
        config.tools.search_api_key = v;
    }

    // Gateway
    if let Some(v) = env("TINYCLAW_GATEWAY_HOST") {
        config.gateway.host = v;
    }
    if let Some(v) = env("TINYCLAW_GATEWAY_PORT").and_then(|v| v.parse().ok()) {
        config.gateway.port = v;
    }

    // Heartbeat
    if let Some(v) = env("TINYCLAW_HEARTBEAT_ENABLED") {
        config.heartbeat.enabled = v == "true" || v == "1";
    }
    if let Some(v) = env("TINYCLAW_HEARTBEAT_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.heartbeat.interval_secs = v;
    }

    // Social collaborator
    if let Some(v) = env("TINYCLAW_SOCIAL_ENDPOINT") {
        config.social_endpoint = Some(v);
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    // Env overrides read process-wide state, so every test here serialises
    // on one lock to keep parallel test threads from interleaving.
    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn missing_file_yields_defaults() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(cfg.agent.max_tool_iterations, 20);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn file_values_override_defaults() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"agent": {"model": "deepseek-chat", "maxTokens": 2048}}"#,
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.agent.model, "deepseek-chat");
        assert_eq!(cfg.agent.max_tokens, 2048);
        assert_eq!(cfg.agent.temperature, 0.7);
    }

    #[test]
    fn env_overrides_model() {
        let _guard = env_lock();
        std::env::set_var("TINYCLAW_AGENT_MODEL", "kimi-k2");
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("none.json"))).unwrap();
        std::env::remove_var("TINYCLAW_AGENT_MODEL");
        assert_eq!(cfg.agent.model, "kimi-k2");
    }

    #[test]
    fn env_overrides_provider_api_key() {
        let _guard = env_lock();
        std::env::set_var("TINYCLAW_PROVIDERS_OPENAI_API_KEY", "sk-from-env");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"llm": {"defaultProvider": "openai", "providers": {"openai": {"apiKey": "sk-file", "apiBase": "https://api.openai.com/v1"}}}}"#,
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        std::env::remove_var("TINYCLAW_PROVIDERS_OPENAI_API_KEY");
        assert_eq!(cfg.llm.providers["openai"].api_key, "sk-from-env");
        assert_eq!(
            cfg.llm.providers["openai"].api_base,
            "https://api.openai.com/v1"
        );
    }

    #[test]
    fn pure_env_provider_setup() {
        let _guard = env_lock();
        std::env::set_var("TINYCLAW_LLM_DEFAULT_PROVIDER", "local");
        std::env::set_var("TINYCLAW_PROVIDERS_LOCAL_API_KEY", "none");
        std::env::set_var("TINYCLAW_PROVIDERS_LOCAL_API_BASE", "http://localhost:8000/v1");

        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("none.json"))).unwrap();

        std::env::remove_var("TINYCLAW_LLM_DEFAULT_PROVIDER");
        std::env::remove_var("TINYCLAW_PROVIDERS_LOCAL_API_KEY");
        std::env::remove_var("TINYCLAW_PROVIDERS_LOCAL_API_BASE");

        let provider = cfg.llm.provider_for("any-model").expect("provider resolves");
        assert_eq!(provider.api_base, "http://localhost:8000/v1");
    }

    #[test]
    fn save_then_load_round_trip() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut cfg = Config::default();
        cfg.agent.model = "glm-4.7".into();
        cfg.channels.telegram.enabled = true;
        save_config(&cfg, Some(&path)).unwrap();

        let reloaded = load_config(Some(&path)).unwrap();
        assert_eq!(reloaded.agent.model, "glm-4.7");
        assert!(reloaded.channels.telegram.enabled);
    }
}
