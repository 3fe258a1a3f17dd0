//! Configuration schema.
//!
//! JSON on disk uses camelCase keys; Rust uses snake_case via
//! `#[serde(rename_all = "camelCase")]`. Every section defaults so a partial
//! config file (or none at all) still produces a usable `Config`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────

/// Root configuration, loaded from `~/.tinyclaw/config.json` plus
/// `TINYCLAW_*` env overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub channels: ChannelsConfig,
    pub tools: ToolsConfig,
    pub gateway: GatewayConfig,
    pub heartbeat: HeartbeatConfig,
    /// Base URL of the social-network collaborator service, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_endpoint: Option<String>,
}

// ─────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Workspace directory (guide files, memory, sessions, cron document).
    pub workspace: String,
    /// Model identifier sent to the LLM backend.
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Maximum LLM calls per turn before the loop forces a response.
    pub max_tool_iterations: u32,
    /// Approximate context window of the model, in tokens. Drives the
    /// summarisation trigger.
    pub context_window_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workspace: "~/.tinyclaw/workspace".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
            context_window_tokens: 128_000,
        }
    }
}

// ─────────────────────────────────────────────
// LLM providers and routing
// ─────────────────────────────────────────────

/// One OpenAI-compatible backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: String,
    /// Base URL ending before `/chat/completions`.
    pub api_base: String,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_base.is_empty()
    }
}

/// Provider table plus the explicit model → provider routing map.
///
/// Routing is always explicit: a model name is looked up in `model_routes`,
/// falling back to `default_provider`. No heuristics on the model string.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmConfig {
    pub providers: HashMap<String, ProviderConfig>,
    pub model_routes: HashMap<String, String>,
    pub default_provider: String,
}

impl LlmConfig {
    /// Resolve the provider backing `model`.
    pub fn provider_for(&self, model: &str) -> Option<&ProviderConfig> {
        let name = self
            .model_routes
            .get(model)
            .map(String::as_str)
            .unwrap_or(&self.default_provider);
        self.providers.get(name)
    }
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelsConfig {
    pub telegram: TelegramConfig,
    pub discord: DiscordConfig,
    pub whatsapp: WhatsAppConfig,
    pub feishu: FeishuConfig,
    pub dingtalk: DingTalkConfig,
    pub qq: QqConfig,
    pub camera: CameraConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: String,
    /// Sender ids/usernames allowed to talk to the agent. Empty = everyone.
    pub allowed_senders: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordConfig {
    pub enabled: bool,
    pub token: String,
    pub allowed_senders: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhatsAppConfig {
    pub enabled: bool,
    /// WebSocket URL of the bridge process.
    pub bridge_url: String,
    pub allowed_senders: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeishuConfig {
    pub enabled: bool,
    pub app_id: String,
    pub app_secret: String,
    pub allowed_senders: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DingTalkConfig {
    pub enabled: bool,
    pub client_id: String,
    pub client_secret: String,
    pub allowed_senders: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QqConfig {
    pub enabled: bool,
    /// HTTP endpoint of the QQ bot service for outbound messages.
    pub api_url: String,
    pub access_token: String,
    pub allowed_senders: Vec<String>,
}

/// Camera-device socket: line-delimited JSON over TCP.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraConfig {
    pub enabled: bool,
    pub bind_host: String,
    pub bind_port: u16,
    pub allowed_senders: Vec<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_host: "127.0.0.1".to_string(),
            bind_port: 9331,
            allowed_senders: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Restrict file tools and `exec` working dirs to the workspace.
    pub restrict_to_workspace: bool,
    /// Custom command blacklist patterns. Non-empty replaces the defaults.
    pub command_blacklist: Vec<String>,
    /// `exec` timeout in seconds.
    pub exec_timeout_secs: u64,
    /// Search API key for the `web_search` tool.
    pub search_api_key: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            restrict_to_workspace: true,
            command_blacklist: Vec::new(),
            exec_timeout_secs: 60,
            search_api_key: String::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Gateway + heartbeat
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Bind host for the webhook receiver.
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9300,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30 * 60,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.agent.max_tool_iterations, 20);
        assert!(cfg.tools.restrict_to_workspace);
        assert_eq!(cfg.gateway.port, 9300);
        assert!(!cfg.heartbeat.enabled);
        assert!(cfg.channels.telegram.token.is_empty());
    }

    #[test]
    fn camel_case_on_disk() {
        let cfg = Config::default();
        let json = serde_json::to_value(&cfg).unwrap();
        assert!(json["agent"].get("maxToolIterations").is_some());
        assert!(json["tools"].get("restrictToWorkspace").is_some());
        assert!(json["channels"]["camera"].get("bindPort").is_some());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let raw = r#"{"agent": {"model": "claude-sonnet-4"}}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.agent.model, "claude-sonnet-4");
        assert_eq!(cfg.agent.max_tokens, 8192);
    }

    #[test]
    fn provider_routing_explicit_map() {
        let mut llm = LlmConfig::default();
        llm.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: "sk-1".into(),
                api_base: "https://api.openai.com/v1".into(),
            },
        );
        llm.providers.insert(
            "local".into(),
            ProviderConfig {
                api_key: "none".into(),
                api_base: "http://localhost:8000/v1".into(),
            },
        );
        llm.model_routes.insert("qwen-72b".into(), "local".into());
        llm.default_provider = "openai".into();

        assert_eq!(
            llm.provider_for("qwen-72b").unwrap().api_base,
            "http://localhost:8000/v1"
        );
        assert_eq!(
            llm.provider_for("gpt-4o").unwrap().api_base,
            "https://api.openai.com/v1"
        );
    }

    #[test]
    fn provider_routing_unknown_default_is_none() {
        let llm = LlmConfig::default();
        assert!(llm.provider_for("anything").is_none());
    }
}
