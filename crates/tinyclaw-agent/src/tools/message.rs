//! `message` — lets the agent send a message to a channel proactively.
//!
//! The tool holds only the bus handle; the channel manager is not a
//! dependency, which keeps the manager ↔ tool ↔ bus wiring acyclic. The
//! gateway installs the set of registered channel names so sends to an
//! unknown channel fail here instead of silently vanishing downstream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use tinyclaw_core::bus::{MessageBus, OutboundMessage};

use super::base::{optional_string, require_string, Tool};

/// Publishes an `OutboundMessage` to a named channel.
pub struct MessageTool {
    bus: Arc<MessageBus>,
    /// Channel names that are actually registered. Empty = accept any
    /// (direct CLI mode, tests).
    known_channels: std::sync::RwLock<HashSet<String>>,
    /// Default target for the current conversation, set by the agent loop
    /// before each turn.
    context: Mutex<(String, String)>,
}

impl MessageTool {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            known_channels: std::sync::RwLock::new(HashSet::new()),
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    /// Install the registered channel names (called by the gateway once the
    /// channel manager is built).
    pub fn set_known_channels(&self, names: impl IntoIterator<Item = String>) {
        *self.known_channels.write().unwrap() = names.into_iter().collect();
    }

    /// Set the default channel/chat for the current conversation.
    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock().await = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to a chat channel. Defaults to the current conversation; \
         pass channel and chat_id to target another one."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message text"
                },
                "channel": {
                    "type": "string",
                    "description": "Target channel name (optional)"
                },
                "chat_id": {
                    "type": "string",
                    "description": "Target chat id (optional)"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let content = require_string(&args, "content")?;
        let override_channel = optional_string(&args, "channel");
        let override_chat = optional_string(&args, "chat_id");

        let (default_channel, default_chat) = self.context.lock().await.clone();
        let channel = override_channel.unwrap_or(default_channel);
        let chat_id = override_chat.unwrap_or(default_chat);

        {
            let known = self.known_channels.read().unwrap();
            if !known.is_empty() && !known.contains(&channel) {
                anyhow::bail!("channel '{channel}' is not registered");
            }
        }

        debug!(channel = %channel, chat_id = %chat_id, "message tool send");

        if self
            .bus
            .publish_outbound(OutboundMessage::new(&channel, &chat_id, &content))
            .is_dropped()
        {
            anyhow::bail!("outbound queue full, message dropped");
        }
        Ok(format!("Message sent to {channel}:{chat_id}"))
    }
}
