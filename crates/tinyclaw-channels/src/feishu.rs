//! Feishu (Lark) channel — push-style.
//!
//! Inbound events arrive through the webhook receiver as raw JSON bodies
//! handed to `handle_incoming_message`. Outbound replies go through the
//! Open API with a cached tenant access token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use tinyclaw_core::bus::{MessageBus, OutboundMessage};

use crate::base::{forward_inbound, sender_allowed, Channel};

const OPEN_API_BASE: &str = "https://open.feishu.cn/open-apis";

/// Refresh the token this many seconds before it expires.
const TOKEN_SLACK_SECS: i64 = 300;

struct CachedToken {
    token: String,
    expires_at_ms: i64,
}

pub struct FeishuChannel {
    app_id: String,
    app_secret: String,
    bus: Arc<MessageBus>,
    allowed_senders: Vec<String>,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
}

impl FeishuChannel {
    pub fn new(
        app_id: String,
        app_secret: String,
        bus: Arc<MessageBus>,
        allowed_senders: Vec<String>,
    ) -> Self {
        Self {
            app_id,
            app_secret,
            bus,
            allowed_senders,
            client: reqwest::Client::new(),
            token: Mutex::new(None),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Tenant access token, fetched on demand and cached until near expiry.
    async fn tenant_token(&self) -> anyhow::Result<String> {
        let now_ms = tinyclaw_core::utils::now_ms();
        {
            let cached = self.token.lock().await;
            if let Some(ref t) = *cached {
                if t.expires_at_ms - TOKEN_SLACK_SECS * 1000 > now_ms {
                    return Ok(t.token.clone());
                }
            }
        }

        let response: Value = self
            .client
            .post(format!("{OPEN_API_BASE}/auth/v3/tenant_access_token/internal"))
            .json(&json!({"app_id": self.app_id, "app_secret": self.app_secret}))
            .send()
            .await?
            .json()
            .await?;

        if response["code"].as_i64().unwrap_or(-1) != 0 {
            anyhow::bail!("feishu token request failed: {response}");
        }
        let token = response["tenant_access_token"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("feishu token missing in response"))?
            .to_string();
        let expire_secs = response["expire"].as_i64().unwrap_or(7200);

        *self.token.lock().await = Some(CachedToken {
            token: token.clone(),
            expires_at_ms: now_ms + expire_secs * 1000,
        });
        Ok(token)
    }

    /// Decode a v2 message event and forward the text.
    fn handle_event(&self, body: &Value) {
        let event = &body["event"];
        let message = &event["message"];
        if message["message_type"].as_str() != Some("text") {
            debug!("ignoring non-text feishu message");
            return;
        }

        let sender_id = event["sender"]["sender_id"]["open_id"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let Some(chat_id) = message["chat_id"].as_str() else {
            return;
        };

        // content is a JSON string like {"text":"hello"}
        let text = message["content"]
            .as_str()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|c| c["text"].as_str().map(str::to_string))
            .unwrap_or_default();
        if text.is_empty() {
            return;
        }

        let mut metadata = HashMap::new();
        if let Some(message_id) = message["message_id"].as_str() {
            metadata.insert("message_id".to_string(), message_id.to_string());
        }

        forward_inbound(&self.bus, self, &sender_id, chat_id, text, metadata);
    }
}

#[async_trait]
impl Channel for FeishuChannel {
    fn name(&self) -> &str {
        "feishu"
    }

    /// Push-fed: nothing to poll. Park until shutdown so the manager sees a
    /// long-running channel like any other.
    async fn start(&self) -> anyhow::Result<()> {
        info!("feishu channel ready (webhook-fed)");
        self.running.store(true, Ordering::SeqCst);
        self.shutdown.notified().await;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.notify_waiters();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        sender_allowed(&self.allowed_senders, sender_id)
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let token = self.tenant_token().await?;
        let response = self
            .client
            .post(format!(
                "{OPEN_API_BASE}/im/v1/messages?receive_id_type=chat_id"
            ))
            .bearer_auth(&token)
            .json(&json!({
                "receive_id": msg.chat_id,
                "msg_type": "text",
                "content": json!({"text": msg.content}).to_string(),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "feishu send failed");
            anyhow::bail!("feishu message send returned {status}");
        }
        Ok(())
    }

    async fn handle_incoming_message(&self, raw: &str) -> anyhow::Result<()> {
        let body: Value = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("invalid feishu event body: {e}"))?;

        // URL-verification challenges are answered by the webhook receiver;
        // everything else should be a message event.
        if body.get("challenge").is_some() {
            return Ok(());
        }
        if body["header"]["event_type"].as_str() == Some("im.message.receive_v1") {
            self.handle_event(&body);
        } else {
            debug!(event = ?body["header"]["event_type"], "ignoring feishu event");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_channel(bus: Arc<MessageBus>, allowed: Vec<String>) -> FeishuChannel {
        FeishuChannel::new("app-id".into(), "app-secret".into(), bus, allowed)
    }

    fn message_event(text: &str) -> Value {
        json!({
            "header": {"event_type": "im.message.receive_v1"},
            "event": {
                "sender": {"sender_id": {"open_id": "ou_alice"}},
                "message": {
                    "message_id": "om_1",
                    "chat_id": "oc_chat9",
                    "message_type": "text",
                    "content": json!({"text": text}).to_string()
                }
            }
        })
    }

    #[tokio::test]
    async fn text_event_forwarded() {
        let bus = Arc::new(MessageBus::new(10));
        let channel = make_channel(bus.clone(), vec![]);

        channel
            .handle_incoming_message(&message_event("ni hao").to_string())
            .await
            .unwrap();

        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.channel, "feishu");
        assert_eq!(msg.sender_id, "ou_alice");
        assert_eq!(msg.chat_id, "oc_chat9");
        assert_eq!(msg.content, "ni hao");
    }

    #[tokio::test]
    async fn challenge_body_is_noop() {
        let bus = Arc::new(MessageBus::new(10));
        let channel = make_channel(bus.clone(), vec![]);

        channel
            .handle_incoming_message(&json!({"challenge": "abc123"}).to_string())
            .await
            .unwrap();

        bus.publish_inbound(tinyclaw_core::bus::InboundMessage::new("x", "y", "z", "marker"));
        assert_eq!(bus.consume_inbound().await.unwrap().content, "marker");
    }

    #[tokio::test]
    async fn non_text_message_ignored() {
        let bus = Arc::new(MessageBus::new(10));
        let channel = make_channel(bus.clone(), vec![]);

        let mut event = message_event("x");
        event["event"]["message"]["message_type"] = json!("image");
        channel
            .handle_incoming_message(&event.to_string())
            .await
            .unwrap();

        bus.publish_inbound(tinyclaw_core::bus::InboundMessage::new("x", "y", "z", "marker"));
        assert_eq!(bus.consume_inbound().await.unwrap().content, "marker");
    }

    #[tokio::test]
    async fn invalid_body_is_error() {
        let bus = Arc::new(MessageBus::new(10));
        let channel = make_channel(bus, vec![]);
        assert!(channel.handle_incoming_message("{ nope").await.is_err());
    }

    #[tokio::test]
    async fn unauthorized_sender_dropped() {
        let bus = Arc::new(MessageBus::new(10));
        let channel = make_channel(bus.clone(), vec!["ou_bob".to_string()]);

        channel
            .handle_incoming_message(&message_event("hi").to_string())
            .await
            .unwrap();

        bus.publish_inbound(tinyclaw_core::bus::InboundMessage::new("x", "y", "z", "marker"));
        assert_eq!(bus.consume_inbound().await.unwrap().content, "marker");
    }
}
