//! DingTalk channel — push-style.
//!
//! Inbound robot callbacks arrive through the webhook receiver. Each
//! callback carries a short-lived `sessionWebhook` URL; we remember the
//! most recent one per conversation and reply through it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use tinyclaw_core::bus::{MessageBus, OutboundMessage};

use crate::base::{forward_inbound, sender_allowed, Channel};

pub struct DingTalkChannel {
    #[allow(dead_code)]
    client_id: String,
    #[allow(dead_code)]
    client_secret: String,
    bus: Arc<MessageBus>,
    allowed_senders: Vec<String>,
    client: reqwest::Client,
    /// conversationId → latest sessionWebhook URL.
    session_webhooks: RwLock<HashMap<String, String>>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
}

impl DingTalkChannel {
    pub fn new(
        client_id: String,
        client_secret: String,
        bus: Arc<MessageBus>,
        allowed_senders: Vec<String>,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            bus,
            allowed_senders,
            client: reqwest::Client::new(),
            session_webhooks: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Channel for DingTalkChannel {
    fn name(&self) -> &str {
        "dingtalk"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("dingtalk channel ready (webhook-fed)");
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
        let webhook = msg
            .metadata
            .get("sessionWebhook")
            .cloned()
            .or_else(|| {
                self.session_webhooks
                    .read()
                    .unwrap()
                    .get(&msg.chat_id)
                    .cloned()
            })
            .ok_or_else(|| {
                anyhow::anyhow!("no session webhook known for conversation {}", msg.chat_id)
            })?;

        let response = self
            .client
            .post(&webhook)
            .json(&json!({
                "msgtype": "text",
                "text": {"content": msg.content},
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(status = %status, "dingtalk send failed");
            anyhow::bail!("dingtalk webhook returned {status}");
        }
        Ok(())
    }

    async fn handle_incoming_message(&self, raw: &str) -> anyhow::Result<()> {
        let body: Value = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("invalid dingtalk callback body: {e}"))?;

        let Some(text) = body["text"]["content"].as_str().map(str::trim) else {
            debug!("ignoring dingtalk callback without text");
            return Ok(());
        };
        if text.is_empty() {
            return Ok(());
        }

        let sender_id = body["senderStaffId"]
            .as_str()
            .or_else(|| body["senderId"].as_str())
            .unwrap_or("")
            .to_string();
        let conversation_id = body["conversationId"].as_str().unwrap_or("").to_string();
        if conversation_id.is_empty() {
            anyhow::bail!("dingtalk callback missing conversationId");
        }

        let mut metadata = HashMap::new();
        if let Some(webhook) = body["sessionWebhook"].as_str() {
            self.session_webhooks
                .write()
                .unwrap()
                .insert(conversation_id.clone(), webhook.to_string());
            metadata.insert("sessionWebhook".to_string(), webhook.to_string());
        }
        if let Some(nick) = body["senderNick"].as_str() {
            metadata.insert("senderNick".to_string(), nick.to_string());
        }

        forward_inbound(
            &self.bus,
            self,
            &sender_id,
            &conversation_id,
            text.to_string(),
            metadata,
        );
        Ok(())
    }
}
