//! QQ channel — push-style, OneBot-flavoured.
//!
//! Inbound events arrive as webhook bodies; outbound messages go to the
//! configured bot HTTP endpoint (`send_private_msg` / `send_group_msg`).
//! Group chats are keyed `group:<id>`, private chats `private:<id>`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use tinyclaw_core::bus::{MessageBus, OutboundMessage};

use crate::base::{forward_inbound, sender_allowed, Channel};

pub struct QqChannel {
    api_url: String,
    access_token: String,
    bus: Arc<MessageBus>,
    allowed_senders: Vec<String>,
    client: reqwest::Client,
    running: AtomicBool,
    shutdown: Arc<Notify>,
}

impl QqChannel {
    pub fn new(
        api_url: String,
        access_token: String,
        bus: Arc<MessageBus>,
        allowed_senders: Vec<String>,
    ) -> Self {
        Self {
            api_url,
            access_token,
            bus,
            allowed_senders,
            client: reqwest::Client::new(),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Channel for QqChannel {
    fn name(&self) -> &str {
        "qq"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("qq channel ready (webhook-fed)");
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
        let (action, id_field, id) = match msg.chat_id.split_once(':') {
            Some(("group", id)) => ("send_group_msg", "group_id", id),
            Some(("private", id)) => ("send_private_msg", "user_id", id),
            _ => ("send_private_msg", "user_id", msg.chat_id.as_str()),
        };

        let url = format!("{}/{action}", self.api_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({
                id_field: id,
                "message": msg.content,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(status = %status, "qq send failed");
            anyhow::bail!("qq api returned {status}");
        }
        Ok(())
    }

    async fn handle_incoming_message(&self, raw: &str) -> anyhow::Result<()> {
        let body: Value = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("invalid qq event body: {e}"))?;

        if body["post_type"].as_str() != Some("message") {
            debug!("ignoring qq non-message event");
            return Ok(());
        }

        let text = body["raw_message"]
            .as_str()
            .or_else(|| body["message"].as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if text.is_empty() {
            return Ok(());
        }

        let user_id = body["user_id"]
            .as_i64()
            .map(|id| id.to_string())
            .or_else(|| body["user_id"].as_str().map(str::to_string))
            .unwrap_or_default();

        let chat_id = match body["message_type"].as_str() {
            Some("group") => {
                let group = body["group_id"]
                    .as_i64()
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                format!("group:{group}")
            }
            _ => format!("private:{user_id}"),
        };

        let mut metadata = HashMap::new();
        if let Some(message_id) = body["message_id"].as_i64() {
            metadata.insert("message_id".to_string(), message_id.to_string());
        }

        forward_inbound(&self.bus, self, &user_id, &chat_id, text, metadata);
        Ok(())
    }
}
