//! Telegram channel — Bot API long polling over plain HTTPS.
//!
//! Inbound: `getUpdates` with a 30 s long-poll timeout, tracking the update
//! offset. Outbound: `sendMessage`, chunked to the 4096-character limit.
//! No SDK; the Bot API is a small JSON surface and `reqwest` covers it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use tinyclaw_core::bus::{MessageBus, OutboundMessage};

use crate::base::{forward_inbound, sender_allowed, split_message, Channel};

/// Telegram hard message-length cap.
const TELEGRAM_MAX_LEN: usize = 4096;

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Backoff after a failed poll.
const POLL_RETRY_SECS: u64 = 5;

pub struct TelegramChannel {
    token: String,
    bus: Arc<MessageBus>,
    allowed_senders: Vec<String>,
    client: reqwest::Client,
    offset: AtomicI64,
    running: AtomicBool,
    shutdown: Arc<Notify>,
}

impl TelegramChannel {
    pub fn new(token: String, bus: Arc<MessageBus>, allowed_senders: Vec<String>) -> Self {
        Self {
            token,
            bus,
            allowed_senders,
            client: reqwest::Client::new(),
            offset: AtomicI64::new(0),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.token)
    }

    async fn poll_once(&self) -> anyhow::Result<()> {
        let offset = self.offset.load(Ordering::SeqCst);
        let response: Value = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ("offset", offset.to_string()),
            ])
            .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .send()
            .await?
            .json()
            .await?;

        if !response["ok"].as_bool().unwrap_or(false) {
            anyhow::bail!("getUpdates returned ok=false: {response}");
        }

        for update in response["result"].as_array().cloned().unwrap_or_default() {
            if let Some(update_id) = update["update_id"].as_i64() {
                self.offset.store(update_id + 1, Ordering::SeqCst);
            }
            self.handle_update(&update);
        }
        Ok(())
    }

    fn handle_update(&self, update: &Value) {
        let message = &update["message"];
        let Some(text) = message["text"].as_str() else {
            return;
        };
        let Some(chat_id) = message["chat"]["id"].as_i64() else {
            return;
        };
        let user_id = message["from"]["id"]
            .as_i64()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let username = message["from"]["username"].as_str().unwrap_or("");
        let sender_id = format!("{user_id}|{username}");

        let mut metadata = HashMap::new();
        if let Some(message_id) = message["message_id"].as_i64() {
            metadata.insert("message_id".to_string(), message_id.to_string());
        }

        forward_inbound(
            &self.bus,
            self,
            &sender_id,
            &chat_id.to_string(),
            text.to_string(),
            metadata,
        );
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("telegram channel starting (long polling)");
        self.running.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                result = self.poll_once() => {
                    if let Err(e) = result {
                        warn!(error = %e, "telegram poll failed, retrying in {POLL_RETRY_SECS}s");
                        tokio::select! {
                            _ = tokio::time::sleep(std::time::Duration::from_secs(POLL_RETRY_SECS)) => {}
                            _ = self.shutdown.notified() => break,
                        }
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("telegram channel stopped");
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
        for chunk in split_message(&msg.content, TELEGRAM_MAX_LEN) {
            debug!(chat_id = %msg.chat_id, bytes = chunk.len(), "telegram send");
            let response = self
                .client
                .post(self.api_url("sendMessage"))
                .json(&serde_json::json!({
                    "chat_id": msg.chat_id,
                    "text": chunk,
                }))
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "telegram send failed");
                anyhow::bail!("telegram sendMessage returned {status}");
            }
        }
        Ok(())
    }
}
