//! Discord channel — gateway WebSocket for inbound, REST for outbound.
//!
//! The gateway session follows the standard handshake: HELLO (op 10) gives
//! the heartbeat interval, we IDENTIFY (op 2) with message intents, then
//! consume MESSAGE_CREATE dispatches. The connection reconnects with a
//! fixed backoff. Outbound goes through `POST /channels/{id}/messages`,
//! chunked to the 2000-character limit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use tinyclaw_core::bus::{MessageBus, OutboundMessage};

use crate::base::{forward_inbound, sender_allowed, split_message, Channel};

/// Discord hard message-length cap.
const DISCORD_MAX_LEN: usize = 2000;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const API_BASE: &str = "https://discord.com/api/v10";

/// GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const INTENTS: u64 = (1 << 9) | (1 << 12) | (1 << 15);

const RECONNECT_DELAY_SECS: u64 = 5;

pub struct DiscordChannel {
    token: String,
    bus: Arc<MessageBus>,
    allowed_senders: Vec<String>,
    client: reqwest::Client,
    running: AtomicBool,
    shutdown: Arc<Notify>,
}

impl DiscordChannel {
    pub fn new(token: String, bus: Arc<MessageBus>, allowed_senders: Vec<String>) -> Self {
        Self {
            token,
            bus,
            allowed_senders,
            client: reqwest::Client::new(),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// One gateway session: handshake, heartbeats, dispatch loop.
    async fn gateway_session(&self) -> anyhow::Result<()> {
        debug!("connecting to discord gateway");
        let (ws, _) = tokio_tungstenite::connect_async(GATEWAY_URL).await?;
        let (mut write, mut read) = ws.split();

        // HELLO carries the heartbeat interval.
        let hello = match read.next().await {
            Some(Ok(WsMessage::Text(text))) => serde_json::from_str::<Value>(&text)?,
            other => anyhow::bail!("expected HELLO frame, got {other:?}"),
        };
        let heartbeat_ms = hello["d"]["heartbeat_interval"].as_u64().unwrap_or(41_250);

        write
            .send(WsMessage::Text(
                json!({
                    "op": 2,
                    "d": {
                        "token": self.token,
                        "intents": INTENTS,
                        "properties": {"os": "linux", "browser": "tinyclaw", "device": "tinyclaw"}
                    }
                })
                .to_string()
                .into(),
            ))
            .await?;
        info!("discord gateway identified");

        let mut heartbeat = tokio::time::interval(std::time::Duration::from_millis(heartbeat_ms));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_sequence: Option<i64> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let frame = json!({"op": 1, "d": last_sequence}).to_string();
                    write.send(WsMessage::Text(frame.into())).await?;
                }
                frame = read.next() => {
                    let frame = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(_))) | None => {
                            debug!("discord gateway closed");
                            return Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                    };
                    let payload: Value = match serde_json::from_str(&frame) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "bad gateway frame");
                            continue;
                        }
                    };
                    if let Some(seq) = payload["s"].as_i64() {
                        last_sequence = Some(seq);
                    }
                    match payload["op"].as_u64() {
                        // Dispatch
                        Some(0) if payload["t"] == "MESSAGE_CREATE" => {
                            self.handle_message_create(&payload["d"]);
                        }
                        // Reconnect request
                        Some(7) => {
                            debug!("discord requested reconnect");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                _ = self.shutdown.notified() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    anyhow::bail!("shutdown");
                }
            }
        }
    }

    fn handle_message_create(&self, data: &Value) {
        // Ignore our own and other bots' messages.
        if data["author"]["bot"].as_bool().unwrap_or(false) {
            return;
        }
        let Some(content) = data["content"].as_str().filter(|c| !c.is_empty()) else {
            return;
        };
        let Some(channel_id) = data["channel_id"].as_str() else {
            return;
        };
        let user_id = data["author"]["id"].as_str().unwrap_or("");
        let username = data["author"]["username"].as_str().unwrap_or("");
        let sender_id = format!("{user_id}|{username}");

        let mut metadata = HashMap::new();
        if let Some(message_id) = data["id"].as_str() {
            metadata.insert("message_id".to_string(), message_id.to_string());
        }

        forward_inbound(
            &self.bus,
            self,
            &sender_id,
            channel_id,
            content.to_string(),
            metadata,
        );
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("discord channel starting");
        self.running.store(true, Ordering::SeqCst);

        loop {
            match self.gateway_session().await {
                Ok(()) => {
                    debug!("discord session ended, reconnecting");
                }
                Err(e) if e.to_string() == "shutdown" => break,
                Err(e) => {
                    warn!(error = %e, "discord gateway error, reconnecting in {RECONNECT_DELAY_SECS}s");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("discord channel stopped");
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
        for chunk in split_message(&msg.content, DISCORD_MAX_LEN) {
            let url = format!("{API_BASE}/channels/{}/messages", msg.chat_id);
            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bot {}", self.token))
                .json(&json!({"content": chunk}))
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "discord send failed");
                anyhow::bail!("discord message create returned {status}");
            }
        }
        Ok(())
    }
}
