//! WhatsApp channel — WebSocket client talking to a Baileys-style bridge.
//!
//! A separate Node.js bridge process speaks the WhatsApp Web protocol; this
//! adapter connects to it as a WebSocket client. Inbound frames are
//! `{"type":"message","sender":...,"chat_id":...,"content":...}`; outbound
//! we write `{"type":"send","to":...,"text":...}`. The connection
//! reconnects with a fixed backoff until shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use tinyclaw_core::bus::{MessageBus, OutboundMessage};

use crate::base::{forward_inbound, sender_allowed, Channel};

const RECONNECT_DELAY_SECS: u64 = 5;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

pub struct WhatsAppChannel {
    bridge_url: String,
    bus: Arc<MessageBus>,
    allowed_senders: Vec<String>,
    writer: Arc<Mutex<Option<WsSink>>>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
}

impl WhatsAppChannel {
    pub fn new(bridge_url: String, bus: Arc<MessageBus>, allowed_senders: Vec<String>) -> Self {
        Self {
            bridge_url,
            bus,
            allowed_senders,
            writer: Arc::new(Mutex::new(None)),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// One bridge session; returns Ok on clean close.
    async fn bridge_session(&self) -> anyhow::Result<()> {
        debug!(url = %self.bridge_url, "connecting to whatsapp bridge");
        let (ws, _) = tokio_tungstenite::connect_async(&self.bridge_url).await?;
        info!("whatsapp bridge connected");

        let (write, mut read) = ws.split();
        *self.writer.lock().await = Some(write);

        loop {
            tokio::select! {
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(t))) => t.to_string(),
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                    };
                    self.handle_frame(&text);
                }
                _ = self.shutdown.notified() => {
                    anyhow::bail!("shutdown");
                }
            }
        }
    }

    fn handle_frame(&self, raw: &str) {
        let frame: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "bad bridge frame");
                return;
            }
        };

        match frame["type"].as_str() {
            Some("message") => {
                let sender = frame["sender"].as_str().unwrap_or("");
                let chat_id = frame["chat_id"].as_str().unwrap_or(sender);
                let Some(content) = frame["content"].as_str().filter(|c| !c.is_empty()) else {
                    return;
                };
                let mut metadata = HashMap::new();
                if let Some(push_name) = frame["push_name"].as_str() {
                    metadata.insert("push_name".to_string(), push_name.to_string());
                }
                forward_inbound(&self.bus, self, sender, chat_id, content.to_string(), metadata);
            }
            Some("status") => {
                debug!(status = %frame["connected"], "bridge status");
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("whatsapp channel starting");
        self.running.store(true, Ordering::SeqCst);

        loop {
            match self.bridge_session().await {
                Ok(()) => {
                    debug!("bridge session ended, reconnecting");
                }
                Err(e) if e.to_string() == "shutdown" => break,
                Err(e) => {
                    warn!(error = %e, "bridge error, reconnecting in {RECONNECT_DELAY_SECS}s");
                }
            }
            *self.writer.lock().await = None;
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("whatsapp channel stopped");
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
        let frame = json!({
            "type": "send",
            "to": msg.chat_id,
            "text": msg.content,
        })
        .to_string();

        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => {
                sink.send(WsMessage::Text(frame.into())).await?;
                Ok(())
            }
            None => anyhow::bail!("whatsapp bridge not connected"),
        }
    }
}
