//! Camera-device channel — line-delimited JSON over a local TCP socket.
//!
//! Cameras connect to the configured port and push event frames like
//! `{"device_id":"porch","event":"motion","detail":"person detected"}`,
//! one JSON object per line. Each device is its own chat; replies are
//! written back on the device's connection as `{"type":"say","text":...}`
//! lines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use tinyclaw_core::bus::{MessageBus, OutboundMessage};

use crate::base::{sender_allowed, Channel};

pub struct CameraChannel {
    bind_host: String,
    bind_port: u16,
    bus: Arc<MessageBus>,
    allowed_senders: Vec<String>,
    /// device_id → write half of its active connection.
    connections: Arc<Mutex<HashMap<String, OwnedWriteHalf>>>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
}

impl CameraChannel {
    pub fn new(
        bind_host: String,
        bind_port: u16,
        bus: Arc<MessageBus>,
        allowed_senders: Vec<String>,
    ) -> Self {
        Self {
            bind_host,
            bind_port,
            bus,
            allowed_senders,
            connections: Arc::new(Mutex::new(HashMap::new())),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Channel for CameraChannel {
    fn name(&self) -> &str {
        "camera"
    }

    async fn start(&self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.bind_host, self.bind_port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, "camera channel listening");
        self.running.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let channel = CameraRunner {
                                bus: self.bus.clone(),
                                allowed_senders: self.allowed_senders.clone(),
                                connections: self.connections.clone(),
                                shutdown: self.shutdown.clone(),
                            };
                            tokio::spawn(channel.pump_connection(stream));
                        }
                        Err(e) => {
                            warn!(error = %e, "camera accept failed");
                        }
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("camera channel stopped");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.notify_waiters();
        self.connections.lock().await.clear();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        sender_allowed(&self.allowed_senders, sender_id)
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let frame = json!({"type": "say", "text": msg.content}).to_string();
        let mut connections = self.connections.lock().await;
        match connections.get_mut(&msg.chat_id) {
            Some(writer) => {
                writer.write_all(frame.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                Ok(())
            }
            None => anyhow::bail!("camera '{}' is not connected", msg.chat_id),
        }
    }
}

/// Per-connection worker state, detached from the channel's lifetime.
struct CameraRunner {
    bus: Arc<MessageBus>,
    allowed_senders: Vec<String>,
    connections: Arc<Mutex<HashMap<String, OwnedWriteHalf>>>,
    shutdown: Arc<Notify>,
}

impl CameraRunner {
    async fn pump_connection(self, stream: tokio::net::TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half).lines();
        let mut write_half = Some(write_half);
        let mut device: Option<String> = None;

        loop {
            tokio::select! {
                line = reader.next_line() => {
                    let line = match line {
                        Ok(Some(l)) => l,
                        Ok(None) | Err(_) => break,
                    };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Some(id) = self.decode_and_forward(trimmed) {
                        if device.is_none() {
                            device = Some(id.clone());
                            if let Some(writer) = write_half.take() {
                                self.connections.lock().await.insert(id, writer);
                            }
                        }
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }

        if let Some(id) = device {
            self.connections.lock().await.remove(&id);
            debug!(device = %id, "camera disconnected");
        }
    }

    fn decode_and_forward(&self, line: &str) -> Option<String> {
        let frame: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "bad camera frame");
                return None;
            }
        };
        let device_id = frame["device_id"].as_str()?.to_string();
        if !sender_allowed(&self.allowed_senders, &device_id) {
            warn!(device = %device_id, "dropping event from unauthorized camera");
            return Some(device_id);
        }
        let event = frame["event"].as_str().unwrap_or("event");
        let detail = frame["detail"].as_str().unwrap_or("");

        let content = if detail.is_empty() {
            format!("Camera '{device_id}' reported: {event}")
        } else {
            format!("Camera '{device_id}' reported: {event} — {detail}")
        };

        let mut msg =
            tinyclaw_core::bus::InboundMessage::new("camera", &device_id, &device_id, content);
        msg.metadata.insert("event".to_string(), event.to_string());
        self.bus.publish_inbound(msg);
        Some(device_id)
    }
}
