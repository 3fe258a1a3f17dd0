//! The `Channel` capability every transport adapter implements, plus the
//! shared inbound path and message chunking helper.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use tinyclaw_core::bus::{InboundMessage, MessageBus, OutboundMessage};

/// A chat transport adapter.
///
/// The manager holds adapters as `Arc<dyn Channel>` keyed by `name()`, so
/// the core stays transport-agnostic.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name; must match config keys and `OutboundMessage.channel`.
    fn name(&self) -> &str;

    /// Start listening. Long-running; returns when the channel stops.
    async fn start(&self) -> anyhow::Result<()>;

    /// Graceful shutdown.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Whether the adapter's workers are currently up.
    fn is_running(&self) -> bool;

    /// Per-channel sender allow-list. An empty list allows everyone.
    fn is_allowed(&self, sender_id: &str) -> bool;

    /// Deliver an outbound message on this transport.
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;

    /// Push-style channels accept raw webhook bodies here; pull-style
    /// channels have nothing to handle.
    async fn handle_incoming_message(&self, _raw: &str) -> anyhow::Result<()> {
        anyhow::bail!("channel '{}' does not accept pushed messages", self.name())
    }
}

/// Check a sender id against an allow-list.
///
/// Ids may carry alternates as `id|username`; a match on any part passes.
/// Empty list = allow everyone.
pub fn sender_allowed(allowed: &[String], sender_id: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }
    if allowed.iter().any(|a| a == sender_id) {
        return true;
    }
    sender_id
        .split('|')
        .any(|part| !part.is_empty() && allowed.iter().any(|a| a == part))
}

/// The one inbound path every adapter funnels through: allow-list check,
/// session key derivation, bus publish. Unauthorized senders are silently
/// dropped with a log line; a full queue likewise only logs.
pub fn forward_inbound(
    bus: &MessageBus,
    channel: &dyn Channel,
    sender_id: &str,
    chat_id: &str,
    content: String,
    metadata: HashMap<String, String>,
) {
    if !channel.is_allowed(sender_id) {
        warn!(
            channel = channel.name(),
            sender = sender_id,
            "dropping message from unauthorized sender"
        );
        return;
    }

    let mut msg = InboundMessage::new(channel.name(), sender_id, chat_id, content);
    msg.metadata = metadata;
    debug!(
        channel = channel.name(),
        session = %msg.session_key(),
        "inbound message"
    );
    bus.publish_inbound(msg);
}

/// Split `text` into chunks of at most `limit` characters, preferring to
/// break on newlines, then spaces. Transports with hard message-size caps
/// (Telegram 4096, Discord 2000) send each chunk separately.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || text.is_empty() {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > limit {
        let hard_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..hard_end];

        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(hard_end);

        chunks.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
