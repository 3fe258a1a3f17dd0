//! Bus event types — the messages flowing between channel adapters and the
//! agent loop. Immutable after publish; each is consumed exactly once.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// An inbound message from a channel adapter to the agent.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "telegram", "camera", "cli").
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier.
    pub chat_id: String,
    /// Text content.
    pub content: String,
    /// Local paths or URLs of attached media.
    pub media: Vec<String>,
    /// Channel-specific metadata (message ids, webhook reply URLs, …).
    pub metadata: HashMap<String, String>,
    /// When the adapter accepted the message.
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            media: Vec::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Session key for this conversation: `"{channel}:{chat_id}"`.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// An outbound message from the agent to a named channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Target channel name.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Text content to send.
    pub content: String,
    /// Channel-specific metadata.
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_session_key() {
        let msg = InboundMessage::new("discord", "user_1", "channel_abc", "test");
        assert_eq!(msg.session_key(), "discord:channel_abc");
    }

    #[test]
    fn inbound_defaults_empty_media_and_metadata() {
        let msg = InboundMessage::new("telegram", "user_42", "chat_99", "Hi");
        assert!(msg.media.is_empty());
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn outbound_construction() {
        let msg = OutboundMessage::new("telegram", "chat_99", "answer");
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.chat_id, "chat_99");
        assert_eq!(msg.content, "answer");
    }

    #[test]
    fn inbound_metadata_round_trip() {
        let mut msg = InboundMessage::new("dingtalk", "u1", "c1", "hi");
        msg.metadata
            .insert("sessionWebhook".into(), "https://example.com/hook".into());
        assert_eq!(
            msg.metadata.get("sessionWebhook").map(String::as_str),
            Some("https://example.com/hook")
        );
    }
}
