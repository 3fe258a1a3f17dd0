//! Bounded async message bus decoupling channel adapters from the agent loop.
//!
//! Two independent FIFO queues (inbound, outbound) with a non-blocking
//! publish side: when a queue is full the message is dropped with a warning.
//! That drop is the backpressure policy — producers never stall on a slow
//! consumer.

use super::types::{InboundMessage, OutboundMessage};
use tokio::sync::mpsc;
use tracing::warn;

/// Default queue capacity for both directions.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Result of a non-blocking publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    /// Queue at capacity; the message was discarded.
    Dropped,
}

impl PublishOutcome {
    pub fn is_dropped(self) -> bool {
        self == PublishOutcome::Dropped
    }
}

/// The message bus connecting channels and the agent loop.
///
/// Single-consumer model on each queue: the agent loop reads inbound, the
/// channel manager's dispatch worker reads outbound.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<OutboundMessage>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        MessageBus {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
        }
    }

    /// Offer a message to the inbound queue without blocking.
    pub fn publish_inbound(&self, msg: InboundMessage) -> PublishOutcome {
        match self.inbound_tx.try_send(msg) {
            Ok(()) => PublishOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    channel = %msg.channel,
                    chat_id = %msg.chat_id,
                    "inbound queue full, dropping message"
                );
                PublishOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("inbound queue closed, dropping message");
                PublishOutcome::Dropped
            }
        }
    }

    /// Next inbound message; blocks until one arrives.
    /// Returns `None` when all senders are gone (shutdown).
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Offer a message to the outbound queue without blocking.
    pub fn publish_outbound(&self, msg: OutboundMessage) -> PublishOutcome {
        match self.outbound_tx.try_send(msg) {
            Ok(()) => PublishOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    channel = %msg.channel,
                    chat_id = %msg.chat_id,
                    "outbound queue full, dropping message"
                );
                PublishOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("outbound queue closed, dropping message");
                PublishOutcome::Dropped
            }
        }
    }

    /// Next outbound message; blocks until one arrives.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inbound_flow() {
        let bus = MessageBus::new(10);
        let outcome = bus.publish_inbound(InboundMessage::new("telegram", "u1", "c1", "Hello!"));
        assert_eq!(outcome, PublishOutcome::Accepted);

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.channel, "telegram");
        assert_eq!(received.content, "Hello!");
    }

    #[tokio::test]
    async fn outbound_flow() {
        let bus = MessageBus::new(10);
        bus.publish_outbound(OutboundMessage::new("discord", "c42", "Response"));

        let received = bus.consume_outbound().await.unwrap();
        assert_eq!(received.channel, "discord");
        assert_eq!(received.content, "Response");
    }

    #[tokio::test]
    async fn fifo_order_single_producer() {
        let bus = MessageBus::new(10);
        for i in 1..=3 {
            bus.publish_inbound(InboundMessage::new("cli", "local", "direct", format!("msg-{i}")));
        }
        assert_eq!(bus.consume_inbound().await.unwrap().content, "msg-1");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "msg-2");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "msg-3");
    }

    #[tokio::test]
    async fn full_queue_drops_without_losing_existing() {
        let bus = MessageBus::new(3);
        for i in 0..3 {
            let outcome =
                bus.publish_inbound(InboundMessage::new("cli", "local", "direct", format!("m{i}")));
            assert_eq!(outcome, PublishOutcome::Accepted);
        }

        // Fourth publish exceeds capacity and is dropped.
        let outcome = bus.publish_inbound(InboundMessage::new("cli", "local", "direct", "extra"));
        assert!(outcome.is_dropped());

        // The three earlier messages survive, in order.
        for i in 0..3 {
            assert_eq!(bus.consume_inbound().await.unwrap().content, format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn multiple_producers() {
        let bus = std::sync::Arc::new(MessageBus::new(10));

        let b1 = bus.clone();
        let b2 = bus.clone();
        let h1 = tokio::spawn(async move {
            b1.publish_inbound(InboundMessage::new("telegram", "u1", "c1", "from telegram"));
        });
        let h2 = tokio::spawn(async move {
            b2.publish_inbound(InboundMessage::new("discord", "u2", "c2", "from discord"));
        });
        h1.await.unwrap();
        h2.await.unwrap();

        let r1 = bus.consume_inbound().await.unwrap();
        let r2 = bus.consume_inbound().await.unwrap();
        let channels = [r1.channel.as_str(), r2.channel.as_str()];
        assert!(channels.contains(&"telegram"));
        assert!(channels.contains(&"discord"));
    }

    #[tokio::test]
    async fn round_trip_through_both_queues() {
        let bus = MessageBus::new(10);

        bus.publish_inbound(InboundMessage::new("telegram", "user_42", "chat_99", "2+2?"));
        let inbound = bus.consume_inbound().await.unwrap();

        bus.publish_outbound(OutboundMessage::new(
            inbound.channel.clone(),
            inbound.chat_id.clone(),
            "4",
        ));
        let outbound = bus.consume_outbound().await.unwrap();
        assert_eq!(outbound.channel, "telegram");
        assert_eq!(outbound.chat_id, "chat_99");
        assert_eq!(outbound.content, "4");
    }
}
