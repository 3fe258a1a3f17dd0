//! Message bus — bounded inbound/outbound queues between channels and agent.

pub mod queue;
pub mod types;

pub use queue::{MessageBus, PublishOutcome, DEFAULT_QUEUE_CAPACITY};
pub use types::{InboundMessage, OutboundMessage};
