//! Channel manager — transport lifecycle plus the outbound dispatch worker.
//!
//! Channels are registered by name. `start_all` launches every channel task
//! and a single dispatch worker that drains the bus outbound queue and
//! routes each message to the channel it names. Failures stay isolated: a
//! channel that fails to start, stop, or send only produces log lines.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use tinyclaw_core::bus::MessageBus;

use crate::base::Channel;

/// Owns all transports and routes outbound traffic to them.
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
    bus: Arc<MessageBus>,
    shutdown: Arc<Notify>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            channels: HashMap::new(),
            bus,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register a channel. Overwrites any previous channel with the name.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registered channel");
        self.channels.insert(name, channel);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    /// Registered channel names, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start every channel plus the dispatch worker, then block until
    /// shutdown is signalled.
    pub async fn start_all(&self) -> Result<()> {
        if self.channels.is_empty() {
            warn!("no channels registered");
        }

        info!(channels = ?self.channel_names(), "starting channels");

        for (name, channel) in &self.channels {
            let channel = channel.clone();
            let name = name.clone();
            tokio::spawn(async move {
                info!(channel = %name, "channel starting");
                if let Err(e) = channel.start().await {
                    error!(channel = %name, error = %e, "channel failed to start");
                }
                info!(channel = %name, "channel stopped");
            });
        }

        let bus = self.bus.clone();
        let channels = self.channels.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            Self::dispatch_outbound(bus, channels, shutdown).await;
        });

        self.shutdown.notified().await;
        info!("channel manager shutting down");
        Ok(())
    }

    /// Cancel the dispatch worker, then stop every channel. Per-channel
    /// stop errors are logged and do not block the others.
    pub async fn stop_all(&self) {
        self.shutdown.notify_waiters();
        for (name, channel) in &self.channels {
            debug!(channel = %name, "stopping channel");
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "channel stop failed");
            }
        }
        info!("all channels stopped");
    }

    /// The single outbound consumer: route each message to the channel it
    /// names; unknown names are logged and dropped.
    async fn dispatch_outbound(
        bus: Arc<MessageBus>,
        channels: HashMap<String, Arc<dyn Channel>>,
        shutdown: Arc<Notify>,
    ) {
        info!("outbound dispatch worker started");
        loop {
            tokio::select! {
                msg = bus.consume_outbound() => {
                    let Some(outbound) = msg else {
                        info!("outbound queue closed, dispatch worker exiting");
                        break;
                    };
                    debug!(
                        channel = %outbound.channel,
                        chat_id = %outbound.chat_id,
                        bytes = outbound.content.len(),
                        "dispatching outbound message"
                    );
                    match channels.get(&outbound.channel) {
                        Some(channel) => {
                            if let Err(e) = channel.send(&outbound).await {
                                error!(
                                    channel = %outbound.channel,
                                    error = %e,
                                    "send failed, message dropped"
                                );
                            }
                        }
                        None => {
                            warn!(
                                channel = %outbound.channel,
                                "no channel registered for outbound message"
                            );
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("dispatch worker received shutdown");
                    break;
                }
            }
        }
    }
}
