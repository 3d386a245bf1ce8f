use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::types::{now_ms, EventEnvelope, GameEvent};

/// Publish/subscribe broadcaster keyed by channel name
/// (`game:<gameId>:<userId>`). Delivery is best-effort, at-most-once: events
/// published while nobody is subscribed are dropped, and a subscriber that
/// lags past the channel capacity loses the oldest events.
///
/// Purely observational — the bus never mutates game state.
pub struct EventBus {
    channels: DashMap<String, broadcast::Sender<EventEnvelope>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: DashMap::new(),
        })
    }

    /// Best-effort delivery to all current subscribers of `channel`.
    /// Channels with no remaining subscribers are garbage-collected here.
    pub fn publish(&self, channel: &str, event: GameEvent) {
        let envelope = EventEnvelope {
            channel: channel.to_string(),
            time: now_ms(),
            event,
        };

        if let Some(tx) = self.channels.get(channel) {
            if tx.receiver_count() > 0 {
                let _ = tx.send(envelope);
                return;
            }
        }

        debug!(channel, "event dropped: no subscribers");
        self.channels.remove_if(channel, |_, tx| tx.receiver_count() == 0);
    }

    /// Register for future events on `channel`. Dropping the receiver
    /// unsubscribes without affecting other subscribers of the same
    /// channel.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<EventEnvelope> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Number of live channels — diagnostics only.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
