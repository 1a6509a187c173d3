use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Appointment, Party};

const CHANNEL_CAPACITY: usize = 256;

/// Private channel of one user.
pub fn user_channel(user_id: Ulid) -> String {
    format!("user_{user_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorSnapshot {
    pub user_id: Ulid,
    pub party: Party,
}

/// Published to the client and to the provider's owning user after every
/// successful status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusNotification {
    pub appointment: Appointment,
    pub actor: ActorSnapshot,
}

impl StatusNotification {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Outbound transport for status notifications.
pub trait Notifier: Send + Sync {
    fn publish(&self, channel: &str, payload: &StatusNotification);
}

/// In-process broadcast hub, one channel per user.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<StatusNotification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a channel. Creates the channel if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<StatusNotification> {
        let sender = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }
}

impl Notifier for NotifyHub {
    /// No-op if nobody is listening. A channel whose receivers are all
    /// gone is dropped here.
    fn publish(&self, channel: &str, payload: &StatusNotification) {
        metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL).increment(1);
        let idle = match self.channels.get(channel) {
            Some(sender) => {
                let _ = sender.send(payload.clone());
                sender.receiver_count() == 0
            }
            None => false,
        };
        // Re-checked under the shard lock; subscribe may have raced in.
        if idle {
            self.channels
                .remove_if(channel, |_, sender| sender.receiver_count() == 0);
        }
    }
}
