use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{BookingEvent, ResourceId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for `booking-updated` events: one channel for everything and
/// one per resource.
pub struct NotifyHub {
    all: broadcast::Sender<BookingEvent>,
    channels: DashMap<ResourceId, broadcast::Sender<BookingEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            channels: DashMap::new(),
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<BookingEvent> {
        self.all.subscribe()
    }

    /// Subscribe to events for one resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: ResourceId) -> broadcast::Receiver<BookingEvent> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: BookingEvent) {
        if let Some(rid) = event.resource_id
            && let Some(sender) = self.channels.get(&rid)
        {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event);
    }

    /// Drop a resource's channel; its subscribers see the channel close.
    pub fn remove(&self, resource_id: &ResourceId) {
        self.channels.remove(resource_id);
    }
}
