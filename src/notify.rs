use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for LISTEN/NOTIFY per room.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
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

    /// Subscribe to changes on a room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, room_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when the room is deleted). Open receivers see the channel close.
    pub fn remove(&self, room_id: &Ulid) {
        self.channels.remove(room_id);
    }
}
