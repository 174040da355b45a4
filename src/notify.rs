use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, one channel per therapist.
/// Feeds the server-sent event stream so clients re-fetch instead of polling.
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

    /// Subscribe to a therapist's events. Creates the channel if needed.
    pub fn subscribe(&self, therapist_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(therapist_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, therapist_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&therapist_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a therapist's channel; open subscribers see the stream end.
    pub fn remove(&self, therapist_id: &Ulid) {
        self.channels.remove(therapist_id);
    }

    /// Drop every channel, ending all open streams.
    pub fn close_all(&self) {
        self.channels.clear();
    }
}
