use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-session change notifications. The engine
/// publishes after every successful commit; the storage collaborator's
/// own push updates (if any) never pass through here.
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

    /// Subscribe to notifications for a session. Creates the channel if needed.
    pub fn subscribe(&self, session_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&event.session_id()) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a session is deleted or purged).
    pub fn remove(&self, session_id: &Ulid) {
        self.channels.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let id = Ulid::new();
        let mut rx = hub.subscribe(id);

        let event = Event::BookingAdded {
            session_id: id,
            position: 0,
        };
        hub.send(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&Event::SessionDeleted { id: Ulid::new() });
    }

    #[tokio::test]
    async fn events_are_routed_per_session() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.send(&Event::SessionUpdated { id: b });
        hub.send(&Event::SessionUpdated { id: a });

        assert_eq!(rx_a.recv().await.unwrap(), Event::SessionUpdated { id: a });
        assert!(rx_a.try_recv().is_err()); // nothing else for a
    }
}
