//! Fan-out of messages to registered clients.

use crate::connection::ConnectionId;
use crate::protocol::ChatMessage;
use crate::registry::{ClientRegistry, RegistryState};
use bytes::Bytes;
use tracing::{debug, trace};

pub const WELCOME: &str = "Connected to chat. Welcome!";
pub const SERVER_FULL: &str = "Server full. Try again later.";
pub const SHUTTING_DOWN: &str = "Server is shutting down";

pub fn arrival_notice(username: &str) -> ChatMessage {
    ChatMessage::notification(&format!("[User {username} connected]"))
}

pub fn departure_notice(username: &str) -> ChatMessage {
    ChatMessage::notification(&format!("[User {username} disconnected]"))
}

impl ClientRegistry {
    /// Deliver `msg` to every active client except `exclude`.
    ///
    /// The message is encoded once. Delivery means the frame was queued on the
    /// client's mailbox. A client whose writer is gone or whose mailbox is
    /// full is deactivated on the spot and its worker cancelled; its handler
    /// reaps the slot. Returns the number of clients
    /// the frame was queued for.
    pub fn broadcast(&self, msg: &ChatMessage, exclude: Option<ConnectionId>) -> usize {
        let frame = msg.encode();
        let delivered = self.lock().fan_out(&frame, exclude);
        trace!(kind = %msg.kind(), delivered, "Broadcast");
        delivered
    }

    /// Ids of the clients a broadcast would currently target.
    pub fn broadcast_targets(&self, exclude: Option<ConnectionId>) -> Vec<ConnectionId> {
        self.lock()
            .slots
            .iter()
            .map(|(_, record)| record)
            .filter(|record| record.active && Some(record.connection.id()) != exclude)
            .map(|record| record.connection.id())
            .collect()
    }
}

impl RegistryState {
    /// Queue `frame` for every active record except `exclude`. Caller holds
    /// the registry lock.
    pub(crate) fn fan_out(&mut self, frame: &Bytes, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;

        for (slot, record) in self.slots.iter_mut() {
            let id = record.connection.id();
            if !record.active || Some(id) == exclude {
                continue;
            }
            if record.connection.send(frame.clone()) {
                delivered += 1;
            } else {
                record.active = false;
                self.count -= 1;
                record.worker.cancel();
                debug!(conn_id = %id, slot, username = %record.username, "Deactivated unreachable client");
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MAILBOX_CAPACITY;
    use crate::registry::tests::TestClient;

    #[test]
    fn test_broadcast_excludes_sender() {
        let registry = ClientRegistry::new(4);
        let mut a = TestClient::new(1);
        let mut b = TestClient::new(2);
        let mut c = TestClient::new(3);
        a.register(&registry, "a").unwrap();
        b.register(&registry, "b").unwrap();
        c.register(&registry, "c").unwrap();

        let msg = ChatMessage::chat("a", "hello");
        assert_eq!(registry.broadcast(&msg, Some(a.id)), 2);
        assert_eq!(registry.broadcast_targets(Some(a.id)), vec![b.id, c.id]);

        assert!(a.received().is_empty());
        assert_eq!(b.received(), vec![msg.clone()]);
        assert_eq!(c.received(), vec![msg]);
    }

    #[test]
    fn test_broadcast_to_all() {
        let registry = ClientRegistry::new(4);
        let mut a = TestClient::new(1);
        let mut b = TestClient::new(2);
        a.register(&registry, "a").unwrap();
        b.register(&registry, "b").unwrap();

        let msg = ChatMessage::chat("a", "echo");
        assert_eq!(registry.broadcast(&msg, None), 2);
        assert_eq!(a.received().len(), 1);
        assert_eq!(b.received().len(), 1);
    }

    #[test]
    fn test_failed_delivery_deactivates() {
        let registry = ClientRegistry::new(4);
        let mut a = TestClient::new(1);
        let b = TestClient::new(2);
        a.register(&registry, "a").unwrap();
        b.register(&registry, "b").unwrap();

        let TestClient { id: b_id, mailbox, .. } = b;
        drop(mailbox);

        let msg = ChatMessage::chat("a", "anyone?");
        assert_eq!(registry.broadcast(&msg, None), 1);
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.occupied(), 2);
        assert!(!registry.is_active(b_id));
        assert_eq!(registry.broadcast_targets(None), vec![a.id]);

        // Deactivation is silent; the departure notice comes from remove.
        assert_eq!(a.received(), vec![msg]);
        assert!(matches!(
            registry.remove(b_id),
            crate::registry::Removal::Removed {
                notified: Some(1),
                ..
            }
        ));
        assert_eq!(a.received()[0].body(), "[User b disconnected]");
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.occupied(), 1);
    }

    #[test]
    fn test_stalled_client_deactivated() {
        let registry = ClientRegistry::new(4);
        let mut reader = TestClient::new(1);
        let stalled = TestClient::new(2);
        reader.register(&registry, "reader").unwrap();
        stalled.register(&registry, "stalled").unwrap();

        let msg = ChatMessage::chat("reader", "spam");
        for _ in 0..MAILBOX_CAPACITY {
            assert_eq!(registry.broadcast(&msg, None), 2);
            assert_eq!(reader.received().len(), 1);
        }
        assert!(!stalled.worker.is_cancelled());

        // The stalled mailbox is full now.
        assert_eq!(registry.broadcast(&msg, None), 1);
        assert!(!registry.is_active(stalled.id));
        assert!(stalled.worker.is_cancelled());
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.occupied(), 2);

        for _ in 0..10 {
            assert_eq!(registry.broadcast(&msg, None), 1);
        }
        assert_eq!(reader.received().len(), 11);
        assert!(matches!(
            registry.remove(stalled.id),
            crate::registry::Removal::Removed {
                notified: Some(1),
                ..
            }
        ));
        assert_eq!(registry.occupied(), 1);
    }

    #[test]
    fn test_broadcast_empty_registry() {
        let registry = ClientRegistry::new(4);
        assert_eq!(registry.broadcast(&ChatMessage::notification("hi"), None), 0);
    }
}
