//! # Live Tail Registry
//!
//! Owns every live-tail listener. Each listener carries a compiled filter
//! expression, a bounded packet queue and a quit signal. Captured packets
//! are fanned out by [`ListenerRegistry::broadcast`]; dropping a listener
//! from the registry fires its quit signal.

use cs_core::PacketRecord;
use regex::Regex;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Filter expression of a live-tail subscription.
#[derive(Debug, Clone)]
pub struct PacketMatcher {
    pattern: Option<Regex>,
}

impl PacketMatcher {
    /// An empty expression matches everything. Anything that is not a valid
    /// regex is matched literally.
    pub fn new(expr: &str) -> Self {
        let expr = expr.trim();
        if expr.is_empty() {
            return Self { pattern: None };
        }
        let pattern = Regex::new(expr).or_else(|_| Regex::new(&regex::escape(expr)));
        Self {
            pattern: pattern.ok(),
        }
    }

    pub fn matches(&self, packet: &PacketRecord) -> bool {
        let Some(re) = &self.pattern else {
            return true;
        };
        [
            &packet.call_id,
            &packet.call_id_a_leg,
            &packet.from_user,
            &packet.to_user,
            &packet.source_ip,
            &packet.destination_ip,
            &packet.message,
        ]
        .iter()
        .any(|value| re.is_match(value))
    }
}

struct Listener {
    matcher: PacketMatcher,
    tx: mpsc::Sender<PacketRecord>,
    // Dropped on removal, which resolves the subscriber's quit receiver.
    _quit: oneshot::Sender<()>,
}

/// The subscriber half of a listener.
pub struct Subscription {
    pub id: Uuid,
    pub packets: mpsc::Receiver<PacketRecord>,
    pub quit: oneshot::Receiver<()>,
}

pub struct ListenerRegistry {
    listeners: RwLock<HashMap<Uuid, Listener>>,
    capacity: usize,
}

impl ListenerRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn register(&self, expr: &str) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, packets) = mpsc::channel(self.capacity);
        let (quit_tx, quit) = oneshot::channel();

        self.listeners.write().await.insert(
            id,
            Listener {
                matcher: PacketMatcher::new(expr),
                tx,
                _quit: quit_tx,
            },
        );
        tracing::info!(%id, filter = expr, "live listener registered");

        Subscription { id, packets, quit }
    }

    /// Remove a listener, firing its quit signal. Returns whether it existed.
    pub async fn unregister(&self, id: Uuid) -> bool {
        let removed = self.listeners.write().await.remove(&id).is_some();
        if removed {
            tracing::info!(%id, "live listener removed");
        }
        removed
    }

    /// Deliver a packet to every matching listener without waiting.
    /// Returns the number of listeners it was queued for.
    pub async fn broadcast(&self, packet: &PacketRecord) -> usize {
        let listeners = self.listeners.read().await;
        let mut delivered = 0;
        for (id, listener) in listeners.iter() {
            if !listener.matcher.matches(packet) {
                continue;
            }
            match listener.tx.try_send(packet.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(%id, "live listener queue full, dropping packet");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(%id, "live listener already closed");
                }
            }
        }
        delivered
    }

    /// Quit every listener.
    pub async fn close_all(&self) {
        let mut listeners = self.listeners.write().await;
        let count = listeners.len();
        listeners.clear();
        if count > 0 {
            tracing::info!(count, "closed all live listeners");
        }
    }

    pub async fn len(&self) -> usize {
        self.listeners.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn packet(call_id: &str, message: &str) -> PacketRecord {
        PacketRecord {
            call_id: call_id.into(),
            call_id_a_leg: String::new(),
            source_ip: "10.0.0.1".into(),
            source_port: 5060,
            destination_ip: "10.0.0.2".into(),
            destination_port: 5060,
            from_user: "alice".into(),
            to_user: "bob".into(),
            date_time: Utc.timestamp_opt(0, 0).unwrap(),
            microseconds: 0,
            message: message.into(),
        }
    }

    #[test]
    fn test_matcher() {
        assert!(PacketMatcher::new("").matches(&packet("a", "INVITE")));
        assert!(PacketMatcher::new("^INV").matches(&packet("a", "INVITE")));
        assert!(PacketMatcher::new("10\\.0\\.0\\.2").matches(&packet("a", "BYE")));
        assert!(!PacketMatcher::new("REGISTER").matches(&packet("a", "INVITE")));
        // invalid regex falls back to a literal match
        assert!(PacketMatcher::new("a(").matches(&packet("call-a(", "BYE")));
        assert!(!PacketMatcher::new("a(").matches(&packet("call-a", "BYE")));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_matching_listeners_only() {
        let registry = ListenerRegistry::new(8);
        let mut invites = registry.register("INVITE").await;
        let mut all = registry.register("").await;

        assert_eq!(registry.broadcast(&packet("a", "INVITE sip:bob")).await, 2);
        assert_eq!(registry.broadcast(&packet("b", "BYE sip:bob")).await, 1);

        assert_eq!(invites.packets.recv().await.unwrap().call_id, "a");
        assert!(invites.packets.try_recv().is_err());

        assert_eq!(all.packets.recv().await.unwrap().call_id, "a");
        assert_eq!(all.packets.recv().await.unwrap().call_id, "b");
    }

    #[tokio::test]
    async fn test_full_queue_drops_packets() {
        let registry = ListenerRegistry::new(1);
        let mut sub = registry.register("").await;

        assert_eq!(registry.broadcast(&packet("a", "INVITE")).await, 1);
        assert_eq!(registry.broadcast(&packet("b", "INVITE")).await, 0);
        assert_eq!(sub.packets.recv().await.unwrap().call_id, "a");
    }

    #[tokio::test]
    async fn test_unregister_fires_quit() {
        let registry = ListenerRegistry::new(8);
        let mut sub = registry.register("").await;
        assert_eq!(registry.len().await, 1);

        assert!(registry.unregister(sub.id).await);
        assert!(!registry.unregister(sub.id).await);
        assert_eq!(registry.len().await, 0);

        // sender dropped: quit resolves and the packet queue closes
        assert!((&mut sub.quit).await.is_err());
        assert!(sub.packets.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ListenerRegistry::new(8);
        let a = registry.register("").await;
        let b = registry.register("INVITE").await;

        registry.close_all().await;
        assert_eq!(registry.len().await, 0);
        assert!(a.quit.await.is_err());
        assert!(b.quit.await.is_err());
    }
}
