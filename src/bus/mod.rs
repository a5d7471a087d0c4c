//! MessageBus (spec.md §4.B): pub/sub transport connecting `DeviceEndpoint`
//! and `ManagementEndpoint` instances, possibly across process instances.
//! Also carries the ephemeral presence registry as a TTL-bound key/value
//! record (spec.md §3 and §4.C) rather than a durable table, since presence
//! is allowed to be lost on restart.

pub mod nats;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RelayError;

/// Canonical subject names (spec.md §6).
pub fn device_subject(tenant_id: &str, device_id: &str) -> String {
    format!("device.{tenant_id}.{device_id}")
}

pub fn session_subject(session_id: &str) -> String {
    format!("session.{session_id}")
}

pub fn presence_subject(tenant_id: &str, device_id: &str) -> String {
    format!("presence.{tenant_id}.{device_id}")
}

/// A live inbound stream of published messages on one subject.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message, or `None` once the subscription is
    /// closed (unsubscribed or the bus connection dropped).
    async fn next(&mut self) -> Option<Bytes>;
}

/// A presence registration handle. Dropping it (or calling `release`)
/// relinquishes ownership of the presence record early instead of waiting
/// for the TTL to lapse.
#[async_trait]
pub trait PresenceHandle: Send {
    async fn renew(&mut self) -> Result<(), RelayError>;
    async fn release(self: Box<Self>) -> Result<(), RelayError>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RelayError>;

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, RelayError>;

    /// Registers presence for `subject`, failing with `RelayError::Conflict`
    /// if a live (unexpired) record already exists — this is what enforces
    /// the at-most-one-connected-instance invariant (spec.md §8).
    async fn presence_register(
        &self,
        subject: &str,
        owner: &str,
        ttl: std::time::Duration,
    ) -> Result<Box<dyn PresenceHandle>, RelayError>;

    /// Returns the current owner of `subject`'s presence record, if any
    /// unexpired record exists.
    async fn presence_lookup(&self, subject: &str) -> Result<Option<String>, RelayError>;
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct PresenceEntry {
        owner: String,
        expires_at: std::time::Instant,
    }

    #[derive(Default)]
    pub struct InMemoryBus {
        subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Bytes>>>>,
        presence: Mutex<HashMap<String, PresenceEntry>>,
    }

    impl InMemoryBus {
        pub fn new() -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self::default())
        }
    }

    pub struct FakeSubscription {
        rx: mpsc::UnboundedReceiver<Bytes>,
    }

    #[async_trait]
    impl Subscription for FakeSubscription {
        async fn next(&mut self) -> Option<Bytes> {
            self.rx.recv().await
        }
    }

    pub struct FakePresenceHandle {
        bus: std::sync::Arc<InMemoryBus>,
        subject: String,
        owner: String,
    }

    #[async_trait]
    impl PresenceHandle for FakePresenceHandle {
        async fn renew(&mut self) -> Result<(), RelayError> {
            let mut presence = self.bus.presence.lock().unwrap();
            if let Some(entry) = presence.get_mut(&self.subject) {
                if entry.owner == self.owner {
                    entry.expires_at = std::time::Instant::now() + std::time::Duration::from_secs(3600);
                    return Ok(());
                }
            }
            Err(RelayError::Conflict(format!("presence for {} no longer owned", self.subject)))
        }

        async fn release(self: Box<Self>) -> Result<(), RelayError> {
            let mut presence = self.bus.presence.lock().unwrap();
            if let Some(entry) = presence.get(&self.subject) {
                if entry.owner == self.owner {
                    presence.remove(&self.subject);
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MessageBus for std::sync::Arc<InMemoryBus> {
        async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RelayError> {
            let subscribers = self.subscribers.lock().unwrap();
            if let Some(senders) = subscribers.get(subject) {
                for tx in senders {
                    let _ = tx.send(payload.clone());
                }
            }
            Ok(())
        }

        async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, RelayError> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.lock().unwrap().entry(subject.to_string()).or_default().push(tx);
            Ok(Box::new(FakeSubscription { rx }))
        }

        async fn presence_register(
            &self,
            subject: &str,
            owner: &str,
            ttl: std::time::Duration,
        ) -> Result<Box<dyn PresenceHandle>, RelayError> {
            let mut presence = self.presence.lock().unwrap();
            if let Some(entry) = presence.get(subject) {
                if entry.expires_at > std::time::Instant::now() && entry.owner != owner {
                    return Err(RelayError::Conflict(format!("{subject} already owned by {}", entry.owner)));
                }
            }
            presence.insert(
                subject.to_string(),
                PresenceEntry {
                    owner: owner.to_string(),
                    expires_at: std::time::Instant::now() + ttl,
                },
            );
            Ok(Box::new(FakePresenceHandle {
                bus: self.clone(),
                subject: subject.to_string(),
                owner: owner.to_string(),
            }))
        }

        async fn presence_lookup(&self, subject: &str) -> Result<Option<String>, RelayError> {
            let presence = self.presence.lock().unwrap();
            Ok(presence.get(subject).and_then(|entry| {
                if entry.expires_at > std::time::Instant::now() {
                    Some(entry.owner.clone())
                } else {
                    None
                }
            }))
        }
    }

    #[tokio::test]
    async fn publish_reaches_active_subscriber() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("device.t.d").await.unwrap();
        bus.publish("device.t.d", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(sub.next().await, Some(Bytes::from_static(b"hi")));
    }

    #[tokio::test]
    async fn presence_register_rejects_second_owner_while_live() {
        let bus = InMemoryBus::new();
        let _first = bus
            .presence_register("presence.t.d", "instance-a", std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let second = bus
            .presence_register("presence.t.d", "instance-b", std::time::Duration::from_secs(60))
            .await;
        assert!(matches!(second, Err(RelayError::Conflict(_))));
    }

    #[tokio::test]
    async fn presence_release_allows_new_owner() {
        let bus = InMemoryBus::new();
        let first = bus
            .presence_register("presence.t.d", "instance-a", std::time::Duration::from_secs(60))
            .await
            .unwrap();
        first.release().await.unwrap();
        let second = bus
            .presence_register("presence.t.d", "instance-b", std::time::Duration::from_secs(60))
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn presence_lookup_returns_current_owner() {
        let bus = InMemoryBus::new();
        bus.presence_register("presence.t.d", "instance-a", std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(bus.presence_lookup("presence.t.d").await.unwrap(), Some("instance-a".to_string()));
    }
}
