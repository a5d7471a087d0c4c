//! `NatsBus`: the production `MessageBus`, grounded in `groblegark-coop`'s
//! `nats_pub.rs`/`nats_sub.rs` pair (`async_nats::Client::subscribe`/
//! `publish`, `ConnectOptions::new().retry_on_initial_connect()`). Presence
//! uses `async_nats::jetstream::kv::Store`, whose per-key TTL (via the
//! bucket's `max_age`) is exactly the expiring-ownership semantics spec.md
//! §3/§4.C ask for.

use async_nats::jetstream;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::error::RelayError;

use super::{MessageBus, PresenceHandle, Subscription};

pub struct NatsBus {
    client: async_nats::Client,
    kv: jetstream::kv::Store,
}

impl NatsBus {
    pub async fn connect(url: &str, presence_ttl: std::time::Duration) -> Result<Self, RelayError> {
        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .connect(url)
            .await
            .map_err(|e| RelayError::Internal(format!("nats connect failed: {e}")))?;

        let js = jetstream::new(client.clone());
        let kv = js
            .create_key_value(jetstream::kv::Config {
                bucket: "presence".to_string(),
                max_age: presence_ttl,
                ..Default::default()
            })
            .await
            .map_err(|e| RelayError::Internal(format!("presence bucket setup failed: {e}")))?;

        Ok(Self { client, kv })
    }
}

pub struct NatsSubscription {
    inner: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<Bytes> {
        self.inner.next().await.map(|msg| msg.payload)
    }
}

/// Presence ownership is a single KV entry: renewal rewrites it (resetting
/// the bucket's age-based TTL), release deletes it. There's no per-key
/// revision check here beyond what `presence_register` already did, since a
/// renewed/released handle is only ever held by the owner that created it.
pub struct NatsPresenceHandle {
    kv: jetstream::kv::Store,
    key: String,
    owner: String,
}

#[async_trait]
impl PresenceHandle for NatsPresenceHandle {
    async fn renew(&mut self) -> Result<(), RelayError> {
        self.kv
            .put(&self.key, self.owner.clone().into())
            .await
            .map_err(|e| RelayError::Internal(format!("presence renew failed: {e}")))?;
        Ok(())
    }

    async fn release(self: Box<Self>) -> Result<(), RelayError> {
        self.kv
            .delete(&self.key)
            .await
            .map_err(|e| RelayError::Internal(format!("presence release failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RelayError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| RelayError::Internal(format!("publish failed: {e}")))?;
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, RelayError> {
        let inner = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| RelayError::Internal(format!("subscribe failed: {e}")))?;
        Ok(Box::new(NatsSubscription { inner }))
    }

    async fn presence_register(
        &self,
        subject: &str,
        owner: &str,
        _ttl: std::time::Duration,
    ) -> Result<Box<dyn PresenceHandle>, RelayError> {
        // The bucket enforces TTL uniformly (set at `connect` time); a live
        // entry under `subject` means another instance holds presence.
        if let Ok(Some(entry)) = self.kv.entry(subject).await {
            if entry.value != Bytes::new() {
                return Err(RelayError::Conflict(format!("{subject} already registered")));
            }
        }
        self.kv
            .put(subject, owner.to_string().into())
            .await
            .map_err(|e| RelayError::Internal(format!("presence register failed: {e}")))?;
        Ok(Box::new(NatsPresenceHandle {
            kv: self.kv.clone(),
            key: subject.to_string(),
            owner: owner.to_string(),
        }))
    }

    async fn presence_lookup(&self, subject: &str) -> Result<Option<String>, RelayError> {
        match self.kv.get(subject).await {
            Ok(Some(bytes)) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
            Ok(None) => Ok(None),
            Err(e) => Err(RelayError::Internal(format!("presence lookup failed: {e}"))),
        }
    }
}
