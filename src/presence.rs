//! PresenceTracker (spec.md §4.C): the glue between `DataStore`'s durable
//! device status and `MessageBus`'s ephemeral presence record. A device is
//! "present" exactly as long as its presence record is live; the durable
//! `Device.status` column is a best-effort mirror of that for callers who
//! query the HTTP surface without needing to touch the bus.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::bus::{presence_subject, MessageBus, PresenceHandle};
use crate::error::RelayError;
use crate::models::DeviceStatus;
use crate::store::DataStore;

pub struct PresenceTracker {
    store: Arc<dyn DataStore>,
    bus: Arc<dyn MessageBus>,
    presence_ttl: Duration,
    heartbeat_interval: Duration,
}

/// Holds the live presence registration for one connected device. Dropping
/// this without calling `disconnect` leaves the bus record to expire on its
/// own TTL; `disconnect` releases it immediately and flips durable status.
pub struct PresenceLease {
    handle: Box<dyn PresenceHandle>,
    cancel_renewer: CancellationToken,
}

impl PresenceTracker {
    pub fn new(
        store: Arc<dyn DataStore>,
        bus: Arc<dyn MessageBus>,
        presence_ttl: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self { store, bus, presence_ttl, heartbeat_interval }
    }

    /// Marks a device connected: registers presence (failing with
    /// `RelayError::Conflict` if another instance already holds it — the
    /// single-link invariant in spec.md §8), upserts durable status, and
    /// spawns a background renewer that keeps the presence record alive for
    /// as long as the returned `PresenceLease` is held.
    pub async fn connect(
        &self,
        tenant_id: &str,
        device_id: &str,
        instance_id: &str,
    ) -> Result<PresenceLease, RelayError> {
        let subject = presence_subject(tenant_id, device_id);
        let handle = self.bus.presence_register(&subject, instance_id, self.presence_ttl).await?;

        self.store.upsert_device_status(tenant_id, device_id, DeviceStatus::Connected).await?;

        let cancel_renewer = CancellationToken::new();
        let handle = Arc::new(Mutex::new(handle));
        spawn_renewer(handle.clone(), self.heartbeat_interval, cancel_renewer.clone());

        Ok(PresenceLease {
            handle: Box::new(SharedHandle(handle)),
            cancel_renewer,
        })
    }

    /// Marks a device disconnected: stops the renewer, releases presence,
    /// and flips durable status.
    pub async fn disconnect(
        &self,
        tenant_id: &str,
        device_id: &str,
        lease: PresenceLease,
    ) -> Result<(), RelayError> {
        lease.cancel_renewer.cancel();
        lease.handle.release().await?;
        self.store.upsert_device_status(tenant_id, device_id, DeviceStatus::Disconnected).await?;
        Ok(())
    }

    pub async fn lookup(&self, tenant_id: &str, device_id: &str) -> Result<Option<String>, RelayError> {
        self.bus.presence_lookup(&presence_subject(tenant_id, device_id)).await
    }
}

/// `PresenceHandle` is not `Clone`, but the renewer task and the lease both
/// need to reach the same registration; wrapping it in `Arc<Mutex<_>>`
/// behind a thin adapter keeps `PresenceTracker::connect`'s return type a
/// plain `Box<dyn PresenceHandle>`.
struct SharedHandle(Arc<Mutex<Box<dyn PresenceHandle>>>);

#[async_trait::async_trait]
impl PresenceHandle for SharedHandle {
    async fn renew(&mut self) -> Result<(), RelayError> {
        self.0.lock().await.renew().await
    }

    async fn release(self: Box<Self>) -> Result<(), RelayError> {
        let handle = Arc::try_unwrap(self.0)
            .map_err(|_| RelayError::Internal("presence handle still shared at release".to_string()))?
            .into_inner();
        handle.release().await
    }
}

fn spawn_renewer(
    handle: Arc<Mutex<Box<dyn PresenceHandle>>>,
    period: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = handle.lock().await.renew().await {
                        tracing::warn!(%err, "presence renewal failed");
                        break;
                    }
                }
            }
        }
    });
}
