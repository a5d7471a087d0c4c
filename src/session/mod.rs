//! SessionManager (spec.md §4.D): opens and closes the durable `Session`
//! record that backs one management-to-device bridge, and announces that
//! lifecycle on the bus so both endpoints' tasks can react.

pub mod recorder;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::bus::{device_subject, session_subject, MessageBus};
use crate::error::RelayError;
use crate::frame::{shell_kind, Frame, Proto};
use crate::models::Session;
use crate::presence::PresenceTracker;
use crate::store::DataStore;

pub struct SessionManager {
    store: Arc<dyn DataStore>,
    bus: Arc<dyn MessageBus>,
    presence: Arc<PresenceTracker>,
    allocation_retries: u32,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn DataStore>,
        bus: Arc<dyn MessageBus>,
        presence: Arc<PresenceTracker>,
        allocation_retries: u32,
    ) -> Self {
        Self { store, bus, presence, allocation_retries }
    }

    /// Opens a new session bridging `user_id` to `device_id` (spec.md §4.D).
    /// Requires the device to currently hold presence; retries session id
    /// generation up to `allocation_retries` times on a uuid collision
    /// before giving up with `RelayError::Conflict`.
    pub async fn open_session(
        &self,
        tenant_id: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<Session, RelayError> {
        if self.presence.lookup(tenant_id, device_id).await?.is_none() {
            return Err(RelayError::DeviceNotConnected);
        }

        let mut last_err = None;
        for _ in 0..=self.allocation_retries {
            let session = Session::new(user_id.to_string(), tenant_id.to_string(), device_id.to_string(), Utc::now());
            match self.store.allocate_session(session.clone()).await {
                Ok(session) => {
                    self.announce_new_session(&session).await?;
                    return Ok(session);
                }
                Err(RelayError::Conflict(msg)) => last_err = Some(RelayError::Conflict(msg)),
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| RelayError::Internal("session allocation exhausted retries".to_string())))
    }

    /// Closes a session: removes the durable record and announces
    /// `StopShell` on the session's subject so the device endpoint tears
    /// down its side of the bridge.
    pub async fn close_session(&self, tenant_id: &str, session_id: Uuid) -> Result<Session, RelayError> {
        let session = self.store.delete_session(tenant_id, session_id).await?;
        let frame = Frame::new(Proto::Shell, shell_kind::STOP_SHELL, Some(session.id));
        self.bus.publish(&session_subject(&session.id.to_string()), frame.encode().freeze()).await?;
        Ok(session)
    }

    async fn announce_new_session(&self, session: &Session) -> Result<(), RelayError> {
        let frame = Frame::new(Proto::Shell, shell_kind::NEW_SESSION, Some(session.id))
            .with_prop("user_id", session.user_id.as_str())
            .with_prop("device_id", session.device_id.as_str());
        self.bus
            .publish(&device_subject(&session.tenant_id, &session.device_id), frame.encode().freeze())
            .await
    }
}

/// How long an idle control round-trip (check-update, send-inventory) may
/// take before the caller gives up with `RelayError::Timeout` (spec.md §4.F,
/// §6 — 408 on expiry).
pub fn control_deadline(control_timeout: Duration) -> Duration {
    control_timeout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::fake::InMemoryBus;
    use crate::store::fake::InMemoryStore;

    fn manager() -> (SessionManager, Arc<dyn DataStore>, Arc<dyn MessageBus>, Arc<PresenceTracker>) {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryStore::new());
        let bus: Arc<dyn MessageBus> = InMemoryBus::new();
        let presence = Arc::new(PresenceTracker::new(store.clone(), bus.clone(), Duration::from_secs(60), Duration::from_secs(30)));
        let manager = SessionManager::new(store.clone(), bus.clone(), presence.clone(), 3);
        (manager, store, bus, presence)
    }

    #[tokio::test]
    async fn open_session_fails_when_device_not_connected() {
        let (manager, ..) = manager();
        let err = manager.open_session("t", "user-1", "device-1").await.unwrap_err();
        assert!(matches!(err, RelayError::DeviceNotConnected));
    }

    #[tokio::test]
    async fn open_session_succeeds_and_announces_on_device_subject() {
        let (manager, _store, bus, presence) = manager();
        let _lease = presence.connect("t", "device-1", "instance-a").await.unwrap();

        let mut sub = bus.subscribe(&device_subject("t", "device-1")).await.unwrap();
        let session = manager.open_session("t", "user-1", "device-1").await.unwrap();

        assert_eq!(session.user_id, "user-1");
        let published = sub.next().await.expect("expected NewSession frame");
        let frame = Frame::decode(published).unwrap();
        assert!(frame.is_kind(shell_kind::NEW_SESSION));
        assert_eq!(frame.session_id, Some(session.id));
    }

    #[tokio::test]
    async fn close_session_removes_record_and_announces_stop() {
        let (manager, _store, bus, presence) = manager();
        let _lease = presence.connect("t", "device-1", "instance-a").await.unwrap();
        let session = manager.open_session("t", "user-1", "device-1").await.unwrap();

        let mut sub = bus.subscribe(&session_subject(&session.id.to_string())).await.unwrap();
        let closed = manager.close_session("t", session.id).await.unwrap();
        assert_eq!(closed.id, session.id);

        let published = sub.next().await.expect("expected StopShell frame");
        let frame = Frame::decode(published).unwrap();
        assert!(frame.is_kind(shell_kind::STOP_SHELL));
    }
}
