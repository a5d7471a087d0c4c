//! DataStore (spec.md §4.A): durable state behind the relay — device
//! records, sessions, and recordings. Declared as a trait (spec.md §9
//! prefers dynamic dispatch over a stream sink to a single concrete type) so
//! the runtime plane can be unit-tested against an in-memory fake instead of
//! a live Postgres instance.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RelayError;
use crate::models::{Device, DeviceStatus, Recording, Session};

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Idempotently ensures a tenant's namespace (schema) exists.
    async fn provision_tenant(&self, tenant_id: &str) -> Result<(), RelayError>;

    /// Idempotently registers a device under a tenant, defaulting its status
    /// to `Unknown` if it does not already exist.
    async fn provision_device(&self, tenant_id: &str, device_id: &str) -> Result<Device, RelayError>;

    async fn get_device(&self, tenant_id: &str, device_id: &str) -> Result<Device, RelayError>;

    /// Sets a device's status, bumping `updated_ts`; `created_ts` is only
    /// set the first time a device row is created (spec.md §8).
    async fn upsert_device_status(
        &self,
        tenant_id: &str,
        device_id: &str,
        status: DeviceStatus,
    ) -> Result<Device, RelayError>;

    async fn delete_device(&self, tenant_id: &str, device_id: &str) -> Result<(), RelayError>;

    /// Persists a new session. Fails with `RelayError::Conflict` if `s.id`
    /// already exists, and with `RelayError::InvalidRequest` if `s` fails
    /// `Session::validate` (spec.md §8).
    async fn allocate_session(&self, s: Session) -> Result<Session, RelayError>;

    async fn get_session(&self, tenant_id: &str, id: Uuid) -> Result<Session, RelayError>;

    /// Removes and returns the session record (spec.md §4.D: `CloseSession`
    /// reads-then-deletes so the caller can still publish `StopSession`
    /// with session metadata after this call).
    async fn delete_session(&self, tenant_id: &str, id: Uuid) -> Result<Session, RelayError>;

    async fn insert_session_recording(
        &self,
        tenant_id: &str,
        session_id: Uuid,
        recording: Vec<u8>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<Recording, RelayError>;

    async fn get_session_recording(&self, tenant_id: &str, session_id: Uuid) -> Result<Recording, RelayError>;
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory `DataStore` for unit tests (spec.md §9's dynamic-dispatch
    /// design note exists precisely so this can stand in for Postgres).
    #[derive(Default)]
    pub struct InMemoryStore {
        devices: Mutex<HashMap<(String, String), Device>>,
        sessions: Mutex<HashMap<Uuid, Session>>,
        recordings: Mutex<HashMap<Uuid, Recording>>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl DataStore for InMemoryStore {
        async fn provision_tenant(&self, _tenant_id: &str) -> Result<(), RelayError> {
            Ok(())
        }

        async fn provision_device(&self, tenant_id: &str, device_id: &str) -> Result<Device, RelayError> {
            let mut devices = self.devices.lock().unwrap();
            let key = (tenant_id.to_string(), device_id.to_string());
            if let Some(d) = devices.get(&key) {
                return Ok(d.clone());
            }
            let now = Utc::now();
            let device = Device {
                tenant_id: tenant_id.to_string(),
                device_id: device_id.to_string(),
                status: DeviceStatus::Unknown,
                created_ts: now,
                updated_ts: now,
            };
            devices.insert(key, device.clone());
            Ok(device)
        }

        async fn get_device(&self, tenant_id: &str, device_id: &str) -> Result<Device, RelayError> {
            self.devices
                .lock()
                .unwrap()
                .get(&(tenant_id.to_string(), device_id.to_string()))
                .cloned()
                .ok_or_else(|| RelayError::NotFound(format!("device {device_id}")))
        }

        async fn upsert_device_status(
            &self,
            tenant_id: &str,
            device_id: &str,
            status: DeviceStatus,
        ) -> Result<Device, RelayError> {
            let mut devices = self.devices.lock().unwrap();
            let key = (tenant_id.to_string(), device_id.to_string());
            let now = Utc::now();
            let device = devices
                .entry(key)
                .and_modify(|d| {
                    d.status = status;
                    d.updated_ts = now;
                })
                .or_insert_with(|| Device {
                    tenant_id: tenant_id.to_string(),
                    device_id: device_id.to_string(),
                    status,
                    created_ts: now,
                    updated_ts: now,
                });
            Ok(device.clone())
        }

        async fn delete_device(&self, tenant_id: &str, device_id: &str) -> Result<(), RelayError> {
            self.devices
                .lock()
                .unwrap()
                .remove(&(tenant_id.to_string(), device_id.to_string()));
            Ok(())
        }

        async fn allocate_session(&self, s: Session) -> Result<Session, RelayError> {
            if !s.validate() {
                return Err(RelayError::InvalidRequest("invalid session".to_string()));
            }
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.contains_key(&s.id) {
                return Err(RelayError::Conflict(format!("session {} already exists", s.id)));
            }
            sessions.insert(s.id, s.clone());
            Ok(s)
        }

        async fn get_session(&self, _tenant_id: &str, id: Uuid) -> Result<Session, RelayError> {
            self.sessions
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| RelayError::NotFound(format!("session {id}")))
        }

        async fn delete_session(&self, _tenant_id: &str, id: Uuid) -> Result<Session, RelayError> {
            self.sessions
                .lock()
                .unwrap()
                .remove(&id)
                .ok_or_else(|| RelayError::NotFound(format!("session {id}")))
        }

        async fn insert_session_recording(
            &self,
            _tenant_id: &str,
            session_id: Uuid,
            recording: Vec<u8>,
            now: DateTime<Utc>,
            ttl: chrono::Duration,
        ) -> Result<Recording, RelayError> {
            let rec = Recording {
                id: Uuid::new_v4(),
                session_id,
                recording,
                created_ts: now,
                expire_ts: now + ttl,
            };
            self.recordings.lock().unwrap().insert(session_id, rec.clone());
            Ok(rec)
        }

        async fn get_session_recording(&self, _tenant_id: &str, session_id: Uuid) -> Result<Recording, RelayError> {
            self.recordings
                .lock()
                .unwrap()
                .get(&session_id)
                .cloned()
                .ok_or_else(|| RelayError::NotFound(format!("recording for session {session_id}")))
        }
    }

    #[tokio::test]
    async fn allocate_session_rejects_duplicate_id() {
        let store = InMemoryStore::new();
        let s = Session::new("u".into(), "t".into(), "d".into(), Utc::now());
        store.allocate_session(s.clone()).await.unwrap();
        let err = store.allocate_session(s).await.unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
    }

    #[tokio::test]
    async fn allocate_session_rejects_invalid_session() {
        let store = InMemoryStore::new();
        let mut s = Session::new("u".into(), "t".into(), "d".into(), Utc::now());
        s.user_id.clear();
        let err = store.allocate_session(s).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn upsert_device_status_preserves_created_ts_across_updates() {
        let store = InMemoryStore::new();
        let first = store.upsert_device_status("t", "d", DeviceStatus::Connected).await.unwrap();
        let second = store.upsert_device_status("t", "d", DeviceStatus::Disconnected).await.unwrap();
        assert_eq!(first.created_ts, second.created_ts);
        assert_eq!(second.status, DeviceStatus::Disconnected);
        assert!(second.updated_ts >= first.updated_ts);
    }

    #[tokio::test]
    async fn delete_session_returns_stored_record() {
        let store = InMemoryStore::new();
        let s = Session::new("u".into(), "t".into(), "d".into(), Utc::now());
        store.allocate_session(s.clone()).await.unwrap();
        let deleted = store.delete_session("t", s.id).await.unwrap();
        assert_eq!(deleted.id, s.id);
        assert!(matches!(store.get_session("t", s.id).await, Err(RelayError::NotFound(_))));
    }
}
