//! Persistent data model (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Unknown,
    Connected,
    Disconnected,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::Connected => "connected",
            DeviceStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// A device known to a tenant. Keyed by `(tenant_id, device_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub tenant_id: String,
    pub device_id: String,
    pub status: DeviceStatus,
    pub created_ts: DateTime<Utc>,
    pub updated_ts: DateTime<Utc>,
}

/// A live end-to-end bridge between one management client and one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub device_id: String,
    pub tenant_id: String,
    pub start_ts: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: String, tenant_id: String, device_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            device_id,
            tenant_id,
            start_ts: now,
        }
    }

    /// Validation performed by `AllocateSession` (spec §4.A, §8).
    pub fn validate(&self) -> bool {
        !self.id.is_nil()
            && !self.user_id.is_empty()
            && !self.device_id.is_empty()
            && self.start_ts.timestamp() != 0
    }
}

/// Append-only, TTL-bounded recording of a recordable session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recording {
    pub id: Uuid,
    pub session_id: Uuid,
    pub recording: Vec<u8>,
    pub created_ts: DateTime<Utc>,
    pub expire_ts: DateTime<Utc>,
}
