//! `PostgresStore`: the `DataStore` implementation backing production
//! deployments, grounded in the teacher's `database.rs`
//! (`DatabaseService(PgPool)` with one `sqlx::query`/`query_as` method per
//! operation). Tenant isolation is per-schema (spec.md §3, §9) rather than a
//! `tenant_id` column predicate, selected through an injected
//! `TenantNamespace` function instead of a hardcoded naming scheme.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::RelayError;
use crate::models::{Device, DeviceStatus, Recording, Session};

use super::DataStore;

/// Maps a tenant id to the Postgres schema that stores its rows. Injected
/// rather than hardcoded so tests can use a throwaway naming scheme and
/// production can enforce its own (spec.md §9: no global naming singleton).
pub type TenantNamespace = std::sync::Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Returns the current time. Injected so tests control `created_ts`/
/// `updated_ts` without sleeping (spec.md §9: no `Utc::now()` singleton).
pub type Clock = std::sync::Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn default_tenant_namespace() -> TenantNamespace {
    std::sync::Arc::new(|tenant_id: &str| {
        if tenant_id.is_empty() {
            "public".to_string()
        } else {
            format!("tenant_{tenant_id}")
        }
    })
}

pub fn system_clock() -> Clock {
    std::sync::Arc::new(Utc::now)
}

pub struct PostgresStore {
    pool: PgPool,
    namespace: TenantNamespace,
    clock: Clock,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            namespace: default_tenant_namespace(),
            clock: system_clock(),
        }
    }

    pub fn with_namespace(mut self, namespace: TenantNamespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn schema(&self, tenant_id: &str) -> String {
        (self.namespace)(tenant_id)
    }
}

#[async_trait]
impl DataStore for PostgresStore {
    async fn provision_tenant(&self, tenant_id: &str) -> Result<(), RelayError> {
        let schema = self.schema(tenant_id);
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{schema}\".devices (
                device_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_ts TIMESTAMPTZ NOT NULL,
                updated_ts TIMESTAMPTZ NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;
        // spec.md §4.A: a device is unique per (tenant, device); the schema
        // already scopes tenant, so device_id's primary key covers this, but
        // the index is named explicitly so it shows up in query plans.
        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS devices_tenant_device_idx ON \"{schema}\".devices (device_id)"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{schema}\".sessions (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                start_ts TIMESTAMPTZ NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{schema}\".recordings (
                id UUID PRIMARY KEY,
                session_id UUID NOT NULL,
                recording BYTEA NOT NULL,
                created_ts TIMESTAMPTZ NOT NULL,
                expire_ts TIMESTAMPTZ NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS recordings_expire_ts_idx ON \"{schema}\".recordings (expire_ts)"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn provision_device(&self, tenant_id: &str, device_id: &str) -> Result<Device, RelayError> {
        if let Ok(existing) = self.get_device(tenant_id, device_id).await {
            return Ok(existing);
        }
        self.upsert_device_status(tenant_id, device_id, DeviceStatus::Unknown).await
    }

    async fn get_device(&self, tenant_id: &str, device_id: &str) -> Result<Device, RelayError> {
        let schema = self.schema(tenant_id);
        let row: (String, DeviceStatus, DateTime<Utc>, DateTime<Utc>) = sqlx::query_as(&format!(
            "SELECT device_id, status, created_ts, updated_ts FROM \"{schema}\".devices WHERE device_id = $1"
        ))
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Device {
            tenant_id: tenant_id.to_string(),
            device_id: row.0,
            status: row.1,
            created_ts: row.2,
            updated_ts: row.3,
        })
    }

    async fn upsert_device_status(
        &self,
        tenant_id: &str,
        device_id: &str,
        status: DeviceStatus,
    ) -> Result<Device, RelayError> {
        let schema = self.schema(tenant_id);
        let now = (self.clock)();
        sqlx::query(&format!(
            "INSERT INTO \"{schema}\".devices (device_id, status, created_ts, updated_ts)
             VALUES ($1, $2, $3, $3)
             ON CONFLICT (device_id) DO UPDATE SET status = $2, updated_ts = $3"
        ))
        .bind(device_id)
        .bind(status)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get_device(tenant_id, device_id).await
    }

    async fn delete_device(&self, tenant_id: &str, device_id: &str) -> Result<(), RelayError> {
        let schema = self.schema(tenant_id);
        sqlx::query(&format!("DELETE FROM \"{schema}\".devices WHERE device_id = $1"))
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn allocate_session(&self, s: Session) -> Result<Session, RelayError> {
        if !s.validate() {
            return Err(RelayError::InvalidRequest("invalid session".to_string()));
        }
        let schema = self.schema(&s.tenant_id);
        sqlx::query(&format!(
            "INSERT INTO \"{schema}\".sessions (id, user_id, device_id, tenant_id, start_ts)
             VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(s.id)
        .bind(&s.user_id)
        .bind(&s.device_id)
        .bind(&s.tenant_id)
        .bind(s.start_ts)
        .execute(&self.pool)
        .await?;
        Ok(s)
    }

    async fn get_session(&self, tenant_id: &str, id: Uuid) -> Result<Session, RelayError> {
        let schema = self.schema(tenant_id);
        sqlx::query_as::<_, Session>(&format!(
            "SELECT id, user_id, device_id, tenant_id, start_ts FROM \"{schema}\".sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(RelayError::from)
    }

    async fn delete_session(&self, tenant_id: &str, id: Uuid) -> Result<Session, RelayError> {
        let session = self.get_session(tenant_id, id).await?;
        let schema = self.schema(tenant_id);
        sqlx::query(&format!("DELETE FROM \"{schema}\".sessions WHERE id = $1"))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(session)
    }

    async fn insert_session_recording(
        &self,
        tenant_id: &str,
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
        let schema = self.schema(tenant_id);
        sqlx::query(&format!(
            "INSERT INTO \"{schema}\".recordings (id, session_id, recording, created_ts, expire_ts)
             VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(rec.id)
        .bind(rec.session_id)
        .bind(&rec.recording)
        .bind(rec.created_ts)
        .bind(rec.expire_ts)
        .execute(&self.pool)
        .await?;
        Ok(rec)
    }

    async fn get_session_recording(&self, tenant_id: &str, session_id: Uuid) -> Result<Recording, RelayError> {
        let schema = self.schema(tenant_id);
        sqlx::query_as::<_, Recording>(&format!(
            "SELECT id, session_id, recording, created_ts, expire_ts FROM \"{schema}\".recordings
             WHERE session_id = $1 ORDER BY created_ts DESC LIMIT 1"
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(RelayError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_namespace_maps_empty_tenant_to_public_schema() {
        let ns = default_tenant_namespace();
        assert_eq!(ns(""), "public");
        assert_eq!(ns("acme"), "tenant_acme");
    }
}
