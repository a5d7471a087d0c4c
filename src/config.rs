//! Runtime configuration, loaded from the environment (spec.md §9 avoids
//! singletons; this mirrors the teacher's `AppConfig::load` shape but adds
//! the knobs the runtime plane actually needs: timeouts, recorder sizing,
//! session allocation retries).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub nats_url: String,

    /// Interval at which a connected device is expected to send a heartbeat.
    pub heartbeat_interval: Duration,
    /// How long a presence record (and the NATS KV entry backing it) lives
    /// without a renewal. Spec.md §3 fixes this at 2× heartbeat.
    pub presence_ttl: Duration,
    /// Interval at which `DeviceEndpoint` pings an idle connection.
    pub ping_period: Duration,
    /// Missed pongs before a device connection is torn down.
    pub max_missed_pongs: u32,

    pub connect_timeout: Duration,
    pub control_timeout: Duration,
    pub idle_timeout: Duration,

    /// Target chunk size for gzip-compressed session recordings.
    pub recorder_chunk_bytes: usize,
    /// Bounded channel capacity feeding the recorder; beyond this, frames are
    /// dropped and the session is marked `RecorderOverflow` (spec.md §5).
    pub recorder_channel_capacity: usize,

    /// Number of `AllocateSession` retries on an id collision before giving
    /// up (spec.md §4.D).
    pub session_allocation_retries: u32,
}

impl AppConfig {
    pub fn load() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/deviceconnect".to_string()),
            nats_url: std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),

            heartbeat_interval: Duration::from_secs(env_u64("HEARTBEAT_INTERVAL_SECS", 30)),
            presence_ttl: Duration::from_secs(env_u64("PRESENCE_TTL_SECS", 60)),
            ping_period: Duration::from_secs(env_u64("PING_PERIOD_SECS", 30)),
            max_missed_pongs: env_u64("MAX_MISSED_PONGS", 3) as u32,

            connect_timeout: Duration::from_secs(env_u64("CONNECT_TIMEOUT_SECS", 10)),
            control_timeout: Duration::from_secs(env_u64("CONTROL_TIMEOUT_SECS", 10)),
            idle_timeout: Duration::from_secs(env_u64("IDLE_TIMEOUT_SECS", 10)),

            recorder_chunk_bytes: env_u64("RECORDER_CHUNK_BYTES", 4096) as usize,
            recorder_channel_capacity: env_u64("RECORDER_CHANNEL_CAPACITY", 64) as usize,

            session_allocation_retries: env_u64("SESSION_ALLOCATION_RETRIES", 3) as u32,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = AppConfig::load();
        assert_eq!(cfg.presence_ttl, cfg.heartbeat_interval * 2);
        assert_eq!(cfg.max_missed_pongs, 3);
        assert_eq!(cfg.session_allocation_retries, 3);
        assert_eq!(cfg.recorder_channel_capacity, 64);
    }
}
