//! ManagementEndpoint (spec.md §4.F, §6): the HTTP surface a management
//! user drives. Router wiring mirrors the teacher's `api.rs`/`main.rs` split
//! — handlers here, `Router` assembly left to `main.rs` — but the routes
//! themselves, and the bus-backed protocols behind them, are specific to
//! this service.

pub mod connect;
pub mod control;
pub mod identity;
pub mod playback;
pub mod transfer;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Multipart, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::config::AppConfig;
use crate::device_endpoint::{self, DeviceEndpointConfig};
use crate::error::RelayError;
use crate::models::Device;
use crate::presence::PresenceTracker;
use crate::session::SessionManager;
use crate::store::DataStore;
use identity::{AuthUser, IdentityProvider};
use transfer::UploadMetadata;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub bus: Arc<dyn MessageBus>,
    pub presence: Arc<PresenceTracker>,
    pub sessions: Arc<SessionManager>,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: Arc<AppConfig>,
}

impl axum::extract::FromRef<AppState> for Arc<dyn IdentityProvider> {
    fn from_ref(state: &AppState) -> Self {
        state.identity.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/devices/:device_id", get(get_device))
        .route("/devices/:device_id/link", get(device_link))
        .route("/devices/:device_id/connect", get(management_connect))
        .route("/devices/:device_id/check-update", post(check_update))
        .route("/devices/:device_id/send-inventory", post(send_inventory))
        .route("/devices/:device_id/download", get(download))
        .route("/devices/:device_id/upload", put(upload))
        .route("/sessions/:session_id/playback", get(playback))
        .with_state(state)
}

async fn get_device(State(state): State<AppState>, user: AuthUser, Path(device_id): Path<String>) -> Result<Json<Device>, RelayError> {
    let device = state.store.get_device(&user.tenant_id, &device_id).await?;
    Ok(Json(device))
}

/// Device agents connect here; no `AuthUser` is required since devices
/// authenticate by certificate/provisioning token rather than a management
/// bearer token (out of scope, per spec.md §9's identity Non-goal).
async fn device_link(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let tenant_id = "public".to_string();
    ws.on_upgrade(move |socket| async move {
        let _ = state.store.provision_device(&tenant_id, &device_id).await;
        let config = DeviceEndpointConfig {
            ping_period: state.config.ping_period,
            max_missed_pongs: state.config.max_missed_pongs,
        };
        let shutdown = tokio_util::sync::CancellationToken::new();
        let instance_id = format!("{}-{}", state.config.bind_addr, std::process::id());
        if let Err(err) = device_endpoint::serve(
            socket,
            tenant_id,
            device_id,
            instance_id,
            state.bus.clone(),
            state.presence.clone(),
            config,
            shutdown,
        )
        .await
        {
            tracing::warn!(%err, "device endpoint terminated with error");
        }
    })
}

async fn management_connect(
    State(state): State<AppState>,
    user: AuthUser,
    Path(device_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, RelayError> {
    let session = state.sessions.open_session(&user.tenant_id, &user.user_id, &device_id).await?;
    let bus = state.bus.clone();
    let sessions = state.sessions.clone();
    let store = state.store.clone();
    let chunk_bytes = state.config.recorder_chunk_bytes;
    let channel_capacity = state.config.recorder_channel_capacity;

    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(err) = connect::bridge(socket, session, bus, sessions, store, channel_capacity, chunk_bytes).await {
            tracing::warn!(%err, "management session bridge terminated with error");
        }
    }))
}

async fn check_update(State(state): State<AppState>, user: AuthUser, Path(device_id): Path<String>) -> Result<Response, RelayError> {
    control::check_update(&state.bus, &state.presence, &user.tenant_id, &device_id, state.config.control_timeout).await?;
    Ok(axum::http::StatusCode::ACCEPTED.into_response())
}

async fn send_inventory(State(state): State<AppState>, user: AuthUser, Path(device_id): Path<String>) -> Result<Response, RelayError> {
    control::send_inventory(&state.bus, &state.presence, &user.tenant_id, &device_id, state.config.control_timeout).await?;
    Ok(axum::http::StatusCode::ACCEPTED.into_response())
}

#[derive(serde::Deserialize)]
pub struct PathQuery {
    pub path: String,
}

async fn download(
    State(state): State<AppState>,
    user: AuthUser,
    Path(device_id): Path<String>,
    axum::extract::Query(query): axum::extract::Query<PathQuery>,
) -> Result<Bytes, RelayError> {
    transfer::download(&state.bus, &user.tenant_id, &device_id, &query.path, state.config.control_timeout).await.map(Bytes::from)
}

/// Parses the `path,uid,gid,mode,file` multipart form spec.md §6 documents
/// for `PUT /devices/{id}/upload` into an `UploadMetadata` plus the raw file
/// bytes.
async fn upload(
    State(state): State<AppState>,
    user: AuthUser,
    Path(device_id): Path<String>,
    mut form: Multipart,
) -> Result<Response, RelayError> {
    let mut metadata = UploadMetadata::default();
    let mut body = Bytes::new();

    while let Some(field) = form.next_field().await.map_err(|e| RelayError::InvalidRequest(e.to_string()))? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "path" => metadata.path = field.text().await.map_err(|e| RelayError::InvalidRequest(e.to_string()))?,
            "uid" => {
                let text = field.text().await.map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
                metadata.uid = Some(text.parse().map_err(|_| RelayError::InvalidRequest("uid must be an integer".into()))?);
            }
            "gid" => {
                let text = field.text().await.map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
                metadata.gid = Some(text.parse().map_err(|_| RelayError::InvalidRequest("gid must be an integer".into()))?);
            }
            "mode" => {
                let text = field.text().await.map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
                metadata.mode = Some(text.parse().map_err(|_| RelayError::InvalidRequest("mode must be an integer".into()))?);
            }
            "file" => body = field.bytes().await.map_err(|e| RelayError::InvalidRequest(e.to_string()))?,
            _ => {}
        }
    }

    if metadata.path.is_empty() {
        return Err(RelayError::InvalidRequest("multipart form is missing a `path` field".into()));
    }

    transfer::upload(&state.bus, &user.tenant_id, &device_id, metadata, body, state.config.control_timeout).await?;
    Ok(axum::http::StatusCode::CREATED.into_response())
}

#[derive(serde::Deserialize)]
pub struct PlaybackQuery {
    #[serde(default)]
    pub sleep_ms: u64,
}

async fn playback(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    axum::extract::Query(query): axum::extract::Query<PlaybackQuery>,
) -> Result<Json<Vec<Vec<u8>>>, RelayError> {
    let steps = playback::load_playback_steps(&state.store, &user.tenant_id, session_id, query.sleep_ms).await?;
    let mut frames = Vec::with_capacity(steps.len());
    for step in steps {
        tokio::time::sleep(step.delay).await;
        frames.push(step.frame.body.to_vec());
    }
    Ok(Json(frames))
}

/// How long a `/devices/{id}/connect` caller waits for the initial upgrade
/// handshake before giving up (spec.md §5's `connect_timeout`).
pub fn connect_timeout(config: &AppConfig) -> Duration {
    config.connect_timeout
}
