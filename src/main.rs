//! Bootstrap: config -> store -> bus -> router -> listener, the same shape
//! as the teacher's `main.rs` minus the leptos web GUI wiring (out of
//! scope here — see DESIGN.md).

mod bus;
mod config;
mod device_endpoint;
mod error;
mod frame;
mod management;
mod models;
mod presence;
mod session;
mod store;

use std::sync::Arc;

use config::AppConfig;
use management::identity::{IdentityProvider, StaticTokenIdentityProvider};
use management::AppState;
use presence::PresenceTracker;
use session::SessionManager;
use store::postgres::PostgresStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(AppConfig::load());
    tracing::info!(bind_addr = %config.bind_addr, "starting deviceconnect relay");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store: Arc<dyn store::DataStore> = Arc::new(PostgresStore::new(pool));

    let bus: Arc<dyn bus::MessageBus> = Arc::new(bus::nats::NatsBus::connect(&config.nats_url, config.presence_ttl).await?);

    let presence = Arc::new(PresenceTracker::new(store.clone(), bus.clone(), config.presence_ttl, config.heartbeat_interval));
    let sessions = Arc::new(SessionManager::new(store.clone(), bus.clone(), presence.clone(), config.session_allocation_retries));
    let identity: Arc<dyn IdentityProvider> = Arc::new(StaticTokenIdentityProvider);

    let state = AppState {
        store,
        bus,
        presence,
        sessions,
        identity,
        config: config.clone(),
    };

    let app = management::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(bind_addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
