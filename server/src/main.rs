//! Process entry point for the POS coordination core.
//!
//! Loads configuration from the environment, wires the domain services
//! together, and serves the HTTP/WebSocket surface via `axum::serve`.

use std::sync::Arc;

use pos_audit::{AuditConfig, AuditLogger};
use pos_concurrency::ConcurrencyManager;
use pos_core::{InMemoryDocumentStore, InMemoryEventBus};
use pos_notification::{NotificationConfig, NotificationGateway};
use pos_queue::QueueService;
use pos_reservation::ReservationService;
use pos_sync::SyncHub;
use pos_web::CoreConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = CoreConfig::from_env();
    let audit = AuditLogger::start(AuditConfig::from_env()).await?;
    tracing::info!("audit log pipeline started");

    let store = Arc::new(InMemoryDocumentStore::new());
    let events = Arc::new(InMemoryEventBus::new());
    let notifications = NotificationGateway::new(NotificationConfig::from_env());
    let concurrency = ConcurrencyManager::with_lock_timeout(config.lock_timeout());

    let sync = SyncHub::start(audit.clone(), events.clone());
    tracing::info!("sync hub actor started");

    let queue = QueueService::new(store.clone(), notifications.clone(), audit.clone(), events.clone());
    let reservation = ReservationService::new(store.clone(), notifications, audit.clone(), events, queue.clone());
    reservation.configure_store("default", config.reservation_settings()).await;

    let state = pos_web::AppState::new(queue, reservation, sync, audit, concurrency, store);
    let app = pos_web::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
