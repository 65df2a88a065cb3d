//! Router assembly: wires every handler module onto its path, under the
//! shared correlation-ID middleware.

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::{handlers, middleware::correlation_id_layer, state::AppState};

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness))
        .route("/ws/sync", get(handlers::sync::upgrade))
        .route("/ws/sync/status", get(handlers::sync::status))
        .route("/api/v1/queue/:store_id", post(handlers::queue::add_to_queue).get(handlers::queue::list))
        .route("/api/v1/queue/:store_id/estimate", get(handlers::queue::estimate))
        .route("/api/v1/queue/:store_id/stats", get(handlers::queue::stats))
        .route("/api/v1/queue/:store_id/:entry_id/notify", post(handlers::queue::notify))
        .route("/api/v1/queue/:store_id/:entry_id/seat", post(handlers::queue::seat))
        .route("/api/v1/queue/:store_id/:entry_id/no-show", post(handlers::queue::no_show))
        .route("/api/v1/queue/:store_id/:entry_id/cancel", post(handlers::queue::cancel))
        .route("/api/v1/queue/:store_id/:entry_id/position", get(handlers::queue::position))
        .route("/api/v1/queue/:store_id/:entry_id/suggest-tables", post(handlers::queue::suggest_tables))
        .route("/api/v1/reservations/:store_id", post(handlers::reservation::create))
        .route("/api/v1/reservations/:store_id/availability", get(handlers::reservation::availability))
        .route("/api/v1/reservations/:store_id/date/:date", get(handlers::reservation::by_date))
        .route("/api/v1/reservations/:store_id/upcoming", get(handlers::reservation::upcoming))
        .route("/api/v1/reservations/:store_id/stats", get(handlers::reservation::stats))
        .route("/api/v1/reservations/:store_id/process-no-shows", post(handlers::reservation::process_no_shows))
        .route("/api/v1/reservations/:store_id/:id", get(handlers::reservation::get))
        .route("/api/v1/reservations/:store_id/:id/status", patch(handlers::reservation::update_status))
        .route("/api/v1/reservations/:store_id/:id/assign-tables", post(handlers::reservation::assign_tables))
        .route(
            "/api/v1/locks/:entity_type/:entity_id",
            get(handlers::lock::status).post(handlers::lock::acquire).delete(handlers::lock::release),
        )
        .layer(correlation_id_layer())
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use axum_test::TestServer;
    use pos_audit::{AuditConfig, AuditLogger};
    use pos_concurrency::ConcurrencyManager;
    use pos_core::{InMemoryDocumentStore, InMemoryEventBus};
    use pos_notification::{NotificationConfig, NotificationGateway};
    use pos_queue::QueueService;
    use pos_reservation::ReservationService;
    use pos_sync::SyncHub;
    use serde_json::json;

    use super::router;
    use crate::state::AppState;

    async fn test_server() -> TestServer {
        let store = Arc::new(InMemoryDocumentStore::new());
        let events = Arc::new(InMemoryEventBus::new());
        let audit = AuditLogger::start(AuditConfig {
            log_dir: std::env::temp_dir().join(format!("pos-web-test-{}", uuid::Uuid::new_v4())),
            ..AuditConfig::default()
        })
        .await
        .expect("audit logger starts");
        let notifications = NotificationGateway::new(NotificationConfig::default());
        let sync = SyncHub::start(audit.clone(), events.clone());
        let queue = QueueService::new(store.clone(), notifications.clone(), audit.clone(), events.clone());
        let reservation = ReservationService::new(store.clone(), notifications, audit.clone(), events, queue.clone());
        let concurrency = ConcurrencyManager::new();
        let state = AppState::new(queue, reservation, sync, audit, concurrency, store);
        TestServer::new(router(state)).expect("test server builds")
    }

    #[tokio::test]
    async fn health_check_reports_ok() {
        let server = test_server().await;
        let response = server.get("/health").await;
        response.assert_status_ok();
        response.assert_text("ok");
    }

    #[tokio::test]
    async fn readiness_reports_zero_connections_with_no_terminals() {
        let server = test_server().await;
        let response = server.get("/health/ready").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["connected_terminals"], 0);
    }

    #[tokio::test]
    async fn walk_in_can_be_queued_and_then_found_in_the_list() {
        let server = test_server().await;
        let create = server
            .post("/api/v1/queue/store-1")
            .json(&json!({
                "customer_name": "Ada",
                "customer_phone": "+15551234",
                "customer_id": null,
                "party_size": 3,
                "table_preferences": [],
                "notification_method": "SMS",
                "notes": null,
            }))
            .await;
        create.assert_status_ok();
        let entry_id = create.json::<serde_json::Value>()["id"].as_str().unwrap().to_string();

        let list = server.get("/api/v1/queue/store-1").await;
        list.assert_status_ok();
        let entries = list.json::<Vec<serde_json::Value>>();
        assert!(entries.iter().any(|e| e["id"].as_str() == Some(entry_id.as_str())));
    }

    #[tokio::test]
    async fn estimate_endpoint_accepts_a_party_size_query_param() {
        let server = test_server().await;
        let response = server.get("/api/v1/queue/store-1/estimate?party_size=4").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["party_size"], 4);
    }

    #[tokio::test]
    async fn a_second_terminal_is_denied_a_lock_another_terminal_holds() {
        let server = test_server().await;
        let first = server
            .post("/api/v1/locks/table/table-1")
            .add_header(http::HeaderName::from_static("x-user-id"), http::HeaderValue::from_static("alice"))
            .json(&json!({"current_version": 0, "terminal_id": "term-1"}))
            .await;
        first.assert_status_ok();
        assert_eq!(first.json::<serde_json::Value>()["success"], true);

        let second = server
            .post("/api/v1/locks/table/table-1")
            .add_header(http::HeaderName::from_static("x-user-id"), http::HeaderValue::from_static("bob"))
            .json(&json!({"current_version": 0, "terminal_id": "term-2"}))
            .await;
        second.assert_status_ok();
        assert_eq!(second.json::<serde_json::Value>()["success"], false);
    }

    #[tokio::test]
    async fn reservation_booked_too_soon_returns_an_error_status() {
        let server = test_server().await;
        let now = chrono::Utc::now().naive_utc();
        let response = server
            .post("/api/v1/reservations/store-1")
            .json(&json!({
                "reservation": {
                    "customer_name": "Grace",
                    "customer_phone": "+15559876",
                    "customer_email": null,
                    "customer_id": null,
                    "party_size": 2,
                    "reservation_date": now.date(),
                    "reservation_time": now.time(),
                    "duration_minutes": null,
                    "table_preferences": [],
                    "special_requests": null,
                    "source": "PHONE",
                    "deposit_amount": null,
                    "recurrence": "NONE",
                    "recurrence_end_date": null,
                    "auto_confirm": false,
                    "assigned_tables": null,
                },
                "tables": [],
                "total_tables": 10,
            }))
            .await;
        response.assert_status_failure();
    }
}
