//! Health check endpoints.
//!
//! Used by load balancers and monitoring systems to verify service health.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

/// Simple liveness probe. Always 200 while the process is running.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness body for `GET /health/ready`.
#[derive(Debug, Serialize)]
pub struct ReadinessReport {
    /// Connected terminal count, from the sync hub.
    pub connected_terminals: usize,
}

/// Readiness probe: reports sync hub connectivity so a load balancer can
/// tell "running" apart from "ready to serve terminals".
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessReport>) {
    let status = state.sync.status().await;
    (StatusCode::OK, Json(ReadinessReport { connected_terminals: status.total_connections }))
}
