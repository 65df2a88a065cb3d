//! WebSocket surface for the real-time terminal synchronization hub.
//!
//! Framing and protocol handling live in `pos_sync::handle_socket`; this
//! module is the thin axum-specific upgrade, per that function's own
//! doc comment.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{IntoResponse, Response},
    Json,
};

use crate::state::AppState;

/// Upgrade a connection to the sync hub's WebSocket protocol.
///
/// # Endpoint
///
/// ```text
/// GET /ws/sync
/// ```
#[allow(clippy::unused_async)]
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| pos_sync::handle_socket(state.sync, socket))
}

/// Snapshot of connected terminals and queued message counts.
///
/// # Endpoint
///
/// ```text
/// GET /ws/sync/status
/// ```
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sync.status().await)
}
