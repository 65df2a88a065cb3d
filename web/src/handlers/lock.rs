//! Editing-lease HTTP surface, exposing `pos-concurrency` to terminals that
//! need exclusive first-write rights before editing a shared entity.

use axum::{
    extract::{Path, State},
    Json,
};
use pos_concurrency::{LockAcquisition, LockInfo};
use serde::Deserialize;

use crate::{extractors::UserId, state::AppState};

/// Body for [`acquire`].
#[derive(Debug, Deserialize)]
pub struct AcquireLockRequest {
    /// Version of the entity the caller currently has loaded.
    pub current_version: u64,
    /// Terminal requesting the lease, for display to other terminals.
    pub terminal_id: Option<String>,
}

/// Acquire or renew an editing lease on `entity_type`/`entity_id`.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/locks/:entity_type/:entity_id
/// ```
pub async fn acquire(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    user: UserId,
    Json(body): Json<AcquireLockRequest>,
) -> Json<LockAcquisition> {
    let outcome = state
        .concurrency
        .acquire_lock(&entity_type, &entity_id, &user.0, body.current_version, body.terminal_id.as_deref())
        .await;
    Json(outcome)
}

/// Response body for [`release`].
#[derive(Debug, serde::Serialize)]
pub struct ReleaseReport {
    /// Whether a lease was actually removed.
    pub released: bool,
}

/// Release an editing lease, if `user` holds it.
///
/// # Endpoint
///
/// ```text
/// DELETE /api/v1/locks/:entity_type/:entity_id
/// ```
pub async fn release(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    user: UserId,
) -> Json<ReleaseReport> {
    let released = state.concurrency.release_lock(&entity_type, &entity_id, &user.0, None).await;
    Json(ReleaseReport { released })
}

/// Read-only snapshot of an entity's lease state.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/locks/:entity_type/:entity_id
/// ```
pub async fn status(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Json<LockInfo> {
    Json(state.concurrency.get_lock_info(&entity_type, &entity_id).await)
}
