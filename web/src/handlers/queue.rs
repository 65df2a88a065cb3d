//! Walk-in waiting list HTTP surface (`/api/v1/queue`).

use axum::{
    extract::{Path, Query, State},
    Json,
};
use pos_queue::{QueueEntry, QueueEntryCreate, QueuePosition, QueueStatistics, TableCandidate, TableSuggestion, WaitTimeEstimate};
use serde::Deserialize;
use uuid::Uuid;

use crate::{extractors::UserId, state::AppState, WebResult};

/// Admit a new party to the waiting list.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/queue/:store_id
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn add_to_queue(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    user: UserId,
    Json(input): Json<QueueEntryCreate>,
) -> WebResult<Json<QueueEntry>> {
    let entry = state.queue.add_to_queue(&store_id, &user.0, input).await?;
    Ok(Json(entry))
}

/// Notify a waiting party that their table is ready, arming the no-show timer.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/queue/:store_id/:entry_id/notify
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn notify(
    State(state): State<AppState>,
    Path((store_id, entry_id)): Path<(String, Uuid)>,
    user: UserId,
) -> WebResult<Json<QueueEntry>> {
    let entry = state.queue.notify_customer(&store_id, &user.0, entry_id).await?;
    Ok(Json(entry))
}

/// Body for [`seat`].
#[derive(Debug, Deserialize)]
pub struct SeatRequest {
    /// Table the party is being seated at.
    pub table_id: Uuid,
    /// Staff member recording the seating.
    pub seated_by: Uuid,
}

/// Seat a waiting or notified party, cancelling its no-show timer.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/queue/:store_id/:entry_id/seat
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn seat(
    State(state): State<AppState>,
    Path((store_id, entry_id)): Path<(String, Uuid)>,
    user: UserId,
    Json(body): Json<SeatRequest>,
) -> WebResult<Json<QueueEntry>> {
    let entry = state.queue.seat_customer(&store_id, &user.0, entry_id, body.table_id, body.seated_by).await?;
    Ok(Json(entry))
}

/// Manually mark a notified party as a no-show, ahead of its timer.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/queue/:store_id/:entry_id/no-show
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn no_show(
    State(state): State<AppState>,
    Path((store_id, entry_id)): Path<(String, Uuid)>,
    user: UserId,
) -> WebResult<Json<QueueEntry>> {
    let entry = state.queue.mark_no_show(&store_id, &user.0, entry_id).await?;
    Ok(Json(entry))
}

/// Cancel a queue entry.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/queue/:store_id/:entry_id/cancel
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn cancel(
    State(state): State<AppState>,
    Path((store_id, entry_id)): Path<(String, Uuid)>,
    user: UserId,
) -> WebResult<Json<QueueEntry>> {
    let entry = state.queue.cancel_entry(&store_id, &user.0, entry_id).await?;
    Ok(Json(entry))
}

/// List the waiting list, optionally filtered by status.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/queue/:store_id
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn list(State(state): State<AppState>, Path(store_id): Path<String>) -> WebResult<Json<Vec<QueueEntry>>> {
    let entries = state.queue.get_queue_list(&store_id, None).await?;
    Ok(Json(entries))
}

/// Get a single entry's position and live wait estimate.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/queue/:store_id/:entry_id/position
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn position(
    State(state): State<AppState>,
    Path((store_id, entry_id)): Path<(String, Uuid)>,
) -> WebResult<Json<QueuePosition>> {
    let position = state.queue.get_position(&store_id, entry_id).await?;
    Ok(Json(position))
}

/// Query parameters for [`estimate`].
#[derive(Debug, Deserialize)]
pub struct EstimateQuery {
    /// Party size to estimate a wait for.
    pub party_size: u32,
}

/// Estimate the wait for a hypothetical new party, without enqueueing it.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/queue/:store_id/estimate?party_size=4
/// ```
#[allow(clippy::unused_async)]
pub async fn estimate(State(state): State<AppState>, Query(query): Query<EstimateQuery>) -> Json<WaitTimeEstimate> {
    Json(state.queue.estimate_wait_time(query.party_size).await)
}

/// Score caller-supplied tables for the party waiting at `entry_id`.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/queue/:store_id/:entry_id/suggest-tables
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn suggest_tables(
    State(state): State<AppState>,
    Path((store_id, entry_id)): Path<(String, Uuid)>,
    Json(tables): Json<Vec<TableCandidate>>,
) -> WebResult<Json<Vec<TableSuggestion>>> {
    let suggestions = state.queue.suggest_tables(&store_id, entry_id, &tables).await?;
    Ok(Json(suggestions))
}

/// Aggregate queue statistics.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/queue/:store_id/stats
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn stats(State(state): State<AppState>, Path(store_id): Path<String>) -> WebResult<Json<QueueStatistics>> {
    let stats = state.queue.get_statistics(&store_id).await?;
    Ok(Json(stats))
}
