//! Table reservation HTTP surface (`/api/v1/reservations`).

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use pos_reservation::{Reservation, ReservationAvailability, ReservationCreate, ReservationStatistics, ReservationStatus, TableCandidate};
use serde::Deserialize;
use uuid::Uuid;

use crate::{extractors::UserId, state::AppState, WebResult};

/// Body for [`create`]: the reservation input plus the caller-supplied
/// table inventory, since this workspace has no table-layout service.
#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    /// Booking details.
    pub reservation: ReservationCreate,
    /// Tables the store can offer, scored against the party's preferences.
    pub tables: Vec<TableCandidate>,
    /// Total number of tables the store has, for availability checks.
    pub total_tables: usize,
}

/// Book a new reservation.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/reservations/:store_id
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn create(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    user: UserId,
    Json(body): Json<CreateReservationRequest>,
) -> WebResult<Json<Reservation>> {
    let reservation = state
        .reservation
        .create_reservation(&store_id, &user.0, body.reservation, &body.tables, body.total_tables)
        .await?;
    Ok(Json(reservation))
}

/// Fetch a single reservation.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/reservations/:store_id/:id
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn get(
    State(state): State<AppState>,
    Path((store_id, id)): Path<(String, Uuid)>,
) -> WebResult<Json<Reservation>> {
    let reservation = state.reservation.get_reservation(&store_id, id).await?;
    Ok(Json(reservation))
}

/// Body for [`update_status`].
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    /// Target status.
    pub status: ReservationStatus,
    /// Reason, used when cancelling.
    pub reason: Option<String>,
}

/// Transition a reservation's status.
///
/// # Endpoint
///
/// ```text
/// PATCH /api/v1/reservations/:store_id/:id/status
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn update_status(
    State(state): State<AppState>,
    Path((store_id, id)): Path<(String, Uuid)>,
    user: UserId,
    Json(body): Json<UpdateStatusRequest>,
) -> WebResult<Json<Reservation>> {
    let reservation = state
        .reservation
        .update_status(&store_id, &user.0, id, body.status, body.reason)
        .await?;
    Ok(Json(reservation))
}

/// Assign specific tables to an existing reservation.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/reservations/:store_id/:id/assign-tables
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn assign_tables(
    State(state): State<AppState>,
    Path((store_id, id)): Path<(String, Uuid)>,
    Json(table_ids): Json<Vec<Uuid>>,
) -> WebResult<Json<Reservation>> {
    let reservation = state.reservation.assign_tables(&store_id, id, table_ids).await?;
    Ok(Json(reservation))
}

/// Query parameters for [`availability`].
#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    /// Date to check.
    pub date: NaiveDate,
    /// Party size.
    pub party_size: u32,
    /// Total tables the store has.
    pub total_tables: usize,
}

/// Report bookable slots for a given date and party size.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/reservations/:store_id/availability
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn availability(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> WebResult<Json<ReservationAvailability>> {
    let report = state
        .reservation
        .check_availability(&store_id, query.date, query.party_size, query.total_tables)
        .await?;
    Ok(Json(report))
}

/// List reservations booked for a specific date.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/reservations/:store_id/date/:date
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn by_date(
    State(state): State<AppState>,
    Path((store_id, date)): Path<(String, NaiveDate)>,
) -> WebResult<Json<Vec<Reservation>>> {
    let reservations = state.reservation.get_reservations_by_date(&store_id, date, None).await?;
    Ok(Json(reservations))
}

/// Query parameters for [`upcoming`].
#[derive(Debug, Deserialize)]
pub struct UpcomingQuery {
    /// Look-ahead window, in hours. Defaults to 24.
    pub hours_ahead: Option<i64>,
}

/// List reservations arriving within a look-ahead window.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/reservations/:store_id/upcoming
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn upcoming(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Query(query): Query<UpcomingQuery>,
) -> WebResult<Json<Vec<Reservation>>> {
    let reservations = state
        .reservation
        .get_upcoming_reservations(&store_id, query.hours_ahead.unwrap_or(24))
        .await?;
    Ok(Json(reservations))
}

/// Query parameters for [`stats`].
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Inclusive start date. Defaults to 30 days before `end_date`.
    pub start_date: Option<NaiveDate>,
    /// Inclusive end date. Defaults to today.
    pub end_date: Option<NaiveDate>,
}

/// Aggregate reservation statistics over a date range.
///
/// # Endpoint
///
/// ```text
/// GET /api/v1/reservations/:store_id/stats
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn stats(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> WebResult<Json<ReservationStatistics>> {
    let stats = state.reservation.get_statistics(&store_id, query.start_date, query.end_date).await?;
    Ok(Json(stats))
}

/// Response body for [`process_no_shows`].
#[derive(Debug, serde::Serialize)]
pub struct NoShowSweepReport {
    /// Number of reservations transitioned to `NO_SHOW`.
    pub swept: usize,
}

/// Sweep overdue `CONFIRMED` reservations to `NO_SHOW`.
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/reservations/:store_id/process-no-shows
/// ```
///
/// # Errors
///
/// See [`WebResult`].
pub async fn process_no_shows(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
) -> WebResult<Json<NoShowSweepReport>> {
    let swept = state.reservation.process_no_shows(&store_id).await?;
    Ok(Json(NoShowSweepReport { swept }))
}
