//! Table reservation core: availability, booking, state machine and no-show
//! sweep.
//!
//! Reservations persist through `pos_core::DocumentStore`, the same as
//! `pos-queue`'s walk-in entries. Table layout and table-status updates are
//! out of scope for this repository (no table-layout crate exists), so
//! availability/allocation here take the caller's table inventory as a
//! parameter rather than reaching into a layout service, following the
//! "pure core over a caller-supplied table list" split `pos-queue`'s
//! `score_tables` already uses.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use pos_audit::{AuditAction, AuditLogger, AuditSeverity, LogRequest};
use pos_core::{CoreError, CoreResult, DocumentStore, DomainEvent, Entity, EventBus, Query, TaskRegistry};
use pos_notification::{NotificationGateway, NotificationMethod};
use pos_queue::{QueueEntryCreate, QueueService};

const COLLECTION: &str = "reservations";
const CONFIRMATION_CODE_LEN: usize = 6;
const CONFIRMATION_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Lifecycle state of a reservation.
///
/// Transitions: `PENDING -> CONFIRMED -> ARRIVED -> SEATED -> COMPLETED`,
/// `* -> CANCELLED` from any non-terminal state, and
/// `CONFIRMED -> NO_SHOW`. `COMPLETED`, `CANCELLED` and `NO_SHOW` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Awaiting confirmation.
    Pending,
    /// Confirmed, not yet arrived.
    Confirmed,
    /// Customer has arrived.
    Arrived,
    /// Customer is seated.
    Seated,
    /// Service finished.
    Completed,
    /// Withdrawn or removed.
    Cancelled,
    /// Confirmed but never arrived within the grace period.
    NoShow,
}

impl ReservationStatus {
    const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }

    fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Confirmed, Self::Arrived | Self::NoShow)
                | (Self::Arrived, Self::Seated)
                | (Self::Seated, Self::Completed)
        )
    }
}

/// Where a reservation request originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationSource {
    /// Phoned in.
    Phone,
    /// Booked through the restaurant's own site.
    Website,
    /// Booked via the `WhatsApp` Business API.
    #[serde(rename = "WHATSAPP")]
    WhatsApp,
    /// Walked in and booked on the spot.
    WalkIn,
    /// Booked through a delivery/booking partner.
    Partner,
}

/// Recurrence cadence for a reservation series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceType {
    /// One-off reservation.
    None,
    /// Repeats every day.
    Daily,
    /// Repeats every week.
    Weekly,
    /// Repeats every month (clamped at month-end).
    Monthly,
}

/// A seating preference a customer may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TablePreference {
    /// Window seat.
    Window,
    /// Quiet area.
    Quiet,
    /// Outdoor seating.
    Outdoor,
    /// Indoor seating.
    Indoor,
    /// Private room/area.
    Private,
    /// Bar seating.
    Bar,
    /// Needs a high chair.
    #[serde(rename = "HIGHCHAIR")]
    HighChair,
    /// Needs wheelchair access.
    #[serde(rename = "WHEELCHAIR")]
    WheelChair,
}

/// A table the caller is offering for allocation, scored by
/// [`score_tables`] / [`ReservationService::find_best_tables`].
#[derive(Debug, Clone, Deserialize)]
pub struct TableCandidate {
    /// Table id.
    pub id: Uuid,
    /// Human-facing table number.
    pub number: u32,
    /// Seats at the table.
    pub capacity: u32,
    /// Features of the table, matched against requested preferences.
    pub features: Vec<TablePreference>,
}

/// Result of [`score_tables`] / [`ReservationService::find_best_tables`]:
/// one or more tables packed together to seat a party.
#[derive(Debug, Clone, Serialize)]
pub struct TableAllocation {
    /// Ids of the tables selected.
    pub table_ids: Vec<Uuid>,
    /// Numbers of the tables selected, same order as `table_ids`.
    pub table_numbers: Vec<u32>,
    /// Whether more than one table was combined to fit the party.
    pub combined: bool,
    /// Score of the best-ranked table in the selection, in `[0.0, 1.0]`.
    pub score: f64,
    /// Reasons contributing to the best-ranked table's score.
    pub reasons: Vec<String>,
}

/// Pure table-packing function underlying [`ReservationService::find_best_tables`].
///
/// Scores each table (base 0.5, +0.2 per matched preference, +0.3 for an
/// exact capacity match or +0.1 for a one-seat overage), ranks highest
/// first, then greedily packs ranked tables until their combined capacity
/// covers `party_size`. Returns `None` if no combination of the supplied
/// tables can seat the party.
#[must_use]
pub fn score_tables(party_size: u32, preferences: &[TablePreference], tables: &[TableCandidate]) -> Option<TableAllocation> {
    let mut scored: Vec<(&TableCandidate, f64, Vec<String>)> = tables
        .iter()
        .map(|table| {
            let mut score = 0.5_f64;
            let mut reasons = Vec::new();
            for preference in preferences {
                let (matched, label) = match preference {
                    TablePreference::Window => (table.features.contains(&TablePreference::Window), "window seat"),
                    TablePreference::Quiet => (table.features.contains(&TablePreference::Quiet), "quiet area"),
                    TablePreference::Outdoor => (table.features.contains(&TablePreference::Outdoor), "outdoor seating"),
                    _ => (false, ""),
                };
                if matched {
                    score += 0.2;
                    reasons.push(label.to_string());
                }
            }
            if table.capacity == party_size {
                score += 0.3;
                reasons.push("exact capacity match".to_string());
            } else if table.capacity == party_size + 1 {
                score += 0.1;
                reasons.push("one-seat overage".to_string());
            }
            (table, score.min(1.0), reasons)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut table_ids = Vec::new();
    let mut table_numbers = Vec::new();
    let mut total_capacity = 0u32;
    for (table, _, _) in &scored {
        table_ids.push(table.id);
        table_numbers.push(table.number);
        total_capacity += table.capacity;
        if total_capacity >= party_size {
            break;
        }
    }

    if total_capacity < party_size {
        return None;
    }

    let (best_score, best_reasons) = scored
        .first()
        .map_or((0.0, Vec::new()), |(_, score, reasons)| (*score, reasons.clone()));

    Some(TableAllocation {
        combined: table_ids.len() > 1,
        table_ids,
        table_numbers,
        score: best_score,
        reasons: best_reasons,
    })
}

/// A booked table reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique id.
    pub id: Uuid,
    /// Store this reservation belongs to.
    pub store_id: String,
    /// Customer's name.
    pub customer_name: String,
    /// Customer's phone.
    pub customer_phone: String,
    /// Customer's email, if given.
    pub customer_email: Option<String>,
    /// Linked customer record, if known.
    pub customer_id: Option<Uuid>,
    /// Number of guests.
    pub party_size: u32,
    /// Date of the booking.
    pub reservation_date: NaiveDate,
    /// Time of the booking.
    pub reservation_time: NaiveTime,
    /// Expected duration of the sitting.
    pub duration_minutes: u32,
    /// Seating preferences.
    pub table_preferences: Vec<TablePreference>,
    /// Free-form requests (e.g. "birthday cake").
    pub special_requests: Option<String>,
    /// Where the booking came from.
    pub source: ReservationSource,
    /// Current lifecycle state.
    pub status: ReservationStatus,
    /// 6-character uppercase alphanumeric confirmation code.
    pub confirmation_code: String,
    /// Tables assigned to this reservation.
    pub assigned_tables: Vec<Uuid>,
    /// Staff member who seated this reservation, if recorded.
    pub assigned_by: Option<Uuid>,
    /// Queue entry created for this reservation, if it arrived without an
    /// assigned table and was enqueued.
    pub queue_entry_id: Option<Uuid>,
    /// Deposit amount required, if any.
    pub deposit_amount: Option<f64>,
    /// Whether the deposit has been paid.
    pub deposit_paid: bool,
    /// Whether the deposit has been refunded.
    pub deposit_refunded: bool,
    /// Whether a confirmation notification has been sent.
    pub notification_sent: bool,
    /// When the confirmation notification was sent.
    pub notification_sent_at: Option<DateTime<Utc>>,
    /// Recurrence cadence for this reservation's series.
    pub recurrence: RecurrenceType,
    /// Id of the series' first reservation, for generated recurrences.
    pub recurrence_parent_id: Option<Uuid>,
    /// Last date a recurring series should generate through.
    pub recurrence_end_date: Option<NaiveDate>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// When the reservation was confirmed.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// When the customer arrived.
    pub arrived_at: Option<DateTime<Utc>>,
    /// When the customer was seated.
    pub seated_at: Option<DateTime<Utc>>,
    /// When service completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the reservation was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Why the reservation was cancelled.
    pub cancellation_reason: Option<String>,
    /// Optimistic concurrency version.
    pub version: u64,
}

impl Reservation {
    /// Combined booking date and time, naive (store-local, no timezone).
    #[must_use]
    pub const fn reservation_datetime(&self) -> NaiveDateTime {
        NaiveDateTime::new(self.reservation_date, self.reservation_time)
    }

    /// Whether `[start, start + duration)` overlaps `other`'s window.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let start = self.reservation_datetime();
        let end = start + chrono::Duration::minutes(i64::from(self.duration_minutes));
        let other_start = other.reservation_datetime();
        let other_end = other_start + chrono::Duration::minutes(i64::from(other.duration_minutes));
        start < other_end && end > other_start
    }

    /// Whether this reservation and `other` conflict: overlapping windows
    /// that share at least one assigned table.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.overlaps(other) && self.assigned_tables.iter().any(|t| other.assigned_tables.contains(t))
    }
}

impl Entity for Reservation {
    fn id(&self) -> Uuid {
        self.id
    }
    fn store_id(&self) -> &str {
        &self.store_id
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// Input to [`ReservationService::create_reservation`].
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationCreate {
    /// Customer's name.
    pub customer_name: String,
    /// Customer's phone.
    pub customer_phone: String,
    /// Customer's email, if given.
    pub customer_email: Option<String>,
    /// Linked customer record, if known.
    pub customer_id: Option<Uuid>,
    /// Number of guests.
    pub party_size: u32,
    /// Date of the booking.
    pub reservation_date: NaiveDate,
    /// Time of the booking.
    pub reservation_time: NaiveTime,
    /// Expected duration, defaults to the store's configured duration when
    /// `None`.
    pub duration_minutes: Option<u32>,
    /// Seating preferences.
    pub table_preferences: Vec<TablePreference>,
    /// Free-form requests.
    pub special_requests: Option<String>,
    /// Where the booking came from.
    pub source: ReservationSource,
    /// Deposit amount, applied only if the store requires one.
    pub deposit_amount: Option<f64>,
    /// Recurrence cadence.
    pub recurrence: RecurrenceType,
    /// Last date a recurring series should generate through.
    pub recurrence_end_date: Option<NaiveDate>,
    /// Skip the confirmation step and confirm immediately.
    pub auto_confirm: bool,
    /// Pre-assign these tables instead of auto-allocating.
    pub assigned_tables: Option<Vec<Uuid>>,
}

/// One bookable time slot, see [`ReservationService::check_availability`].
#[derive(Debug, Clone, Serialize)]
pub struct ReservationSlot {
    /// Date of the slot.
    pub date: NaiveDate,
    /// Time of the slot.
    pub time: NaiveTime,
    /// Tables free at this slot.
    pub available_tables: usize,
    /// Total tables in the store.
    pub total_tables: usize,
    /// Whether `available_tables` covers the requested party.
    pub is_available: bool,
}

/// Availability for a single date, see [`ReservationService::check_availability`].
#[derive(Debug, Clone, Serialize)]
pub struct ReservationAvailability {
    /// Date checked.
    pub date: NaiveDate,
    /// Every generated slot, open-to-close at the store's slot interval.
    pub slots: Vec<ReservationSlot>,
    /// Whether no slot has room for this party.
    pub fully_booked: bool,
    /// Why the day is unavailable (e.g. closed), if applicable.
    pub restrictions: Option<Value>,
}

/// Aggregated reservation statistics, see [`ReservationService::get_statistics`].
#[derive(Debug, Clone, Serialize, Default)]
pub struct ReservationStatistics {
    /// Reservations in the period.
    pub total_reservations: usize,
    /// `CONFIRMED` count.
    pub confirmed: usize,
    /// `PENDING` count.
    pub pending: usize,
    /// `NO_SHOW` count.
    pub no_shows: usize,
    /// `CANCELLED` count.
    pub cancelled: usize,
    /// `no_shows / total`, as a percentage.
    pub no_show_rate: f64,
    /// `cancelled / total`, as a percentage.
    pub cancellation_rate: f64,
    /// `confirmed / total`, as a percentage.
    pub confirmation_rate: f64,
    /// Reservations booked for today.
    pub today: usize,
    /// Reservations booked for this week.
    pub this_week: usize,
    /// Reservations booked for this month.
    pub this_month: usize,
    /// Mean party size over the period.
    pub average_party_size: f64,
    /// Mean duration, in minutes, over the period.
    pub average_duration_minutes: f64,
    /// Top 3 busiest hours (0-23), busiest first.
    pub peak_hours: Vec<u32>,
    /// Top 3 busiest weekdays, busiest first.
    pub popular_days: Vec<String>,
    /// Sum of paid deposits.
    pub total_deposits: f64,
    /// Sum of unpaid-but-required deposits.
    pub pending_deposits: f64,
    /// Sum of refunded deposits.
    pub refunded_deposits: f64,
}

/// Per-store reservation policy.
#[derive(Debug, Clone)]
pub struct ReservationSettings {
    /// Whether new reservations are accepted.
    pub enabled: bool,
    /// Minimum hours of advance notice required.
    pub min_advance_hours: i64,
    /// Maximum days in the future a booking can be made.
    pub max_advance_days: i64,
    /// Default sitting length when the caller doesn't specify one.
    pub default_duration_minutes: u32,
    /// Smallest party size accepted.
    pub min_party_size: u32,
    /// Largest party size accepted.
    pub max_party_size: u32,
    /// Whether a reservation starts `PENDING` (true) or `CONFIRMED` (false).
    pub require_confirmation: bool,
    /// Whether a deposit is required at booking time.
    pub require_deposit: bool,
    /// Minutes after the booked time before a `CONFIRMED` reservation that
    /// never arrived is swept to `NO_SHOW`.
    pub no_show_grace_minutes: i64,
    /// Interval, in minutes, between generated availability slots.
    pub slot_duration_minutes: i64,
    /// Opening/closing time per lowercase English weekday name (e.g.
    /// `"monday"`). A day absent from this map is closed.
    pub operating_hours: HashMap<String, (NaiveTime, NaiveTime)>,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        let weekday_hours = |open: (u32, u32), close: (u32, u32)| {
            (
                NaiveTime::from_hms_opt(open.0, open.1, 0).unwrap_or_default(),
                NaiveTime::from_hms_opt(close.0, close.1, 0).unwrap_or_default(),
            )
        };
        let mut operating_hours = HashMap::new();
        for day in ["monday", "tuesday", "wednesday", "thursday"] {
            operating_hours.insert(day.to_string(), weekday_hours((11, 0), (23, 0)));
        }
        for day in ["friday", "saturday"] {
            operating_hours.insert(day.to_string(), weekday_hours((11, 0), (0, 0)));
        }
        operating_hours.insert("sunday".to_string(), weekday_hours((11, 0), (22, 0)));

        Self {
            enabled: true,
            min_advance_hours: 1,
            max_advance_days: 30,
            default_duration_minutes: 120,
            min_party_size: 1,
            max_party_size: 20,
            require_confirmation: true,
            require_deposit: false,
            no_show_grace_minutes: 15,
            slot_duration_minutes: 15,
            operating_hours,
        }
    }
}

fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn generate_confirmation_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CONFIRMATION_CODE_LEN)
        .map(|_| {
            let index = rng.gen_range(0..CONFIRMATION_CODE_ALPHABET.len());
            CONFIRMATION_CODE_ALPHABET[index] as char
        })
        .collect()
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    notifications: NotificationGateway,
    audit: AuditLogger,
    events: Arc<dyn EventBus>,
    queue: QueueService,
    tasks: TaskRegistry,
    settings: RwLock<HashMap<String, ReservationSettings>>,
}

/// The reservation book. Cheap to clone.
#[derive(Clone)]
pub struct ReservationService {
    inner: Arc<Inner>,
}

impl ReservationService {
    /// Build a service. Per-store settings default to [`ReservationSettings::default`]
    /// until [`ReservationService::configure_store`] is called.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifications: NotificationGateway,
        audit: AuditLogger,
        events: Arc<dyn EventBus>,
        queue: QueueService,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                notifications,
                audit,
                events,
                queue,
                tasks: TaskRegistry::new(),
                settings: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Override the default policy for `store_id`.
    pub async fn configure_store(&self, store_id: impl Into<String>, settings: ReservationSettings) {
        self.inner.settings.write().await.insert(store_id.into(), settings);
    }

    async fn settings_for(&self, store_id: &str) -> ReservationSettings {
        self.inner
            .settings
            .read()
            .await
            .get(store_id)
            .cloned()
            .unwrap_or_default()
    }

    fn no_show_sweep_key(store_id: &str) -> String {
        format!("reservation:no_show_sweep:{store_id}")
    }

    /// Start a periodic no-show sweep for `store_id`, replacing any sweep
    /// already running for it.
    pub fn start_no_show_sweep(&self, store_id: impl Into<String>, interval: Duration) {
        let store_id = store_id.into();
        let service = self.clone();
        let key = Self::no_show_sweep_key(&store_id);
        self.inner.tasks.spawn(key, async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match service.process_no_shows(&store_id).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(%store_id, count, "swept no-show reservations"),
                    Err(error) => tracing::warn!(%store_id, %error, "no-show sweep failed"),
                }
            }
        });
    }

    /// Stop the periodic no-show sweep for `store_id`, if running.
    pub fn stop_no_show_sweep(&self, store_id: &str) {
        self.inner.tasks.cancel(&Self::no_show_sweep_key(store_id));
    }

    async fn load(&self, store_id: &str, id: Uuid) -> CoreResult<Reservation> {
        let document = self
            .inner
            .store
            .get(COLLECTION, &id.to_string())
            .await?
            .ok_or_else(|| CoreError::not_found("reservation", id.to_string()))?;
        let reservation: Reservation = serde_json::from_value(document)
            .map_err(|e| CoreError::Internal(format!("corrupt reservation {id}: {e}")))?;
        if reservation.store_id != store_id {
            return Err(CoreError::not_found("reservation", id.to_string()));
        }
        Ok(reservation)
    }

    async fn save(&self, reservation: &Reservation) -> CoreResult<()> {
        let document = serde_json::to_value(reservation)
            .map_err(|e| CoreError::Internal(format!("failed to serialize reservation: {e}")))?;
        self.inner.store.upsert(COLLECTION, &reservation.id.to_string(), document).await
    }

    fn publish(&self, topic: &str, action: &str, reservation: &Reservation) {
        let payload = serde_json::to_value(reservation).unwrap_or(Value::Null);
        self.inner.events.publish(DomainEvent::new(
            topic,
            "reservation",
            reservation.id.to_string(),
            action,
            payload,
        ));
    }

    async fn reservations_overlapping_date(
        &self,
        store_id: &str,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> CoreResult<Vec<Reservation>> {
        let documents = self
            .inner
            .store
            .query(
                COLLECTION,
                &Query::new()
                    .eq("store_id", store_id)
                    .eq("reservation_date", date.to_string())
                    .in_("status", vec![json!("CONFIRMED"), json!("PENDING")]),
            )
            .await?;
        Ok(documents
            .into_iter()
            .filter_map(|document| serde_json::from_value::<Reservation>(document).ok())
            .filter(|r| exclude != Some(r.id))
            .collect())
    }

    /// Check whether `total_tables` tables are enough to seat `party_size`
    /// at `date`/`time` for `duration_minutes`, excluding `exclude` (used
    /// when re-checking a reservation being rescheduled) from the overlap
    /// count.
    async fn slot_is_available(
        &self,
        store_id: &str,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: u32,
        party_size: u32,
        total_tables: usize,
        exclude: Option<Uuid>,
    ) -> CoreResult<bool> {
        let candidate = NaiveDateTime::new(date, time);
        let candidate_end = candidate + chrono::Duration::minutes(i64::from(duration_minutes));

        let existing = self.reservations_overlapping_date(store_id, date, exclude).await?;
        let mut tables_in_use = std::collections::HashSet::new();
        for reservation in &existing {
            let start = reservation.reservation_datetime();
            let end = start + chrono::Duration::minutes(i64::from(reservation.duration_minutes));
            if start < candidate_end && end > candidate {
                tables_in_use.extend(reservation.assigned_tables.iter().copied());
            }
        }

        let available_tables = total_tables.saturating_sub(tables_in_use.len());
        let tables_needed = party_size.div_ceil(4).max(1) as usize;
        Ok(available_tables >= tables_needed)
    }

    /// Generate bookable slots for `date`, open-to-close at the store's
    /// slot interval, each checked against `total_tables`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on a storage failure.
    pub async fn check_availability(
        &self,
        store_id: &str,
        date: NaiveDate,
        party_size: u32,
        total_tables: usize,
    ) -> CoreResult<ReservationAvailability> {
        let settings = self.settings_for(store_id).await;
        let Some(&(open, close)) = settings.operating_hours.get(weekday_name(date)) else {
            return Ok(ReservationAvailability {
                date,
                slots: Vec::new(),
                fully_booked: true,
                restrictions: Some(json!({"reason": "Closed on this day"})),
            });
        };

        let mut current = NaiveDateTime::new(date, open);
        let mut end = NaiveDateTime::new(date, close);
        if close <= open {
            end += chrono::Duration::days(1);
        }

        let mut slots = Vec::new();
        while current < end {
            let is_available = self
                .slot_is_available(
                    store_id,
                    current.date(),
                    current.time(),
                    settings.default_duration_minutes,
                    party_size,
                    total_tables,
                    None,
                )
                .await?;
            slots.push(ReservationSlot {
                date: current.date(),
                time: current.time(),
                available_tables: if is_available { total_tables } else { 0 },
                total_tables,
                is_available,
            });
            current += chrono::Duration::minutes(settings.slot_duration_minutes);
        }

        let fully_booked = !slots.iter().any(|s| s.is_available);
        Ok(ReservationAvailability { date, slots, fully_booked, restrictions: None })
    }

    /// Score `tables` for `party_size`/`preferences` and pack the
    /// highest-ranked ones until their combined capacity covers the party.
    #[must_use]
    pub fn find_best_tables(party_size: u32, preferences: &[TablePreference], tables: &[TableCandidate]) -> Option<TableAllocation> {
        score_tables(party_size, preferences, tables)
    }

    /// Book a new reservation.
    ///
    /// # Errors
    ///
    /// [`CoreError::BusinessRule`] if the store has reservations disabled or
    /// the requested time/party size violates policy;
    /// [`CoreError::Conflict`] if no slot is available.
    pub async fn create_reservation(
        &self,
        store_id: &str,
        user_id: &str,
        data: ReservationCreate,
        tables: &[TableCandidate],
        total_tables: usize,
    ) -> CoreResult<Reservation> {
        let settings = self.settings_for(store_id).await;
        if !settings.enabled {
            return Err(CoreError::BusinessRule("reservation system is disabled".to_string()));
        }

        let now = Utc::now().naive_utc();
        let reservation_datetime = NaiveDateTime::new(data.reservation_date, data.reservation_time);
        #[allow(clippy::cast_precision_loss)]
        let hours_advance = (reservation_datetime - now).num_minutes() as f64 / 60.0;
        #[allow(clippy::cast_precision_loss)]
        if hours_advance < settings.min_advance_hours as f64 {
            return Err(CoreError::BusinessRule(format!(
                "reservations must be made at least {} hours in advance",
                settings.min_advance_hours
            )));
        }
        #[allow(clippy::cast_precision_loss)]
        if hours_advance > (settings.max_advance_days * 24) as f64 {
            return Err(CoreError::BusinessRule(format!(
                "reservations cannot be made more than {} days in advance",
                settings.max_advance_days
            )));
        }

        if data.party_size < settings.min_party_size || data.party_size > settings.max_party_size {
            return Err(CoreError::Validation(format!(
                "party_size must be between {} and {}",
                settings.min_party_size, settings.max_party_size
            )));
        }

        let duration_minutes = data.duration_minutes.unwrap_or(settings.default_duration_minutes);
        let available = self
            .slot_is_available(
                store_id,
                data.reservation_date,
                data.reservation_time,
                duration_minutes,
                data.party_size,
                total_tables,
                None,
            )
            .await?;
        if !available {
            return Err(CoreError::Conflict("no tables available for this time slot".to_string()));
        }

        let status = if settings.require_confirmation {
            ReservationStatus::Pending
        } else {
            ReservationStatus::Confirmed
        };
        let now_utc = Utc::now();

        let assigned_tables = match data.assigned_tables {
            Some(tables) => tables,
            None => Self::find_best_tables(data.party_size, &data.table_preferences, tables)
                .map(|allocation| allocation.table_ids)
                .unwrap_or_default(),
        };

        let reservation = Reservation {
            id: Uuid::new_v4(),
            store_id: store_id.to_string(),
            customer_name: data.customer_name,
            customer_phone: data.customer_phone,
            customer_email: data.customer_email,
            customer_id: data.customer_id,
            party_size: data.party_size,
            reservation_date: data.reservation_date,
            reservation_time: data.reservation_time,
            duration_minutes,
            table_preferences: data.table_preferences,
            special_requests: data.special_requests,
            source: data.source,
            status,
            confirmation_code: generate_confirmation_code(),
            assigned_tables,
            assigned_by: None,
            queue_entry_id: None,
            deposit_amount: if settings.require_deposit { data.deposit_amount } else { None },
            deposit_paid: false,
            deposit_refunded: false,
            notification_sent: false,
            notification_sent_at: None,
            recurrence: data.recurrence,
            recurrence_parent_id: None,
            recurrence_end_date: data.recurrence_end_date,
            created_at: now_utc,
            updated_at: now_utc,
            confirmed_at: if data.auto_confirm { Some(now_utc) } else { None },
            arrived_at: None,
            seated_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            version: 1,
        };

        self.save(&reservation).await?;

        if reservation.recurrence != RecurrenceType::None {
            if let Some(end_date) = reservation.recurrence_end_date {
                self.create_recurring_reservations(&reservation, end_date).await?;
            }
        }

        if data.auto_confirm || !settings.require_confirmation {
            self.send_confirmation(&reservation).await?;
        }

        self.inner
            .audit
            .log(
                AuditAction::Create,
                AuditSeverity::Info,
                LogRequest {
                    entity_type: "reservation".to_string(),
                    entity_id: Some(reservation.id.to_string()),
                    user_id: user_id.to_string(),
                    terminal_id: "system".to_string(),
                    description: format!(
                        "{} booked for {} on {} at {}",
                        reservation.customer_name, reservation.party_size, reservation.reservation_date, reservation.reservation_time
                    ),
                    new_value: serde_json::to_value(&reservation).ok(),
                    ..LogRequest::default()
                },
            )
            .await;
        self.publish("reservation-events", "CREATE", &reservation);

        Ok(reservation)
    }

    async fn create_recurring_reservations(&self, parent: &Reservation, end_date: NaiveDate) -> CoreResult<()> {
        let mut current_date = parent.reservation_date;
        while let Some(next_date) = next_recurrence_date(current_date, parent.recurrence) {
            if next_date > end_date {
                break;
            }
            current_date = next_date;

            let now = Utc::now();
            let child = Reservation {
                id: Uuid::new_v4(),
                reservation_date: current_date,
                recurrence_parent_id: Some(parent.id),
                created_at: now,
                updated_at: now,
                ..parent.clone()
            };
            self.save(&child).await?;
        }
        Ok(())
    }

    async fn send_confirmation(&self, reservation: &Reservation) -> CoreResult<()> {
        let message = format!(
            "Hi {}, your table for {} is confirmed for {} at {}. Confirmation code: {}",
            reservation.customer_name,
            reservation.party_size,
            reservation.reservation_date,
            reservation.reservation_time,
            reservation.confirmation_code
        );
        self.inner
            .notifications
            .send(reservation.id, NotificationMethod::Sms, &reservation.customer_phone, &message)
            .await;

        let mut updated = reservation.clone();
        updated.notification_sent = true;
        updated.notification_sent_at = Some(Utc::now());
        self.save(&updated).await
    }

    /// Transition a reservation's status, applying the side effects of the
    /// target state (seating, queueing, no-show tracking).
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the reservation doesn't exist, or
    /// [`CoreError::BusinessRule`] if the transition isn't allowed from the
    /// current state.
    pub async fn update_status(
        &self,
        store_id: &str,
        user_id: &str,
        reservation_id: Uuid,
        status: ReservationStatus,
        reason: Option<String>,
    ) -> CoreResult<Reservation> {
        let mut reservation = self.load(store_id, reservation_id).await?;
        let old_status = reservation.status;
        if !old_status.can_transition_to(status) {
            return Err(CoreError::BusinessRule(format!(
                "reservation {reservation_id} cannot move from {old_status:?} to {status:?}"
            )));
        }

        reservation.status = status;
        stamp_status_timestamp(&mut reservation, status);
        if status == ReservationStatus::Cancelled {
            reservation.cancellation_reason = reason.clone();
        }
        reservation.touch();
        self.save(&reservation).await?;

        match status {
            ReservationStatus::Arrived => {
                reservation = if reservation.assigned_tables.is_empty() {
                    self.enqueue_arrival(reservation).await?
                } else {
                    self.seat_arrival(reservation).await?
                };
            }
            ReservationStatus::NoShow => {
                tracing::info!(reservation_id = %reservation.id, customer_id = ?reservation.customer_id, "tracking no-show");
            }
            _ => {}
        }

        self.inner
            .audit
            .log(
                AuditAction::Update,
                if status == ReservationStatus::NoShow { AuditSeverity::Warning } else { AuditSeverity::Info },
                LogRequest {
                    entity_type: "reservation".to_string(),
                    entity_id: Some(reservation.id.to_string()),
                    user_id: user_id.to_string(),
                    terminal_id: "system".to_string(),
                    description: format!("reservation {reservation_id} moved from {old_status:?} to {status:?}"),
                    metadata: reason.map(|r| json!({"reason": r})),
                    ..LogRequest::default()
                },
            )
            .await;
        self.publish("reservation-events", "UPDATE", &reservation);

        Ok(reservation)
    }

    async fn seat_arrival(&self, mut reservation: Reservation) -> CoreResult<Reservation> {
        reservation.status = ReservationStatus::Seated;
        reservation.seated_at = Some(Utc::now());
        reservation.touch();
        self.save(&reservation).await?;
        Ok(reservation)
    }

    async fn enqueue_arrival(&self, mut reservation: Reservation) -> CoreResult<Reservation> {
        let entry = self
            .inner
            .queue
            .add_to_queue(
                &reservation.store_id,
                reservation.customer_id.map(|id| id.to_string()).as_deref().unwrap_or("system"),
                QueueEntryCreate {
                    customer_name: reservation.customer_name.clone(),
                    customer_phone: reservation.customer_phone.clone(),
                    customer_id: reservation.customer_id,
                    party_size: reservation.party_size,
                    table_preferences: Vec::new(),
                    notification_method: NotificationMethod::Sms,
                    notes: Some(format!("Reservation {}", reservation.confirmation_code)),
                },
            )
            .await?;
        reservation.queue_entry_id = Some(entry.id);
        self.save(&reservation).await?;
        Ok(reservation)
    }

    /// Manually assign tables, verifying each is free under the conflict
    /// rule (overlapping window + shared table) against every other active
    /// reservation.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the reservation doesn't exist, or
    /// [`CoreError::Conflict`] if any requested table collides.
    pub async fn assign_tables(&self, store_id: &str, reservation_id: Uuid, table_ids: Vec<Uuid>) -> CoreResult<Reservation> {
        let mut reservation = self.load(store_id, reservation_id).await?;
        let candidate = Reservation { assigned_tables: table_ids.clone(), ..reservation.clone() };

        let others = self.reservations_overlapping_date(store_id, reservation.reservation_date, Some(reservation.id)).await?;
        if others.iter().any(|other| candidate.conflicts_with(other)) {
            return Err(CoreError::Conflict("one or more tables are already booked for this window".to_string()));
        }

        reservation.assigned_tables = table_ids;
        reservation.touch();
        self.save(&reservation).await?;
        self.publish("reservation-events", "UPDATE", &reservation);
        Ok(reservation)
    }

    /// Fetch a single reservation by id.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if it doesn't exist.
    pub async fn get_reservation(&self, store_id: &str, reservation_id: Uuid) -> CoreResult<Reservation> {
        self.load(store_id, reservation_id).await
    }

    /// List reservations for a specific date, sorted by time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on a storage failure.
    pub async fn get_reservations_by_date(
        &self,
        store_id: &str,
        date: NaiveDate,
        status: Option<ReservationStatus>,
    ) -> CoreResult<Vec<Reservation>> {
        let documents = self
            .inner
            .store
            .query(COLLECTION, &Query::new().eq("store_id", store_id).eq("reservation_date", date.to_string()))
            .await?;
        let mut reservations: Vec<Reservation> = documents
            .into_iter()
            .filter_map(|document| serde_json::from_value(document).ok())
            .filter(|r: &Reservation| status.is_none_or(|s| r.status == s))
            .collect();
        reservations.sort_by_key(|r| r.reservation_time);
        Ok(reservations)
    }

    /// List `CONFIRMED`/`PENDING` reservations within `hours_ahead` of now.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on a storage failure.
    pub async fn get_upcoming_reservations(&self, store_id: &str, hours_ahead: i64) -> CoreResult<Vec<Reservation>> {
        let documents = self
            .inner
            .store
            .query(
                COLLECTION,
                &Query::new()
                    .eq("store_id", store_id)
                    .in_("status", vec![json!("CONFIRMED"), json!("PENDING")]),
            )
            .await?;
        let now = Utc::now().naive_utc();
        let horizon = now + chrono::Duration::hours(hours_ahead);
        let mut reservations: Vec<Reservation> = documents
            .into_iter()
            .filter_map(|document| serde_json::from_value::<Reservation>(document).ok())
            .filter(|r| {
                let at = r.reservation_datetime();
                at >= now && at <= horizon
            })
            .collect();
        reservations.sort_by_key(Reservation::reservation_datetime);
        Ok(reservations)
    }

    /// Sweep `CONFIRMED` reservations whose booked time is more than
    /// `no_show_grace_minutes` in the past to `NO_SHOW`. Returns how many
    /// were transitioned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on a storage failure.
    pub async fn process_no_shows(&self, store_id: &str) -> CoreResult<usize> {
        let settings = self.settings_for(store_id).await;
        let cutoff = Utc::now().naive_utc() - chrono::Duration::minutes(settings.no_show_grace_minutes);

        let documents = self
            .inner
            .store
            .query(
                COLLECTION,
                &Query::new().eq("store_id", store_id).eq("status", "CONFIRMED"),
            )
            .await?;
        let overdue: Vec<Uuid> = documents
            .into_iter()
            .filter_map(|document| serde_json::from_value::<Reservation>(document).ok())
            .filter(|r| r.reservation_datetime() < cutoff)
            .map(|r| r.id)
            .collect();

        let mut swept = 0;
        for reservation_id in overdue {
            self.update_status(store_id, "system", reservation_id, ReservationStatus::NoShow, None)
                .await?;
            swept += 1;
        }
        Ok(swept)
    }

    /// Aggregate statistics over `[start_date, end_date]` (inclusive),
    /// defaulting to the trailing 30 days.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on a storage failure.
    pub async fn get_statistics(
        &self,
        store_id: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> CoreResult<ReservationStatistics> {
        let today = Utc::now().naive_utc().date();
        let start_date = start_date.unwrap_or_else(|| today - chrono::Duration::days(30));
        let end_date = end_date.unwrap_or(today);

        let documents = self
            .inner
            .store
            .query(
                COLLECTION,
                &Query::new().eq("store_id", store_id).gte("reservation_date", start_date.to_string()).lte("reservation_date", end_date.to_string()),
            )
            .await?;
        let reservations: Vec<Reservation> =
            documents.into_iter().filter_map(|document| serde_json::from_value(document).ok()).collect();

        let total = reservations.len();
        let confirmed = reservations.iter().filter(|r| r.status == ReservationStatus::Confirmed).count();
        let pending = reservations.iter().filter(|r| r.status == ReservationStatus::Pending).count();
        let no_shows = reservations.iter().filter(|r| r.status == ReservationStatus::NoShow).count();
        let cancelled = reservations.iter().filter(|r| r.status == ReservationStatus::Cancelled).count();

        #[allow(clippy::cast_precision_loss)]
        let rate = |count: usize| if total == 0 { 0.0 } else { count as f64 / total as f64 * 100.0 };

        let week_start = today - chrono::Duration::days(i64::from(today.weekday().num_days_from_monday()));
        let month_start = today.with_day(1).unwrap_or(today);

        let today_count = reservations.iter().filter(|r| r.reservation_date == today).count();
        let this_week = reservations.iter().filter(|r| r.reservation_date >= week_start).count();
        let this_month = reservations.iter().filter(|r| r.reservation_date >= month_start).count();

        #[allow(clippy::cast_precision_loss)]
        let average_party_size = if total == 0 {
            0.0
        } else {
            reservations.iter().map(|r| f64::from(r.party_size)).sum::<f64>() / total as f64
        };
        #[allow(clippy::cast_precision_loss)]
        let average_duration_minutes = if total == 0 {
            0.0
        } else {
            reservations.iter().map(|r| f64::from(r.duration_minutes)).sum::<f64>() / total as f64
        };

        let mut hour_counts: HashMap<u32, usize> = HashMap::new();
        let mut day_counts: HashMap<String, usize> = HashMap::new();
        for reservation in &reservations {
            *hour_counts.entry(reservation.reservation_time.hour()).or_insert(0) += 1;
            *day_counts.entry(weekday_name(reservation.reservation_date).to_string()).or_insert(0) += 1;
        }
        let mut peak_hours: Vec<u32> = hour_counts.keys().copied().collect();
        peak_hours.sort_by_key(|hour| std::cmp::Reverse(hour_counts[hour]));
        peak_hours.truncate(3);
        let mut popular_days: Vec<String> = day_counts.keys().cloned().collect();
        popular_days.sort_by_key(|day| std::cmp::Reverse(day_counts[day]));
        popular_days.truncate(3);

        let total_deposits = reservations.iter().filter(|r| r.deposit_paid).filter_map(|r| r.deposit_amount).sum();
        let pending_deposits = reservations.iter().filter(|r| !r.deposit_paid).filter_map(|r| r.deposit_amount).sum();
        let refunded_deposits = reservations.iter().filter(|r| r.deposit_refunded).filter_map(|r| r.deposit_amount).sum();

        Ok(ReservationStatistics {
            total_reservations: total,
            confirmed,
            pending,
            no_shows,
            cancelled,
            no_show_rate: rate(no_shows),
            cancellation_rate: rate(cancelled),
            confirmation_rate: rate(confirmed),
            today: today_count,
            this_week,
            this_month,
            average_party_size,
            average_duration_minutes,
            peak_hours,
            popular_days,
            total_deposits,
            pending_deposits,
            refunded_deposits,
        })
    }
}

fn stamp_status_timestamp(reservation: &mut Reservation, status: ReservationStatus) {
    let now = Utc::now();
    match status {
        ReservationStatus::Confirmed => reservation.confirmed_at = Some(now),
        ReservationStatus::Arrived => reservation.arrived_at = Some(now),
        ReservationStatus::Seated => reservation.seated_at = Some(now),
        ReservationStatus::Completed => reservation.completed_at = Some(now),
        ReservationStatus::Cancelled => reservation.cancelled_at = Some(now),
        ReservationStatus::Pending | ReservationStatus::NoShow => {}
    }
}

fn next_recurrence_date(current: NaiveDate, recurrence: RecurrenceType) -> Option<NaiveDate> {
    match recurrence {
        RecurrenceType::None => None,
        RecurrenceType::Daily => current.succ_opt(),
        RecurrenceType::Weekly => current.checked_add_days(Days::new(7)),
        RecurrenceType::Monthly => add_one_month_clamped(current),
    }
}

fn add_one_month_clamped(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = if date.month() == 12 { (date.year() + 1, 1) } else { (date.year(), date.month() + 1) };
    let mut day = date.day();
    loop {
        if let Some(next) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(next);
        }
        day = day.checked_sub(1)?;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pos_audit::AuditConfig;
    use pos_core::{InMemoryDocumentStore, InMemoryEventBus};
    use pos_notification::NotificationConfig;

    async fn test_audit() -> AuditLogger {
        let dir = tempfile::tempdir().expect("tempdir");
        AuditLogger::start(AuditConfig { log_dir: dir.keep(), ..AuditConfig::default() }).await.expect("audit logger starts")
    }

    async fn test_service() -> ReservationService {
        let store = Arc::new(InMemoryDocumentStore::new());
        let events: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let audit = test_audit().await;
        let notifications = NotificationGateway::new(NotificationConfig::default());
        let queue = QueueService::new(store.clone(), notifications.clone(), audit.clone(), events.clone());
        ReservationService::new(store, notifications, audit, events, queue)
    }

    fn tomorrow_at(hour: u32) -> (NaiveDate, NaiveTime) {
        let date = (Utc::now() + chrono::Duration::days(2)).date_naive();
        (date, NaiveTime::from_hms_opt(hour, 0, 0).unwrap())
    }

    fn create(date: NaiveDate, time: NaiveTime, party_size: u32) -> ReservationCreate {
        ReservationCreate {
            customer_name: "Ana".to_string(),
            customer_phone: "5511999990000".to_string(),
            customer_email: None,
            customer_id: None,
            party_size,
            reservation_date: date,
            reservation_time: time,
            duration_minutes: None,
            table_preferences: Vec::new(),
            special_requests: None,
            source: ReservationSource::Phone,
            deposit_amount: None,
            recurrence: RecurrenceType::None,
            recurrence_end_date: None,
            auto_confirm: false,
            assigned_tables: None,
        }
    }

    #[tokio::test]
    async fn create_reservation_starts_pending_by_default() {
        let service = test_service().await;
        let (date, time) = tomorrow_at(19);
        let reservation = service.create_reservation("store-1", "host", create(date, time, 4), &[], 10).await.unwrap();
        assert_eq!(reservation.status, ReservationStatus::Pending);
        assert_eq!(reservation.confirmation_code.len(), CONFIRMATION_CODE_LEN);
    }

    #[tokio::test]
    async fn create_reservation_rejects_insufficient_advance_notice() {
        let service = test_service().await;
        let now = Utc::now();
        let result = service
            .create_reservation("store-1", "host", create(now.date_naive(), now.time(), 2), &[], 10)
            .await;
        assert!(matches!(result, Err(CoreError::BusinessRule(_))));
    }

    #[tokio::test]
    async fn create_reservation_rejects_when_no_tables_fit() {
        let service = test_service().await;
        let (date, time) = tomorrow_at(19);
        // Pin total_tables to 0 so ceil(party_size/4) can never be satisfied.
        let result = service.create_reservation("store-1", "host", create(date, time, 4), &[], 0).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn update_status_rejects_an_illegal_transition() {
        let service = test_service().await;
        let (date, time) = tomorrow_at(19);
        let reservation = service.create_reservation("store-1", "host", create(date, time, 2), &[], 10).await.unwrap();
        let result = service.update_status("store-1", "host", reservation.id, ReservationStatus::Seated, None).await;
        assert!(matches!(result, Err(CoreError::BusinessRule(_))));
    }

    #[tokio::test]
    async fn arriving_without_assigned_tables_enqueues_the_party() {
        let service = test_service().await;
        let (date, time) = tomorrow_at(19);
        let reservation = service.create_reservation("store-1", "host", create(date, time, 2), &[], 10).await.unwrap();
        service.update_status("store-1", "host", reservation.id, ReservationStatus::Confirmed, None).await.unwrap();
        let arrived = service.update_status("store-1", "host", reservation.id, ReservationStatus::Arrived, None).await.unwrap();
        assert!(arrived.queue_entry_id.is_some());
        assert_eq!(arrived.status, ReservationStatus::Arrived);
    }

    #[tokio::test]
    async fn arriving_with_assigned_tables_seats_immediately() {
        let service = test_service().await;
        let (date, time) = tomorrow_at(19);
        let table_id = Uuid::new_v4();
        let mut data = create(date, time, 2);
        data.assigned_tables = Some(vec![table_id]);
        let reservation = service.create_reservation("store-1", "host", data, &[], 10).await.unwrap();
        service.update_status("store-1", "host", reservation.id, ReservationStatus::Confirmed, None).await.unwrap();
        let arrived = service.update_status("store-1", "host", reservation.id, ReservationStatus::Arrived, None).await.unwrap();
        assert_eq!(arrived.status, ReservationStatus::Seated);
        assert!(arrived.seated_at.is_some());
    }

    #[tokio::test]
    async fn assign_tables_rejects_a_table_already_booked_for_an_overlapping_window() {
        let service = test_service().await;
        let (date, time) = tomorrow_at(19);
        let table_id = Uuid::new_v4();

        let mut first_data = create(date, time, 2);
        first_data.assigned_tables = Some(vec![table_id]);
        service.create_reservation("store-1", "host", first_data, &[], 10).await.unwrap();

        let second = service.create_reservation("store-1", "host", create(date, time, 2), &[], 10).await.unwrap();
        let result = service.assign_tables("store-1", second.id, vec![table_id]).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn closed_day_reports_fully_booked_with_a_reason() {
        let service = test_service().await;
        let mut settings = ReservationSettings::default();
        settings.operating_hours.remove("monday");
        service.configure_store("store-1", settings).await;

        let mut date = Utc::now().date_naive();
        while date.weekday() != Weekday::Mon {
            date = date.succ_opt().unwrap();
        }
        let availability = service.check_availability("store-1", date, 2, 10).await.unwrap();
        assert!(availability.fully_booked);
        assert!(availability.restrictions.is_some());
    }

    #[tokio::test]
    async fn process_no_shows_sweeps_overdue_confirmed_reservations() {
        let service = test_service().await;
        let mut settings = ReservationSettings::default();
        settings.min_advance_hours = -1;
        settings.no_show_grace_minutes = 0;
        service.configure_store("store-1", settings).await;

        let past = Utc::now() - chrono::Duration::minutes(5);
        let reservation = service
            .create_reservation("store-1", "host", create(past.date_naive(), past.time(), 2), &[], 10)
            .await
            .unwrap();
        service.update_status("store-1", "host", reservation.id, ReservationStatus::Confirmed, None).await.unwrap();

        let swept = service.process_no_shows("store-1").await.unwrap();
        assert_eq!(swept, 1);
        let reloaded = service.get_reservation("store-1", reservation.id).await.unwrap();
        assert_eq!(reloaded.status, ReservationStatus::NoShow);
    }

    #[test]
    fn score_tables_packs_smallest_sufficient_combination_by_score() {
        let tables = vec![
            TableCandidate { id: Uuid::new_v4(), number: 1, capacity: 2, features: vec![] },
            TableCandidate { id: Uuid::new_v4(), number: 2, capacity: 6, features: vec![TablePreference::Window] },
        ];
        let allocation = score_tables(6, &[TablePreference::Window], &tables).unwrap();
        assert_eq!(allocation.table_numbers, vec![2]);
        assert!(!allocation.combined);
    }

    #[test]
    fn score_tables_returns_none_when_capacity_cannot_be_met() {
        let tables = vec![TableCandidate { id: Uuid::new_v4(), number: 1, capacity: 2, features: vec![] }];
        assert!(score_tables(8, &[], &tables).is_none());
    }

    #[test]
    fn table_preference_wire_format_matches_single_word_variants() {
        assert_eq!(serde_json::to_value(TablePreference::HighChair).unwrap(), json!("HIGHCHAIR"));
        assert_eq!(serde_json::to_value(TablePreference::WheelChair).unwrap(), json!("WHEELCHAIR"));
        assert_eq!(serde_json::to_value(ReservationSource::WhatsApp).unwrap(), json!("WHATSAPP"));
        assert_eq!(serde_json::to_value(ReservationSource::WalkIn).unwrap(), json!("WALK_IN"));
    }

    #[test]
    fn monthly_recurrence_clamps_at_month_end() {
        let jan_31 = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let next = next_recurrence_date(jan_31, RecurrenceType::Monthly).unwrap();
        assert_eq!(next, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }
}
