//! Walk-in waiting list: admission, notification, no-show sweep, wait-time
//! estimation, table suggestion and statistics.
//!
//! Entries persist through `pos_core::DocumentStore`; the ordered wait list
//! itself and the rolling analytics window live as in-process state owned
//! by this service and touched only through its own methods, the same
//! discipline `pos-sync`'s hub and `pos-concurrency`'s lease map use (spec
//! §5: "only the owning task/lock touches shared mutable state").

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use pos_audit::{AuditAction, AuditLogger, AuditSeverity, LogRequest};
use pos_core::{CoreError, CoreResult, DocumentStore, DomainEvent, Entity, EventBus, Query, TaskRegistry};
use pos_notification::{NotificationGateway, NotificationMethod};

const COLLECTION: &str = "queue_entries";
const DEFAULT_NO_SHOW_TIMEOUT_MINUTES: i64 = 15;
const ANALYTICS_WINDOW: usize = 1000;
const HISTORY_SAMPLE: usize = 20;
const BASE_MINUTES_PER_PARTY: f64 = 15.0;
const MINIMUM_ESTIMATE_MINUTES: i64 = 5;

/// Coarse party-size bucket used for statistics breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartySize {
    /// 1-2 guests.
    Small,
    /// 3-4 guests.
    Medium,
    /// 5-6 guests.
    Large,
    /// 7 or more guests.
    #[serde(rename = "XLARGE")]
    XLarge,
}

impl PartySize {
    /// Classify a raw party size into its bucket.
    #[must_use]
    pub const fn for_count(count: u32) -> Self {
        match count {
            0..=2 => Self::Small,
            3..=4 => Self::Medium,
            5..=6 => Self::Large,
            _ => Self::XLarge,
        }
    }

    const fn as_key(self) -> &'static str {
        match self {
            Self::Small => "SMALL",
            Self::Medium => "MEDIUM",
            Self::Large => "LARGE",
            Self::XLarge => "XLARGE",
        }
    }
}

/// Lifecycle state of a queue entry.
///
/// Transitions: `WAITING -> NOTIFIED -> (SEATED | NO_SHOW)`, and
/// `(WAITING | NOTIFIED) -> CANCELLED`. `SEATED`, `NO_SHOW` and `CANCELLED`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    /// Waiting for a table, holds a position.
    Waiting,
    /// Notified that a table is ready; no-show timer running.
    Notified,
    /// Seated at a table. Terminal.
    Seated,
    /// Withdrew or was removed before being seated. Terminal.
    Cancelled,
    /// Notified but never arrived within the no-show timeout. Terminal.
    NoShow,
}

impl QueueStatus {
    const fn holds_a_position(self) -> bool {
        matches!(self, Self::Waiting | Self::Notified)
    }

    const fn is_terminal(self) -> bool {
        matches!(self, Self::Seated | Self::Cancelled | Self::NoShow)
    }
}

/// A customer waiting for a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique id.
    pub id: Uuid,
    /// Store this entry belongs to.
    pub store_id: String,
    /// Customer's name.
    pub customer_name: String,
    /// Customer's phone, as supplied (not yet normalized).
    pub customer_phone: String,
    /// Linked customer record, if known.
    pub customer_id: Option<Uuid>,
    /// Number of guests.
    pub party_size: u32,
    /// Bucket derived from `party_size`.
    pub party_size_category: PartySize,
    /// Current lifecycle state.
    pub status: QueueStatus,
    /// 1-based position among `WAITING`/`NOTIFIED` entries; 0 once the entry
    /// leaves the wait list.
    pub position_in_queue: usize,
    /// Seating features the customer asked for (e.g. `"window"`, `"booth"`).
    pub table_preferences: Vec<String>,
    /// Channel used to notify this customer.
    pub notification_method: NotificationMethod,
    /// Free-form host notes.
    pub notes: Option<String>,
    /// When the customer checked in.
    pub check_in_time: DateTime<Utc>,
    /// Wait estimate recorded at check-in time.
    pub estimated_wait_minutes: i64,
    /// When the customer was notified, if they were.
    pub notification_time: Option<DateTime<Utc>>,
    /// When the customer was seated, if they were.
    pub seated_time: Option<DateTime<Utc>>,
    /// Table assigned at seating time, if any.
    pub assigned_table_id: Option<Uuid>,
    /// Staff member who seated this entry, if recorded.
    pub assigned_by: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version.
    pub version: u64,
}

impl QueueEntry {
    /// Actual minutes between check-in and seating, once seated.
    #[must_use]
    pub fn actual_wait_minutes(&self) -> Option<i64> {
        self.seated_time
            .map(|seated| (seated - self.check_in_time).num_minutes())
    }
}

impl Entity for QueueEntry {
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

/// Input to [`QueueService::add_to_queue`].
#[derive(Debug, Clone, Deserialize)]
pub struct QueueEntryCreate {
    /// Customer's name.
    pub customer_name: String,
    /// Customer's phone, in any reasonable format.
    pub customer_phone: String,
    /// Linked customer record, if known.
    pub customer_id: Option<Uuid>,
    /// Number of guests.
    pub party_size: u32,
    /// Seating preferences.
    pub table_preferences: Vec<String>,
    /// Channel to notify this customer through.
    pub notification_method: NotificationMethod,
    /// Free-form host notes.
    pub notes: Option<String>,
}

/// Result of [`QueueService::estimate_wait_time`].
#[derive(Debug, Clone, Serialize)]
pub struct WaitTimeEstimate {
    /// Party size the estimate is for.
    pub party_size: u32,
    /// Estimated wait, floored at `MINIMUM_ESTIMATE_MINUTES`.
    pub estimated_minutes: i64,
    /// 0.7 once historical samples exist, 0.4 otherwise.
    pub confidence_level: f64,
    /// Inputs the estimate was derived from, for display/debugging.
    pub factors: Value,
}

/// Result of [`QueueService::get_position`].
#[derive(Debug, Clone, Serialize)]
pub struct QueuePosition {
    /// 1-based position among current `WAITING`/`NOTIFIED` entries.
    pub position: usize,
    /// Number of parties ahead of this one.
    pub total_ahead: usize,
    /// Current wait estimate for this entry.
    pub estimated_wait_minutes: i64,
    /// Current lifecycle state.
    pub status: QueueStatus,
    /// When this entry was last updated.
    pub last_updated: DateTime<Utc>,
}

/// A table the caller is considering offering, scored by
/// [`QueueService::suggest_tables`] / [`score_tables`].
#[derive(Debug, Clone, Deserialize)]
pub struct TableCandidate {
    /// Table id.
    pub id: Uuid,
    /// Human-facing table number.
    pub number: u32,
    /// Seats at the table.
    pub seats: u32,
    /// Features of the table (e.g. `"window"`, `"booth"`, `"patio"`).
    pub features: Vec<String>,
}

/// One scored table recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct TableSuggestion {
    /// Candidate table id.
    pub table_id: Uuid,
    /// Human-facing table number.
    pub table_number: u32,
    /// Score in `[0.0, 1.0]`; higher is a better fit.
    pub score: f64,
    /// Human-readable reasons contributing to the score.
    pub reasons: Vec<String>,
}

/// Aggregated queue statistics, see [`QueueService::get_statistics`].
#[derive(Debug, Clone, Serialize, Default)]
pub struct QueueStatistics {
    /// Entries currently `WAITING` or `NOTIFIED`.
    pub total_in_queue: usize,
    /// Mean actual wait, in minutes, over recorded seatings.
    pub average_wait_time: f64,
    /// Longest actual wait recorded, in minutes.
    pub longest_wait: Option<i64>,
    /// Breakdown of currently-waiting parties by size bucket.
    pub parties_by_size: HashMap<String, usize>,
    /// Sum of current estimates for everyone still waiting.
    pub estimated_total_clear_time: i64,
    /// Fraction of notified entries that became `NO_SHOW`.
    pub no_show_rate: f64,
    /// Mean relative error of estimates vs. actual waits, over the last 50
    /// seated samples; `None` until at least one sample exists.
    pub accuracy_last_24h: Option<f64>,
}

#[derive(Debug, Clone)]
struct AnalyticsSample {
    actual_wait_minutes: i64,
    estimated_wait_minutes: i64,
    no_show: bool,
}

/// Pure table-scoring function underlying [`QueueService::suggest_tables`].
///
/// Base score 0.5 for a table that seats the party, +0.3 for an exact seat
/// match, +0.1 per satisfied preference, clamped to 1.0. Tables too small
/// for the party are discarded. Returns at most 5 candidates, highest score
/// first, ties broken by lower table number.
#[must_use]
pub fn score_tables(party_size: u32, preferences: &[String], tables: &[TableCandidate]) -> Vec<TableSuggestion> {
    let mut suggestions: Vec<TableSuggestion> = tables
        .iter()
        .filter(|table| table.seats >= party_size)
        .map(|table| {
            let mut score = 0.5_f64;
            let mut reasons = vec!["seats the party".to_string()];
            if table.seats == party_size {
                score += 0.3;
                reasons.push("exact seat match".to_string());
            }
            for preference in preferences {
                if table.features.contains(preference) {
                    score += 0.1;
                    reasons.push(format!("matches preference: {preference}"));
                }
            }
            TableSuggestion {
                table_id: table.id,
                table_number: table.number,
                score: score.min(1.0),
                reasons,
            }
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.table_number.cmp(&b.table_number))
    });
    suggestions.truncate(5);
    suggestions
}

const fn size_factor(party_size: u32) -> f64 {
    match party_size {
        0..=4 => 1.0,
        5..=6 => 1.3,
        _ => 1.5,
    }
}

/// Pure wait-time estimator underlying [`QueueService::estimate_wait_time`].
///
/// `estimated_minutes = 15 * queue_length * size_factor`, blended evenly with
/// the mean of `recent_actual_minutes` when any history is available
/// (confidence 0.7) and left unblended otherwise (confidence 0.4). Floored at
/// `MINIMUM_ESTIMATE_MINUTES`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimate_wait(party_size: u32, queue_length: usize, recent_actual_minutes: &[i64]) -> WaitTimeEstimate {
    let factor = size_factor(party_size);
    let base_minutes = BASE_MINUTES_PER_PARTY * queue_length as f64 * factor;

    let (estimated, confidence) = if recent_actual_minutes.is_empty() {
        (base_minutes, 0.4)
    } else {
        let history_mean =
            recent_actual_minutes.iter().sum::<i64>() as f64 / recent_actual_minutes.len() as f64;
        ((base_minutes + history_mean) / 2.0, 0.7)
    };

    WaitTimeEstimate {
        party_size,
        estimated_minutes: (estimated.round() as i64).max(MINIMUM_ESTIMATE_MINUTES),
        confidence_level: confidence,
        factors: json!({
            "queue_length": queue_length,
            "size_factor": factor,
            "historical_samples": recent_actual_minutes.len(),
        }),
    }
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    notifications: NotificationGateway,
    audit: AuditLogger,
    events: Arc<dyn EventBus>,
    tasks: TaskRegistry,
    queue_order: RwLock<Vec<Uuid>>,
    analytics: RwLock<VecDeque<AnalyticsSample>>,
    no_show_timeout: Duration,
}

/// The walk-in waiting list. Cheap to clone; every clone shares the same
/// underlying queue order, analytics window and no-show timers.
#[derive(Clone)]
pub struct QueueService {
    inner: Arc<Inner>,
}

impl QueueService {
    /// Build a service with the default 15 minute no-show timeout.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifications: NotificationGateway,
        audit: AuditLogger,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self::with_no_show_timeout(
            store,
            notifications,
            audit,
            events,
            Duration::from_secs(u64::try_from(DEFAULT_NO_SHOW_TIMEOUT_MINUTES * 60).unwrap_or(900)),
        )
    }

    /// Build a service with an explicit no-show timeout (tests use a short
    /// one to avoid real-time waits).
    #[must_use]
    pub fn with_no_show_timeout(
        store: Arc<dyn DocumentStore>,
        notifications: NotificationGateway,
        audit: AuditLogger,
        events: Arc<dyn EventBus>,
        no_show_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                notifications,
                audit,
                events,
                tasks: TaskRegistry::new(),
                queue_order: RwLock::new(Vec::new()),
                analytics: RwLock::new(VecDeque::new()),
                no_show_timeout,
            }),
        }
    }

    fn no_show_key(entry_id: Uuid) -> String {
        format!("queue:no_show:{entry_id}")
    }

    async fn load(&self, store_id: &str, id: Uuid) -> CoreResult<QueueEntry> {
        let document = self
            .inner
            .store
            .get(COLLECTION, &id.to_string())
            .await?
            .ok_or_else(|| CoreError::not_found("queue_entry", id.to_string()))?;
        let entry: QueueEntry = serde_json::from_value(document)
            .map_err(|e| CoreError::Internal(format!("corrupt queue entry {id}: {e}")))?;
        if entry.store_id != store_id {
            return Err(CoreError::not_found("queue_entry", id.to_string()));
        }
        Ok(entry)
    }

    async fn save(&self, entry: &QueueEntry) -> CoreResult<()> {
        let document = serde_json::to_value(entry)
            .map_err(|e| CoreError::Internal(format!("failed to serialize queue entry: {e}")))?;
        self.inner.store.upsert(COLLECTION, &entry.id.to_string(), document).await
    }

    fn publish(&self, topic: &str, action: &str, entry: &QueueEntry) {
        let payload = serde_json::to_value(entry).unwrap_or(Value::Null);
        self.inner.events.publish(DomainEvent::new(
            topic,
            "queue_entry",
            entry.id.to_string(),
            action,
            payload,
        ));
    }

    /// Add a party to the wait list, assigning it the last position.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if `party_size` is zero, or
    /// [`CoreError::Conflict`] if this phone number already has a
    /// `WAITING`/`NOTIFIED` entry in `store_id`.
    pub async fn add_to_queue(&self, store_id: &str, user_id: &str, input: QueueEntryCreate) -> CoreResult<QueueEntry> {
        if input.party_size == 0 {
            return Err(CoreError::Validation("party_size must be at least 1".to_string()));
        }

        let existing = self
            .inner
            .store
            .query(
                COLLECTION,
                &Query::new()
                    .eq("store_id", store_id)
                    .eq("customer_phone", input.customer_phone.as_str()),
            )
            .await?;
        let already_waiting = existing.into_iter().any(|document| {
            serde_json::from_value::<QueueEntry>(document).is_ok_and(|e| e.status.holds_a_position())
        });
        if already_waiting {
            return Err(CoreError::Conflict(format!(
                "{} is already in the queue",
                input.customer_phone
            )));
        }

        let queue_length = self.inner.queue_order.read().await.len();
        let history = self.recent_actual_waits().await;
        let estimate = estimate_wait(input.party_size, queue_length, &history);

        let now = Utc::now();
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            store_id: store_id.to_string(),
            customer_name: input.customer_name,
            customer_phone: input.customer_phone,
            customer_id: input.customer_id,
            party_size: input.party_size,
            party_size_category: PartySize::for_count(input.party_size),
            status: QueueStatus::Waiting,
            position_in_queue: queue_length + 1,
            table_preferences: input.table_preferences,
            notification_method: input.notification_method,
            notes: input.notes,
            check_in_time: now,
            estimated_wait_minutes: estimate.estimated_minutes,
            notification_time: None,
            seated_time: None,
            assigned_table_id: None,
            assigned_by: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        self.save(&entry).await?;
        self.inner.queue_order.write().await.push(entry.id);

        self.inner
            .audit
            .log(
                AuditAction::Create,
                AuditSeverity::Info,
                LogRequest {
                    entity_type: "queue_entry".to_string(),
                    entity_id: Some(entry.id.to_string()),
                    user_id: user_id.to_string(),
                    terminal_id: "system".to_string(),
                    description: format!("{} joined the queue (party of {})", entry.customer_name, entry.party_size),
                    new_value: serde_json::to_value(&entry).ok(),
                    ..LogRequest::default()
                },
            )
            .await;
        self.publish("queue-events", "CREATE", &entry);

        Ok(entry)
    }

    /// Notify a waiting entry that a table is ready, send the configured
    /// notification, and arm a no-show timer.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the entry doesn't exist, or
    /// [`CoreError::BusinessRule`] if it isn't currently `WAITING`.
    pub async fn notify_customer(&self, store_id: &str, user_id: &str, entry_id: Uuid) -> CoreResult<QueueEntry> {
        let mut entry = self.load(store_id, entry_id).await?;
        if entry.status != QueueStatus::Waiting {
            return Err(CoreError::BusinessRule(format!(
                "queue entry {entry_id} is {:?}, not WAITING",
                entry.status
            )));
        }

        entry.status = QueueStatus::Notified;
        entry.notification_time = Some(Utc::now());
        entry.touch();
        self.save(&entry).await?;

        let message = format!(
            "{}, your table for {} is ready! Please check in within {} minutes.",
            entry.customer_name,
            entry.party_size,
            self.inner.no_show_timeout.as_secs() / 60
        );
        self.inner
            .notifications
            .send(entry.id, entry.notification_method, &entry.customer_phone, &message)
            .await;

        self.inner
            .audit
            .log(
                AuditAction::Update,
                AuditSeverity::Info,
                LogRequest {
                    entity_type: "queue_entry".to_string(),
                    entity_id: Some(entry.id.to_string()),
                    user_id: user_id.to_string(),
                    terminal_id: "system".to_string(),
                    description: format!("{} notified that their table is ready", entry.customer_name),
                    ..LogRequest::default()
                },
            )
            .await;
        self.publish("queue-events", "UPDATE", &entry);

        self.arm_no_show_timer(store_id.to_string(), entry.id);

        Ok(entry)
    }

    fn arm_no_show_timer(&self, store_id: String, entry_id: Uuid) {
        let service = self.clone();
        let timeout = self.inner.no_show_timeout;
        self.inner.tasks.spawn(Self::no_show_key(entry_id), async move {
            tokio::time::sleep(timeout).await;
            if let Err(error) = service.mark_no_show(&store_id, "system", entry_id).await {
                tracing::warn!(%entry_id, %error, "no-show sweep could not transition entry");
            }
        });
    }

    /// Seat a notified (or still-waiting) entry at a table.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the entry doesn't exist, or
    /// [`CoreError::BusinessRule`] if it's already terminal.
    pub async fn seat_customer(
        &self,
        store_id: &str,
        user_id: &str,
        entry_id: Uuid,
        table_id: Uuid,
        seated_by: Uuid,
    ) -> CoreResult<QueueEntry> {
        let mut entry = self.load(store_id, entry_id).await?;
        if entry.status.is_terminal() {
            return Err(CoreError::BusinessRule(format!(
                "queue entry {entry_id} is already {:?}",
                entry.status
            )));
        }

        self.inner.tasks.cancel(&Self::no_show_key(entry_id));

        let now = Utc::now();
        entry.status = QueueStatus::Seated;
        entry.seated_time = Some(now);
        entry.assigned_table_id = Some(table_id);
        entry.assigned_by = Some(seated_by);
        entry.touch();
        self.save(&entry).await?;
        self.remove_from_order(entry.id).await;

        if let Some(actual) = entry.actual_wait_minutes() {
            self.record_analytics(actual, entry.estimated_wait_minutes, false).await;
        }

        self.inner
            .audit
            .log(
                AuditAction::Update,
                AuditSeverity::Info,
                LogRequest {
                    entity_type: "queue_entry".to_string(),
                    entity_id: Some(entry.id.to_string()),
                    user_id: user_id.to_string(),
                    terminal_id: "system".to_string(),
                    description: format!("{} seated at table {table_id}", entry.customer_name),
                    ..LogRequest::default()
                },
            )
            .await;
        self.publish("queue-events", "UPDATE", &entry);

        Ok(entry)
    }

    /// Transition a notified entry that never checked in to `NO_SHOW`. Idle
    /// (returns the entry unchanged) if it's not currently `NOTIFIED`, since
    /// both the no-show timer and a manual call can race a seating.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the entry doesn't exist.
    pub async fn mark_no_show(&self, store_id: &str, user_id: &str, entry_id: Uuid) -> CoreResult<QueueEntry> {
        let mut entry = self.load(store_id, entry_id).await?;
        if entry.status != QueueStatus::Notified {
            return Ok(entry);
        }

        entry.status = QueueStatus::NoShow;
        entry.touch();
        self.save(&entry).await?;
        self.remove_from_order(entry.id).await;

        let elapsed_minutes = (Utc::now() - entry.check_in_time).num_minutes();
        self.record_analytics(elapsed_minutes, entry.estimated_wait_minutes, true).await;

        self.inner
            .audit
            .log(
                AuditAction::Update,
                AuditSeverity::Warning,
                LogRequest {
                    entity_type: "queue_entry".to_string(),
                    entity_id: Some(entry.id.to_string()),
                    user_id: user_id.to_string(),
                    terminal_id: "system".to_string(),
                    description: format!("{} marked as a no-show", entry.customer_name),
                    ..LogRequest::default()
                },
            )
            .await;
        self.publish("queue-events", "UPDATE", &entry);

        Ok(entry)
    }

    /// Cancel a non-terminal entry (customer withdrew, or staff removed it).
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the entry doesn't exist, or
    /// [`CoreError::BusinessRule`] if it's already terminal.
    pub async fn cancel_entry(&self, store_id: &str, user_id: &str, entry_id: Uuid) -> CoreResult<QueueEntry> {
        let mut entry = self.load(store_id, entry_id).await?;
        if entry.status.is_terminal() {
            return Err(CoreError::BusinessRule(format!(
                "queue entry {entry_id} is already {:?}",
                entry.status
            )));
        }

        self.inner.tasks.cancel(&Self::no_show_key(entry_id));

        entry.status = QueueStatus::Cancelled;
        entry.touch();
        self.save(&entry).await?;
        self.remove_from_order(entry.id).await;

        self.inner
            .audit
            .log(
                AuditAction::Update,
                AuditSeverity::Info,
                LogRequest {
                    entity_type: "queue_entry".to_string(),
                    entity_id: Some(entry.id.to_string()),
                    user_id: user_id.to_string(),
                    terminal_id: "system".to_string(),
                    description: format!("{} removed from the queue", entry.customer_name),
                    ..LogRequest::default()
                },
            )
            .await;
        self.publish("queue-events", "UPDATE", &entry);

        Ok(entry)
    }

    /// Remove `entry_id` from the ordered wait list and renumber everyone
    /// behind it, persisting the new `position_in_queue` for each.
    ///
    /// Invariant: after this call, `position_in_queue` over the remaining
    /// `WAITING`/`NOTIFIED` entries is a permutation of `1..=k`.
    async fn remove_from_order(&self, entry_id: Uuid) {
        let mut order = self.inner.queue_order.write().await;
        order.retain(|id| *id != entry_id);
        let remaining = order.clone();
        drop(order);

        for (index, id) in remaining.iter().enumerate() {
            if let Ok(Some(document)) = self.inner.store.get(COLLECTION, &id.to_string()).await {
                if let Ok(mut entry) = serde_json::from_value::<QueueEntry>(document) {
                    let position = index + 1;
                    if entry.position_in_queue != position {
                        entry.position_in_queue = position;
                        let _ = self.save(&entry).await;
                    }
                }
            }
        }
    }

    async fn recent_actual_waits(&self) -> Vec<i64> {
        let analytics = self.inner.analytics.read().await;
        analytics
            .iter()
            .rev()
            .take(HISTORY_SAMPLE)
            .map(|sample| sample.actual_wait_minutes)
            .collect()
    }

    async fn record_analytics(&self, actual_wait_minutes: i64, estimated_wait_minutes: i64, no_show: bool) {
        let mut analytics = self.inner.analytics.write().await;
        analytics.push_back(AnalyticsSample {
            actual_wait_minutes,
            estimated_wait_minutes,
            no_show,
        });
        while analytics.len() > ANALYTICS_WINDOW {
            analytics.pop_front();
        }
    }

    /// List every entry in `store_id`, in check-in order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on a storage failure.
    pub async fn get_queue_list(&self, store_id: &str, status: Option<QueueStatus>) -> CoreResult<Vec<QueueEntry>> {
        let documents = self.inner.store.query(COLLECTION, &Query::new().eq("store_id", store_id)).await?;
        let mut entries: Vec<QueueEntry> = documents
            .into_iter()
            .filter_map(|document| serde_json::from_value(document).ok())
            .filter(|entry: &QueueEntry| status.is_none_or(|s| entry.status == s))
            .collect();
        entries.sort_by_key(|entry| entry.check_in_time);
        Ok(entries)
    }

    /// Current position and wait estimate for a single entry.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the entry doesn't exist.
    pub async fn get_position(&self, store_id: &str, entry_id: Uuid) -> CoreResult<QueuePosition> {
        let entry = self.load(store_id, entry_id).await?;
        Ok(QueuePosition {
            position: entry.position_in_queue,
            total_ahead: entry.position_in_queue.saturating_sub(1),
            estimated_wait_minutes: entry.estimated_wait_minutes,
            status: entry.status,
            last_updated: entry.updated_at,
        })
    }

    /// Estimate the wait for a new party of `party_size`, given the current
    /// queue length and recent history.
    pub async fn estimate_wait_time(&self, party_size: u32) -> WaitTimeEstimate {
        let queue_length = self.inner.queue_order.read().await.len();
        let history = self.recent_actual_waits().await;
        estimate_wait(party_size, queue_length, &history)
    }

    /// Score `tables` against the party waiting at `entry_id`.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the entry doesn't exist.
    pub async fn suggest_tables(
        &self,
        store_id: &str,
        entry_id: Uuid,
        tables: &[TableCandidate],
    ) -> CoreResult<Vec<TableSuggestion>> {
        let entry = self.load(store_id, entry_id).await?;
        Ok(score_tables(entry.party_size, &entry.table_preferences, tables))
    }

    /// Aggregate statistics across the live wait list and recent analytics.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on a storage failure.
    pub async fn get_statistics(&self, store_id: &str) -> CoreResult<QueueStatistics> {
        let waiting = self.get_queue_list(store_id, None).await?;
        let active: Vec<&QueueEntry> = waiting.iter().filter(|e| e.status.holds_a_position()).collect();

        let mut parties_by_size: HashMap<String, usize> = HashMap::new();
        for entry in &active {
            *parties_by_size.entry(entry.party_size_category.as_key().to_string()).or_insert(0) += 1;
        }

        let analytics = self.inner.analytics.read().await;
        let seated_samples: Vec<&AnalyticsSample> = analytics.iter().filter(|s| !s.no_show).collect();
        #[allow(clippy::cast_precision_loss)]
        let average_wait_time = if seated_samples.is_empty() {
            0.0
        } else {
            let sum: i64 = seated_samples.iter().map(|s| s.actual_wait_minutes).sum();
            sum as f64 / seated_samples.len() as f64
        };
        let longest_wait = seated_samples.iter().map(|s| s.actual_wait_minutes).max();

        let total_outcomes = analytics.len();
        let no_shows = analytics.iter().filter(|s| s.no_show).count();
        #[allow(clippy::cast_precision_loss)]
        let no_show_rate = if total_outcomes == 0 {
            0.0
        } else {
            no_shows as f64 / total_outcomes as f64
        };

        let recent: Vec<&AnalyticsSample> = analytics.iter().rev().take(50).collect();
        #[allow(clippy::cast_precision_loss)]
        let accuracy_last_24h = if recent.is_empty() {
            None
        } else {
            let mean_relative_error: f64 = recent
                .iter()
                .map(|s| {
                    let actual = (s.actual_wait_minutes.max(1)) as f64;
                    ((s.estimated_wait_minutes as f64) - actual).abs() / actual
                })
                .sum::<f64>()
                / recent.len() as f64;
            Some((1.0 - mean_relative_error).max(0.0))
        };

        let estimated_total_clear_time = active.iter().map(|entry| entry.estimated_wait_minutes).sum();

        Ok(QueueStatistics {
            total_in_queue: active.len(),
            average_wait_time,
            longest_wait,
            parties_by_size,
            estimated_total_clear_time,
            no_show_rate,
            accuracy_last_24h,
        })
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
        AuditLogger::start(AuditConfig {
            log_dir: dir.keep(),
            ..AuditConfig::default()
        })
        .await
        .expect("audit logger starts")
    }

    async fn test_service(no_show_timeout: Duration) -> QueueService {
        QueueService::with_no_show_timeout(
            Arc::new(InMemoryDocumentStore::new()),
            NotificationGateway::new(NotificationConfig::default()),
            test_audit().await,
            Arc::new(InMemoryEventBus::new()),
            no_show_timeout,
        )
    }

    fn create(name: &str, phone: &str, party_size: u32) -> QueueEntryCreate {
        QueueEntryCreate {
            customer_name: name.to_string(),
            customer_phone: phone.to_string(),
            customer_id: None,
            party_size,
            table_preferences: Vec::new(),
            notification_method: NotificationMethod::None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn add_to_queue_rejects_a_zero_party_size() {
        let service = test_service(Duration::from_secs(900)).await;
        let result = service.add_to_queue("store-1", "host-1", create("Ana", "5511999990000", 0)).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn add_to_queue_rejects_a_duplicate_phone_while_waiting() {
        let service = test_service(Duration::from_secs(900)).await;
        service.add_to_queue("store-1", "host-1", create("Ana", "5511999990000", 2)).await.unwrap();
        let result = service.add_to_queue("store-1", "host-1", create("Ana Again", "5511999990000", 4)).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn positions_form_a_permutation_after_removals() {
        let service = test_service(Duration::from_secs(900)).await;
        let a = service.add_to_queue("store-1", "host-1", create("A", "1", 2)).await.unwrap();
        let b = service.add_to_queue("store-1", "host-1", create("B", "2", 2)).await.unwrap();
        let c = service.add_to_queue("store-1", "host-1", create("C", "3", 2)).await.unwrap();
        assert_eq!((a.position_in_queue, b.position_in_queue, c.position_in_queue), (1, 2, 3));

        service.cancel_entry("store-1", "host-1", a.id).await.unwrap();

        let b_position = service.get_position("store-1", b.id).await.unwrap();
        let c_position = service.get_position("store-1", c.id).await.unwrap();
        assert_eq!(b_position.position, 1);
        assert_eq!(c_position.position, 2);
    }

    #[tokio::test]
    async fn notify_then_seat_records_an_actual_wait_sample() {
        let service = test_service(Duration::from_secs(900)).await;
        let entry = service.add_to_queue("store-1", "host-1", create("Ana", "1", 2)).await.unwrap();
        let notified = service.notify_customer("store-1", "host-1", entry.id).await.unwrap();
        assert_eq!(notified.status, QueueStatus::Notified);

        let seated = service
            .seat_customer("store-1", "host-1", entry.id, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(seated.status, QueueStatus::Seated);
        assert!(seated.assigned_table_id.is_some());

        let stats = service.get_statistics("store-1").await.unwrap();
        assert_eq!(stats.total_in_queue, 0);
        assert!(stats.longest_wait.is_some());
    }

    #[tokio::test]
    async fn seating_cancels_the_no_show_timer() {
        let service = test_service(Duration::from_millis(20)).await;
        let entry = service.add_to_queue("store-1", "host-1", create("Ana", "1", 2)).await.unwrap();
        service.notify_customer("store-1", "host-1", entry.id).await.unwrap();
        service
            .seat_customer("store-1", "host-1", entry.id, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let reloaded = service.load("store-1", entry.id).await.unwrap();
        assert_eq!(reloaded.status, QueueStatus::Seated);
    }

    #[tokio::test]
    async fn an_unacknowledged_notification_becomes_a_no_show() {
        let service = test_service(Duration::from_millis(20)).await;
        let entry = service.add_to_queue("store-1", "host-1", create("Ana", "1", 2)).await.unwrap();
        service.notify_customer("store-1", "host-1", entry.id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let reloaded = service.load("store-1", entry.id).await.unwrap();
        assert_eq!(reloaded.status, QueueStatus::NoShow);

        let stats = service.get_statistics("store-1").await.unwrap();
        assert!((stats.no_show_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn estimate_with_no_history_has_low_confidence_and_a_five_minute_floor() {
        let service = test_service(Duration::from_secs(900)).await;
        let estimate = service.estimate_wait_time(2).await;
        assert!((estimate.confidence_level - 0.4).abs() < f64::EPSILON);
        assert!(estimate.estimated_minutes >= MINIMUM_ESTIMATE_MINUTES);
    }

    #[test]
    fn size_factor_matches_the_three_tier_thresholds() {
        assert!((size_factor(4) - 1.0).abs() < f64::EPSILON);
        assert!((size_factor(5) - 1.3).abs() < f64::EPSILON);
        assert!((size_factor(6) - 1.3).abs() < f64::EPSILON);
        assert!((size_factor(7) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn score_tables_discards_undersized_tables_and_ranks_exact_matches_first() {
        let tables = vec![
            TableCandidate { id: Uuid::new_v4(), number: 1, seats: 2, features: vec![] },
            TableCandidate { id: Uuid::new_v4(), number: 2, seats: 4, features: vec!["window".to_string()] },
            TableCandidate { id: Uuid::new_v4(), number: 3, seats: 8, features: vec![] },
        ];
        let suggestions = score_tables(4, &["window".to_string()], &tables);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].table_number, 2);
        assert!(suggestions[0].score > suggestions[1].score);
    }

    #[test]
    fn party_size_xlarge_serializes_as_a_single_word() {
        let value = serde_json::to_value(PartySize::XLarge).unwrap();
        assert_eq!(value, json!("XLARGE"));
    }
}
