//! Buffered, rotated, redacted JSONL audit log pipeline for the POS
//! coordination core.
//!
//! Every mutating operation in the system funnels through
//! [`AuditLogger::log`] (or one of its shape-specialized helpers). Entries
//! are buffered in memory and flushed to a daily `audit_YYYYMMDD.jsonl` file
//! on capacity, on a `CRITICAL` severity entry, or on a periodic tick. The
//! pipeline never propagates a failure to its caller: a failed disk write is
//! logged through `tracing` and the buffer is retained for the next attempt.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pos_core::tasks::TaskRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Kinds of action an audit entry can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// A new entity was created.
    Create,
    /// An existing entity was updated.
    Update,
    /// An entity was deleted.
    Delete,
    /// An entity was viewed (read access worth recording).
    View,
    /// A user logged in.
    Login,
    /// A user logged out.
    Logout,
    /// A sync message was fanned out between terminals.
    Sync,
    /// A concurrent-edit conflict was detected and resolved.
    Conflict,
    /// An editing lease was acquired.
    LockAcquire,
    /// An editing lease was released.
    LockRelease,
    /// A payment was processed.
    Payment,
    /// A payment was refunded.
    Refund,
    /// A cash drawer was opened.
    CashOpen,
    /// A cash drawer was closed.
    CashClose,
    /// Cash was withdrawn from the drawer.
    Withdrawal,
}

/// Severity of an audit entry, also a flush trigger (`CRITICAL` flushes
/// immediately).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditSeverity {
    /// Routine, informational.
    Info,
    /// Worth a closer look but not an error.
    Warning,
    /// A handled error.
    Error,
    /// Forces an immediate flush.
    Critical,
}

/// Top-level keys redacted from `old_value`/`new_value` before buffering,
/// matched case-insensitively. This is shallow: nested objects are not
/// walked (spec.md §9 open question 1, resolved as shallow in `DESIGN.md`).
const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "api_key",
    "secret",
    "card_number",
    "cvv",
    "cpf",
    "rg",
    "credit_card",
];

const REDACTED: &str = "***REDACTED***";

/// One line of the JSONL audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub action: AuditAction,
    /// Kind of entity affected, e.g. `"reservation"`.
    pub entity_type: String,
    /// Id of the affected entity, if any (e.g. login events have none).
    pub entity_id: Option<String>,
    /// User responsible for the action.
    pub user_id: String,
    /// Terminal the action originated from.
    pub terminal_id: String,
    /// Severity, also the flush trigger for `CRITICAL`.
    pub severity: AuditSeverity,
    /// Human-readable summary.
    pub description: String,
    /// Prior document state, redacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// New document state, redacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Free-form extension data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// `"SUCCESS"` / `"FAILED"` for sync events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<String>,
    /// Conflict resolution strategy applied, for `CONFLICT` entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_resolution: Option<String>,
    /// Origin IP, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Session id, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Fields a caller supplies to [`AuditLogger::log`]; grouped into one
/// struct instead of a long argument list.
#[derive(Debug, Clone, Default)]
pub struct LogRequest {
    /// Kind of entity affected.
    pub entity_type: String,
    /// Id of the affected entity, if any.
    pub entity_id: Option<String>,
    /// User responsible for the action.
    pub user_id: String,
    /// Terminal the action originated from.
    pub terminal_id: String,
    /// Human-readable summary.
    pub description: String,
    /// Prior document state (pre-redaction).
    pub old_value: Option<Value>,
    /// New document state (pre-redaction).
    pub new_value: Option<Value>,
    /// Free-form extension data.
    pub metadata: Option<Value>,
    /// `"SUCCESS"` / `"FAILED"` for sync events.
    pub sync_status: Option<String>,
    /// Conflict resolution strategy applied.
    pub conflict_resolution: Option<String>,
    /// Origin IP, if known.
    pub ip_address: Option<String>,
    /// Session id, if known.
    pub session_id: Option<String>,
}

/// Redact any top-level key in `value` whose lowercased name is in the
/// sensitive-field set. Idempotent: `redact(redact(v)) == redact(v)`.
#[must_use]
pub fn redact(value: &Value) -> Value {
    let Some(object) = value.as_object() else {
        return value.clone();
    };
    let mut redacted = object.clone();
    for (key, slot) in &mut redacted {
        if SENSITIVE_FIELDS.contains(&key.to_lowercase().as_str()) {
            *slot = Value::String(REDACTED.to_string());
        }
    }
    Value::Object(redacted)
}

/// Tunables for [`AuditLogger`], read from the environment with the
/// defaults the specification states.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Directory daily `audit_YYYYMMDD.jsonl` files are written to.
    pub log_dir: PathBuf,
    /// Buffer capacity that triggers a flush (default 100).
    pub buffer_size: usize,
    /// Periodic flush tick (default 10s).
    pub flush_interval: Duration,
    /// File size, in megabytes, that triggers rotation (default 100).
    pub max_file_size_mb: u64,
    /// Days a daily file is kept before `cleanup_old_logs` removes it
    /// (default 90).
    pub retention_days: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/var/log/pos-core/audit"),
            buffer_size: 100,
            flush_interval: Duration::from_secs(10),
            max_file_size_mb: 100,
            retention_days: 90,
        }
    }
}

impl AuditConfig {
    /// Load configuration from the environment, falling back to spec
    /// defaults for anything unset or unparsable.
    ///
    /// Recognized variables: `AUDIT_LOG_DIR`, `AUDIT_BUFFER_SIZE`,
    /// `AUDIT_FLUSH_INTERVAL_SECS`, `AUDIT_MAX_FILE_SIZE_MB`,
    /// `AUDIT_RETENTION_DAYS`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_dir: std::env::var("AUDIT_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            buffer_size: env_parsed("AUDIT_BUFFER_SIZE", defaults.buffer_size),
            flush_interval: Duration::from_secs(env_parsed(
                "AUDIT_FLUSH_INTERVAL_SECS",
                defaults.flush_interval.as_secs(),
            )),
            max_file_size_mb: env_parsed("AUDIT_MAX_FILE_SIZE_MB", defaults.max_file_size_mb),
            retention_days: env_parsed("AUDIT_RETENTION_DAYS", defaults.retention_days),
        }
    }

    fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn log_file_path(log_dir: &Path, date: DateTime<Utc>) -> PathBuf {
    log_dir.join(format!("audit_{}.jsonl", date.format("%Y%m%d")))
}

/// Aggregated counts produced by [`AuditLogger::get_statistics`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStatistics {
    /// Total entries considered.
    pub total_entries: usize,
    /// Counts keyed by [`AuditAction`] (rendered as its `SCREAMING_SNAKE_CASE` name).
    pub by_action: HashMap<String, usize>,
    /// Counts keyed by `entity_type`.
    pub by_entity: HashMap<String, usize>,
    /// Counts keyed by `terminal_id`.
    pub by_terminal: HashMap<String, usize>,
    /// Counts keyed by `user_id`.
    pub by_user: HashMap<String, usize>,
    /// Counts keyed by [`AuditSeverity`].
    pub by_severity: HashMap<String, usize>,
    /// Number of `CONFLICT` entries.
    pub conflicts: usize,
    /// Number of entries with `sync_status == "FAILED"`.
    pub sync_failures: usize,
}

/// Filters accepted by [`AuditLogger::search_logs`]; all optional.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Inclusive start of the date range. Defaults to 7 days before `end`.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive end of the date range. Defaults to now.
    pub end_date: Option<DateTime<Utc>>,
    /// Restrict to this entity type.
    pub entity_type: Option<String>,
    /// Restrict to this entity id.
    pub entity_id: Option<String>,
    /// Restrict to this user.
    pub user_id: Option<String>,
    /// Restrict to this terminal.
    pub terminal_id: Option<String>,
    /// Restrict to this action.
    pub action: Option<AuditAction>,
    /// Maximum entries returned (default 100).
    pub limit: usize,
}

impl SearchFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(entity_type) = &self.entity_type {
            if &entry.entity_type != entity_type {
                return false;
            }
        }
        if let Some(entity_id) = &self.entity_id {
            if entry.entity_id.as_deref() != Some(entity_id.as_str()) {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if &entry.user_id != user_id {
                return false;
            }
        }
        if let Some(terminal_id) = &self.terminal_id {
            if &entry.terminal_id != terminal_id {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if entry.action != *action {
                return false;
            }
        }
        true
    }
}

/// Buffered, rotated, redacted JSONL audit log pipeline.
///
/// Cheap to clone: internal state is `Arc`-shared. Construct with
/// [`AuditLogger::start`], which also spawns the periodic auto-flush task.
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<Inner>,
}

struct Inner {
    config: AuditConfig,
    buffer: Mutex<Vec<AuditEntry>>,
    current_log_file: Mutex<PathBuf>,
    tasks: TaskRegistry,
}

impl AuditLogger {
    /// Create a logger and spawn its periodic auto-flush task.
    ///
    /// # Errors
    ///
    /// Returns an error if `config.log_dir` cannot be created.
    pub async fn start(config: AuditConfig) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&config.log_dir).await?;
        let current_log_file = log_file_path(&config.log_dir, Utc::now());
        let logger = Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Vec::with_capacity(config.buffer_size)),
                current_log_file: Mutex::new(current_log_file),
                tasks: TaskRegistry::new(),
                config,
            }),
        };
        logger.start_auto_flush();
        Ok(logger)
    }

    fn start_auto_flush(&self) {
        let logger = self.clone();
        let interval = self.inner.config.flush_interval;
        self.inner.tasks.spawn("audit:auto-flush", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                logger.flush().await;
            }
        });
    }

    /// Append an audit entry. Never fails into the caller: any disk error
    /// during the flush this triggers is logged and the buffer is kept for
    /// the next attempt.
    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        action: AuditAction,
        severity: AuditSeverity,
        request: LogRequest,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            action,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            user_id: request.user_id,
            terminal_id: request.terminal_id,
            severity,
            description: request.description,
            old_value: request.old_value.as_ref().map(redact),
            new_value: request.new_value.as_ref().map(redact),
            metadata: request.metadata,
            sync_status: request.sync_status,
            conflict_resolution: request.conflict_resolution,
            ip_address: request.ip_address,
            session_id: request.session_id,
        };

        let should_flush = {
            let mut buffer = self.inner.buffer.lock().await;
            buffer.push(entry);
            buffer.len() >= self.inner.config.buffer_size || severity == AuditSeverity::Critical
        };
        if should_flush {
            self.flush().await;
        }
    }

    /// Record a sync fan-out event (§4.5's audit coupling).
    pub async fn log_sync_event(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        from_terminal: &str,
        to_terminals: &[String],
        user_id: &str,
        success: bool,
        error: Option<&str>,
    ) {
        let severity = if success {
            AuditSeverity::Info
        } else {
            AuditSeverity::Error
        };
        self.log(
            AuditAction::Sync,
            severity,
            LogRequest {
                entity_type: entity_type.to_string(),
                entity_id: Some(entity_id.to_string()),
                user_id: user_id.to_string(),
                terminal_id: from_terminal.to_string(),
                description: format!(
                    "Sync {action} from {from_terminal} to {} terminals",
                    to_terminals.len()
                ),
                metadata: Some(serde_json::json!({
                    "from_terminal": from_terminal,
                    "to_terminals": to_terminals,
                    "sync_action": action,
                    "success": success,
                    "error": error,
                })),
                sync_status: Some(if success { "SUCCESS" } else { "FAILED" }.to_string()),
                ..Default::default()
            },
        )
        .await;
    }

    /// Record a concurrent-edit conflict and its resolution.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_conflict(
        &self,
        entity_type: &str,
        entity_id: &str,
        terminal_1: &str,
        terminal_2: &str,
        user_1: &str,
        user_2: &str,
        resolution: &str,
        winner: &str,
    ) {
        self.log(
            AuditAction::Conflict,
            AuditSeverity::Warning,
            LogRequest {
                entity_type: entity_type.to_string(),
                entity_id: Some(entity_id.to_string()),
                user_id: format!("{user_1},{user_2}"),
                terminal_id: format!("{terminal_1},{terminal_2}"),
                description: format!("Conflict between {terminal_1} and {terminal_2}"),
                metadata: Some(serde_json::json!({
                    "terminal_1": terminal_1,
                    "terminal_2": terminal_2,
                    "user_1": user_1,
                    "user_2": user_2,
                    "winner": winner,
                })),
                conflict_resolution: Some(resolution.to_string()),
                ..Default::default()
            },
        )
        .await;
    }

    /// Record a payment attempt.
    pub async fn log_payment(
        &self,
        order_id: &str,
        payment_method: &str,
        amount: f64,
        user_id: &str,
        terminal_id: &str,
        success: bool,
        error: Option<&str>,
    ) {
        let severity = if success {
            AuditSeverity::Info
        } else {
            AuditSeverity::Error
        };
        self.log(
            AuditAction::Payment,
            severity,
            LogRequest {
                entity_type: "payment".to_string(),
                entity_id: Some(order_id.to_string()),
                user_id: user_id.to_string(),
                terminal_id: terminal_id.to_string(),
                description: format!("Payment {payment_method}: {amount:.2}"),
                metadata: Some(serde_json::json!({
                    "payment_method": payment_method,
                    "amount": amount,
                    "success": success,
                    "error": error,
                })),
                ..Default::default()
            },
        )
        .await;
    }

    /// Record a cash-drawer operation (`"open"`, `"close"`, `"withdrawal"`).
    pub async fn log_cashier_operation(
        &self,
        operation: &str,
        cashier_id: &str,
        user_id: &str,
        terminal_id: &str,
        amount: Option<f64>,
        metadata: Option<Value>,
    ) {
        let action = match operation {
            "open" => AuditAction::CashOpen,
            "close" => AuditAction::CashClose,
            "withdrawal" => AuditAction::Withdrawal,
            _ => AuditAction::Update,
        };
        let description = match amount {
            Some(amount) => format!("Cashier {operation}: {amount:.2}"),
            None => format!("Cashier {operation}"),
        };
        self.log(
            action,
            AuditSeverity::Info,
            LogRequest {
                entity_type: "cashier".to_string(),
                entity_id: Some(cashier_id.to_string()),
                user_id: user_id.to_string(),
                terminal_id: terminal_id.to_string(),
                description,
                metadata,
                ..Default::default()
            },
        )
        .await;
    }

    /// Flush the in-memory buffer to disk. Never propagates a failure to
    /// the caller: errors are logged and the buffer is retained so the next
    /// flush (capacity, critical entry, or tick) can retry.
    pub async fn flush(&self) {
        let mut buffer = self.inner.buffer.lock().await;
        if buffer.is_empty() {
            return;
        }

        if let Err(error) = self.rotate_if_needed().await {
            tracing::error!(%error, "audit log rotation failed");
        }

        let path = self.inner.current_log_file.lock().await.clone();
        match self.append_entries(&path, &buffer).await {
            Ok(()) => buffer.clear(),
            Err(error) => {
                tracing::error!(%error, path = %path.display(), "failed to flush audit log, retaining buffer");
            }
        }
    }

    async fn append_entries(&self, path: &Path, entries: &[AuditEntry]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        for entry in entries {
            let mut line = serde_json::to_string(entry).unwrap_or_default();
            line.push('\n');
            file.write_all(line.as_bytes()).await?;
        }
        file.flush().await
    }

    async fn rotate_if_needed(&self) -> std::io::Result<()> {
        let mut current = self.inner.current_log_file.lock().await;
        let today = log_file_path(&self.inner.config.log_dir, Utc::now());
        if *current != today {
            *current = today;
            return Ok(());
        }

        let Ok(metadata) = tokio::fs::metadata(&*current).await else {
            return Ok(());
        };
        if metadata.len() < self.inner.config.max_file_size_bytes() {
            return Ok(());
        }

        let rotated = self.inner.config.log_dir.join(format!(
            "audit_{}_rotated.jsonl",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        tokio::fs::rename(&*current, &rotated).await?;
        *current = log_file_path(&self.inner.config.log_dir, Utc::now());
        Ok(())
    }

    /// Remove daily files (not rotated ones) older than `retention_days`.
    pub async fn cleanup_old_logs(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(self.inner.config.retention_days);
        let mut entries = match tokio::fs::read_dir(&self.inner.config.log_dir).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::error!(%error, "failed to read audit log directory for cleanup");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(file_date) = daily_file_date(&path) else {
                continue;
            };
            if file_date < cutoff {
                if let Err(error) = tokio::fs::remove_file(&path).await {
                    tracing::error!(%error, path = %path.display(), "failed to remove old audit log");
                } else {
                    tracing::info!(path = %path.display(), "removed old audit log");
                }
            }
        }
    }

    /// Search persisted entries across the files covering `filter`'s date
    /// range, in chronological order, stopping once `filter.limit` matches
    /// are collected.
    pub async fn search_logs(&self, filter: &SearchFilter) -> Vec<AuditEntry> {
        let end_date = filter.end_date.unwrap_or_else(Utc::now);
        let start_date = filter
            .start_date
            .unwrap_or_else(|| end_date - chrono::Duration::days(7));
        let limit = if filter.limit == 0 { 100 } else { filter.limit };

        let mut results = Vec::new();
        let mut day = start_date;
        while day <= end_date && results.len() < limit {
            let path = log_file_path(&self.inner.config.log_dir, day);
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                for line in content.lines() {
                    if results.len() >= limit {
                        break;
                    }
                    if let Ok(entry) = serde_json::from_str::<AuditEntry>(line) {
                        if filter.matches(&entry) {
                            results.push(entry);
                        }
                    }
                }
            }
            day += chrono::Duration::days(1);
        }
        results
    }

    /// Aggregate entries between `start` and `end` (inclusive) by action,
    /// entity, terminal, user, and severity.
    pub async fn get_statistics(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> AuditStatistics {
        let entries = self
            .search_logs(&SearchFilter {
                start_date: start,
                end_date: end,
                limit: 10_000,
                ..Default::default()
            })
            .await;

        let mut stats = AuditStatistics {
            total_entries: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            *stats
                .by_action
                .entry(action_name(entry.action).to_string())
                .or_default() += 1;
            *stats.by_entity.entry(entry.entity_type.clone()).or_default() += 1;
            *stats.by_terminal.entry(entry.terminal_id.clone()).or_default() += 1;
            *stats.by_user.entry(entry.user_id.clone()).or_default() += 1;
            *stats
                .by_severity
                .entry(severity_name(entry.severity).to_string())
                .or_default() += 1;
            if entry.action == AuditAction::Conflict {
                stats.conflicts += 1;
            }
            if entry.sync_status.as_deref() == Some("FAILED") {
                stats.sync_failures += 1;
            }
        }
        stats
    }
}

fn action_name(action: AuditAction) -> &'static str {
    match action {
        AuditAction::Create => "CREATE",
        AuditAction::Update => "UPDATE",
        AuditAction::Delete => "DELETE",
        AuditAction::View => "VIEW",
        AuditAction::Login => "LOGIN",
        AuditAction::Logout => "LOGOUT",
        AuditAction::Sync => "SYNC",
        AuditAction::Conflict => "CONFLICT",
        AuditAction::LockAcquire => "LOCK_ACQUIRE",
        AuditAction::LockRelease => "LOCK_RELEASE",
        AuditAction::Payment => "PAYMENT",
        AuditAction::Refund => "REFUND",
        AuditAction::CashOpen => "CASH_OPEN",
        AuditAction::CashClose => "CASH_CLOSE",
        AuditAction::Withdrawal => "WITHDRAWAL",
    }
}

fn severity_name(severity: AuditSeverity) -> &'static str {
    match severity {
        AuditSeverity::Info => "INFO",
        AuditSeverity::Warning => "WARNING",
        AuditSeverity::Error => "ERROR",
        AuditSeverity::Critical => "CRITICAL",
    }
}

/// Parse the `YYYYMMDD` date out of a plain (non-rotated) daily log file
/// name; rotated files (`_HHMMSS_rotated`) are excluded from retention
/// cleanup, matching the spec.
fn daily_file_date(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let date_str = stem.strip_prefix("audit_")?;
    if date_str.len() != 8 || !date_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    chrono::NaiveDate::parse_from_str(date_str, "%Y%m%d")
        .ok()?
        .and_hms_opt(0, 0, 0)?
        .and_local_timezone(Utc)
        .single()
}
