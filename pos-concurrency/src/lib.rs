//! Optimistic concurrency manager for the POS coordination core.
//!
//! Holds an in-process registry of short-lived editing leases keyed by
//! `(entity_type, entity_id)`, validates the `version` a caller believes it
//! is editing against the version actually stored, and resolves conflicts
//! between a client's and the server's view of a document according to a
//! caller-selected strategy.
//!
//! Nothing here touches the document store directly: callers pass in the
//! current server-side version and document, and this crate only arbitrates.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pos_core::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 5 * 60;

/// A strategy for reconciling a client's edit with the server's current
/// document when the two have diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolutionStrategy {
    /// The client's document wins outright.
    LastWriteWins,
    /// The server's document wins outright.
    ServerWins,
    /// Field-wise union; conflicting keys are won by whichever side has the
    /// newer `last_modified_at`, ties favoring the server.
    Merge,
    /// Neither side is authoritative; the caller must resolve by hand.
    Manual,
}

/// Outcome of [`ConcurrencyManager::handle_conflict_resolution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConflictResolution {
    /// The reconciled document (for `LastWriteWins`, `ServerWins`, `Merge`).
    Resolved(Value),
    /// `Manual` strategy: caller must pick, the record carries both sides.
    ManualRequired {
        /// Always `"MANUAL"`.
        resolution: &'static str,
        /// The client's submitted document.
        client_data: Value,
        /// The server's current document.
        server_data: Value,
    },
}

/// An editing lease granting one user first-write rights on an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditingLease {
    /// Opaque token identifying this lease to the issuing process.
    pub lock_id: String,
    /// Kind of entity, e.g. `"reservation"`.
    pub entity_type: String,
    /// Id of the entity within its type.
    pub entity_id: String,
    /// User holding the lease.
    pub user_id: String,
    /// Terminal the lease was acquired from, if known.
    pub terminal_id: Option<String>,
    /// Version of the entity at acquisition time.
    pub version: u64,
    /// When the lease was acquired (or last renewed).
    pub acquired_at: DateTime<Utc>,
}

impl EditingLease {
    fn expires_at(&self, timeout: Duration) -> DateTime<Utc> {
        self.acquired_at
            + chrono::Duration::from_std(timeout)
                .unwrap_or(chrono::Duration::seconds(DEFAULT_LOCK_TIMEOUT_SECS))
    }

    fn is_valid(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at(timeout) > now
    }
}

/// Outcome of [`ConcurrencyManager::acquire_lock`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LockAcquisition {
    /// The lease was granted (newly, or refreshed for the same user).
    Granted {
        /// Always `true`.
        success: bool,
        /// Lease token.
        lock_id: String,
        /// When the granted lease expires.
        expires_at: DateTime<Utc>,
    },
    /// The entity is already validly leased by someone else.
    Denied {
        /// Always `false`.
        success: bool,
        /// User currently holding the lease.
        locked_by: String,
        /// When that lease was acquired.
        locked_at: DateTime<Utc>,
        /// Terminal that acquired it, if known.
        terminal_id: Option<String>,
    },
}

/// Read-only view of a `(entity_type, entity_id)`'s current lease state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockInfo {
    /// Whether a valid lease is currently held.
    pub locked: bool,
    /// Holder of the lease, if any.
    pub user_id: Option<String>,
    /// Terminal the lease was acquired from, if known.
    pub terminal_id: Option<String>,
    /// When the lease was acquired.
    pub acquired_at: Option<DateTime<Utc>>,
    /// When the lease expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Entity version recorded at acquisition.
    pub version: Option<u64>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct EntityKey {
    entity_type: String,
    entity_id: String,
}

impl EntityKey {
    fn new(entity_type: &str, entity_id: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
        }
    }

    fn display(&self) -> String {
        format!("{}:{}", self.entity_type, self.entity_id)
    }
}

/// Stateful registry of editing leases plus version-validation and
/// conflict-resolution helpers.
///
/// Cheap to clone: internal state is `Arc`-shared, matching the teacher's
/// convention of handing services around as `Arc<Service>` rather than
/// wrapping every call site in its own lock.
#[derive(Clone)]
pub struct ConcurrencyManager {
    leases: Arc<RwLock<HashMap<EntityKey, EditingLease>>>,
    lock_timeout: Duration,
}

impl ConcurrencyManager {
    /// Build a manager with the default 5 minute lease timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(
            u64::try_from(DEFAULT_LOCK_TIMEOUT_SECS).unwrap_or(300),
        ))
    }

    /// Build a manager with an explicit lease timeout (`LOCK_TIMEOUT_SECS`).
    #[must_use]
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            leases: Arc::new(RwLock::new(HashMap::new())),
            lock_timeout,
        }
    }

    /// Attempt to acquire (or refresh) an editing lease.
    ///
    /// Expired leases are swept lazily on every call, per the spec's
    /// "cleanup sweeps run lazily on every `acquire_lock` call" rule.
    pub async fn acquire_lock(
        &self,
        entity_type: &str,
        entity_id: &str,
        user_id: &str,
        current_version: u64,
        terminal_id: Option<&str>,
    ) -> LockAcquisition {
        let key = EntityKey::new(entity_type, entity_id);
        let now = Utc::now();
        let mut leases = self.leases.write().await;

        if let Some(existing) = leases.get(&key) {
            if existing.is_valid(self.lock_timeout, now) {
                if existing.user_id == user_id {
                    let mut renewed = existing.clone();
                    renewed.acquired_at = now;
                    renewed.terminal_id = terminal_id.map(str::to_string);
                    renewed.version = current_version;
                    let expires_at = renewed.expires_at(self.lock_timeout);
                    let lock_id = renewed.lock_id.clone();
                    leases.insert(key, renewed);
                    return LockAcquisition::Granted {
                        success: true,
                        lock_id,
                        expires_at,
                    };
                }
                return LockAcquisition::Denied {
                    success: false,
                    locked_by: existing.user_id.clone(),
                    locked_at: existing.acquired_at,
                    terminal_id: existing.terminal_id.clone(),
                };
            }
        }

        let lock_id = derive_lock_id(&key.display(), user_id, now);
        let lease = EditingLease {
            lock_id: lock_id.clone(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            user_id: user_id.to_string(),
            terminal_id: terminal_id.map(str::to_string),
            version: current_version,
            acquired_at: now,
        };
        let expires_at = lease.expires_at(self.lock_timeout);
        leases.insert(key, lease);
        LockAcquisition::Granted {
            success: true,
            lock_id,
            expires_at,
        }
    }

    /// Validate that `client_version` still matches `current_version`.
    ///
    /// A lease held by `user_id` at exactly `client_version` is an explicit
    /// exception: it succeeds so the same user can perform a multi-step edit
    /// within their own lease even though the server's bookkeeping version
    /// may differ once other side effects have touched the record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::VersionConflict`] when the versions differ and
    /// no such lease exception applies.
    pub async fn validate_version(
        &self,
        entity_type: &str,
        entity_id: &str,
        client_version: u64,
        current_version: u64,
        user_id: Option<&str>,
    ) -> CoreResult<()> {
        if client_version == current_version {
            return Ok(());
        }

        if let Some(user_id) = user_id {
            let key = EntityKey::new(entity_type, entity_id);
            let leases = self.leases.read().await;
            if let Some(lease) = leases.get(&key) {
                if lease.user_id == user_id
                    && lease.is_valid(self.lock_timeout, Utc::now())
                    && lease.version == client_version
                {
                    return Ok(());
                }
            }
        }

        Err(CoreError::version_conflict(
            EntityKey::new(entity_type, entity_id).display(),
            client_version,
            current_version,
        ))
    }

    /// Release a lease. Returns whether a lease was actually removed.
    ///
    /// Only removes the lease if `user_id` owns it and, when `lock_id` is
    /// supplied, it matches the stored token.
    pub async fn release_lock(
        &self,
        entity_type: &str,
        entity_id: &str,
        user_id: &str,
        lock_id: Option<&str>,
    ) -> bool {
        let key = EntityKey::new(entity_type, entity_id);
        let mut leases = self.leases.write().await;
        let Some(existing) = leases.get(&key) else {
            return false;
        };
        if existing.user_id != user_id {
            return false;
        }
        if let Some(lock_id) = lock_id {
            if existing.lock_id != lock_id {
                return false;
            }
        }
        leases.remove(&key);
        true
    }

    /// Read-only snapshot of a `(entity_type, entity_id)`'s lease state.
    pub async fn get_lock_info(&self, entity_type: &str, entity_id: &str) -> LockInfo {
        let key = EntityKey::new(entity_type, entity_id);
        let now = Utc::now();
        let leases = self.leases.read().await;
        match leases.get(&key) {
            Some(lease) if lease.is_valid(self.lock_timeout, now) => LockInfo {
                locked: true,
                user_id: Some(lease.user_id.clone()),
                terminal_id: lease.terminal_id.clone(),
                acquired_at: Some(lease.acquired_at),
                expires_at: Some(lease.expires_at(self.lock_timeout)),
                version: Some(lease.version),
            },
            _ => LockInfo::default(),
        }
    }

    /// Reconcile `client_data` against `server_data` using `strategy`.
    #[must_use]
    pub fn handle_conflict_resolution(
        client_data: &Value,
        server_data: &Value,
        strategy: ConflictResolutionStrategy,
    ) -> ConflictResolution {
        match strategy {
            ConflictResolutionStrategy::LastWriteWins => {
                ConflictResolution::Resolved(client_data.clone())
            }
            ConflictResolutionStrategy::ServerWins => {
                ConflictResolution::Resolved(server_data.clone())
            }
            ConflictResolutionStrategy::Merge => {
                ConflictResolution::Resolved(merge_fields(client_data, server_data))
            }
            ConflictResolutionStrategy::Manual => ConflictResolution::ManualRequired {
                resolution: "MANUAL",
                client_data: client_data.clone(),
                server_data: server_data.clone(),
            },
        }
    }
}

impl Default for ConcurrencyManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Field-wise union of two JSON objects; for keys present in both, the side
/// with the newer `last_modified_at` wins, ties favoring the server.
fn merge_fields(client_data: &Value, server_data: &Value) -> Value {
    let (Some(client_obj), Some(server_obj)) = (client_data.as_object(), server_data.as_object())
    else {
        return server_data.clone();
    };

    let client_modified = client_obj.get("last_modified_at").and_then(Value::as_str);
    let server_modified = server_obj.get("last_modified_at").and_then(Value::as_str);
    let client_is_newer = matches!(
        (client_modified, server_modified),
        (Some(c), Some(s)) if c > s
    );

    let mut merged = server_obj.clone();
    for (key, client_value) in client_obj {
        match merged.get(key) {
            None => {
                merged.insert(key.clone(), client_value.clone());
            }
            Some(server_value) if server_value != client_value && client_is_newer => {
                merged.insert(key.clone(), client_value.clone());
            }
            Some(_) => {}
        }
    }
    Value::Object(merged)
}

/// Derive a 16 hex-char opaque lease token from `(entity_key, user_id,
/// acquired_at)`. Deterministic and process-local; never used as a security
/// credential.
fn derive_lock_id(entity_key: &str, user_id: &str, acquired_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_key.as_bytes());
    hasher.update(b"|");
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(
        acquired_at
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Content-validator ETag for HTTP cache validation, never for security:
/// `md5(canonical_json(data) + ":v" + version)`.
#[must_use]
pub fn generate_etag(data: &Value, version: u64) -> String {
    let canonical = canonical_json(data);
    let input = format!("{canonical}:v{version}");
    format!("{:x}", md5::Md5::digest(input.as_bytes()))
}

/// Render `value` with object keys sorted, so the same logical document
/// always serializes identically regardless of insertion order.
fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut sorted: Vec<_> = map.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, v) in sorted {
                    out.insert(k.clone(), sort(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn acquire_lock_grants_a_fresh_lease() {
        let manager = ConcurrencyManager::new();
        let result = manager
            .acquire_lock("reservation", "r1", "alice", 0, Some("t1"))
            .await;
        assert!(matches!(result, LockAcquisition::Granted { success: true, .. }));
    }

    #[tokio::test]
    async fn acquire_lock_denies_a_different_user() {
        let manager = ConcurrencyManager::new();
        manager
            .acquire_lock("reservation", "r1", "alice", 0, Some("t1"))
            .await;
        let result = manager
            .acquire_lock("reservation", "r1", "bob", 0, Some("t2"))
            .await;
        match result {
            LockAcquisition::Denied { success, locked_by, .. } => {
                assert!(!success);
                assert_eq!(locked_by, "alice");
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn acquire_lock_refreshes_the_same_user() {
        let manager = ConcurrencyManager::new();
        let first = manager
            .acquire_lock("reservation", "r1", "alice", 0, Some("t1"))
            .await;
        let second = manager
            .acquire_lock("reservation", "r1", "alice", 0, Some("t1"))
            .await;
        match (first, second) {
            (
                LockAcquisition::Granted { lock_id: id1, .. },
                LockAcquisition::Granted { lock_id: id2, .. },
            ) => assert_eq!(id1, id2),
            other => panic!("expected two grants, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_lease_is_swept_and_replaced() {
        let manager = ConcurrencyManager::with_lock_timeout(Duration::from_millis(1));
        manager
            .acquire_lock("reservation", "r1", "alice", 0, None)
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = manager
            .acquire_lock("reservation", "r1", "bob", 0, None)
            .await;
        assert!(matches!(result, LockAcquisition::Granted { success: true, .. }));
    }

    #[tokio::test]
    async fn validate_version_passes_on_match_and_fails_on_mismatch() {
        let manager = ConcurrencyManager::new();
        manager
            .validate_version("reservation", "r1", 3, 3, None)
            .await
            .unwrap();

        let err = manager
            .validate_version("reservation", "r1", 3, 4, None)
            .await
            .unwrap_err();
        match err {
            CoreError::VersionConflict {
                client_version,
                current_version,
                ..
            } => {
                assert_eq!(client_version, 3);
                assert_eq!(current_version, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn validate_version_allows_the_leaseholder_at_their_acquired_version() {
        let manager = ConcurrencyManager::new();
        manager
            .acquire_lock("reservation", "r1", "alice", 5, Some("t1"))
            .await;

        manager
            .validate_version("reservation", "r1", 5, 9, Some("alice"))
            .await
            .unwrap();

        let err = manager
            .validate_version("reservation", "r1", 5, 9, Some("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn release_lock_requires_ownership() {
        let manager = ConcurrencyManager::new();
        manager
            .acquire_lock("reservation", "r1", "alice", 0, None)
            .await;
        assert!(!manager.release_lock("reservation", "r1", "bob", None).await);
        assert!(manager.release_lock("reservation", "r1", "alice", None).await);
        let info = manager.get_lock_info("reservation", "r1").await;
        assert!(!info.locked);
    }

    #[test]
    fn conflict_resolution_last_write_wins_returns_client() {
        let client = json!({"name": "client"});
        let server = json!({"name": "server"});
        let result = ConcurrencyManager::handle_conflict_resolution(
            &client,
            &server,
            ConflictResolutionStrategy::LastWriteWins,
        );
        match result {
            ConflictResolution::Resolved(value) => assert_eq!(value, client),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn conflict_resolution_merge_prefers_newer_last_modified() {
        let client = json!({"name": "client", "last_modified_at": "2026-01-02T00:00:00Z"});
        let server =
            json!({"name": "server", "phone": "123", "last_modified_at": "2026-01-01T00:00:00Z"});
        let result = ConcurrencyManager::handle_conflict_resolution(
            &client,
            &server,
            ConflictResolutionStrategy::Merge,
        );
        match result {
            ConflictResolution::Resolved(value) => {
                assert_eq!(value["name"], "client");
                assert_eq!(value["phone"], "123");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn conflict_resolution_manual_carries_both_sides() {
        let client = json!({"a": 1});
        let server = json!({"a": 2});
        let result = ConcurrencyManager::handle_conflict_resolution(
            &client,
            &server,
            ConflictResolutionStrategy::Manual,
        );
        assert!(matches!(result, ConflictResolution::ManualRequired { .. }));
    }

    #[test]
    fn generate_etag_is_pure_and_sensitive_to_every_byte() {
        let data = json!({"b": 2, "a": 1});
        let reordered = json!({"a": 1, "b": 2});
        assert_eq!(generate_etag(&data, 1), generate_etag(&reordered, 1));
        assert_ne!(generate_etag(&data, 1), generate_etag(&data, 2));
        assert_ne!(
            generate_etag(&data, 1),
            generate_etag(&json!({"a": 1, "b": 3}), 1)
        );
    }
}
