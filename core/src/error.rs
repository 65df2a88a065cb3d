//! Shared error kinds for the POS coordination core.
//!
//! Every crate in this workspace reports failures through [`CoreError`] so that
//! the HTTP shell (`pos-web`) has a single place to map domain failures onto
//! status codes, per the error taxonomy in the specification's error handling
//! section: validation, authorization, not-found, conflict, business-rule,
//! external-service, and internal.

use thiserror::Error;

/// Shared result alias used across the workspace.
pub type CoreResult<T> = Result<T, CoreError>;

/// Domain error kinds, independent of any transport.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Malformed or out-of-range input (phone, party size, dates, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Caller lacks identity or permission for the operation.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// The referenced entity does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of resource, e.g. "reservation".
        resource: String,
        /// Identifier that was looked up.
        id: String,
    },

    /// A non-version conflict: duplicate key, overlapping booking, double queue entry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic concurrency failure: the caller's version is stale.
    #[error("version conflict on {entity}: client={client_version} current={current_version}")]
    VersionConflict {
        /// `"{entity_type}:{entity_id}"`, matching the scenario in the spec (S3).
        entity: String,
        /// Version the caller believed it was editing.
        client_version: u64,
        /// Version actually stored.
        current_version: u64,
    },

    /// A domain predicate failed (e.g. modifying a completed reservation).
    #[error("business rule violated: {0}")]
    BusinessRule(String),

    /// A downstream collaborator (notification provider, delivery platform) failed.
    ///
    /// Never surfaced to the caller as a hard failure on its own; the caller
    /// learns about it through the state of the record being processed (notification
    /// record, queue entry, ...), never through a propagated exception.
    #[error("external service failed: {0}")]
    External(String),

    /// Anything else unexpected. Full detail is logged by the caller; only a
    /// redacted summary should reach an HTTP client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a [`CoreError::NotFound`].
    #[must_use]
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Build a [`CoreError::VersionConflict`].
    #[must_use]
    pub fn version_conflict(
        entity: impl Into<String>,
        client_version: u64,
        current_version: u64,
    ) -> Self {
        Self::VersionConflict {
            entity: entity.into(),
            client_version,
            current_version,
        }
    }

    /// Whether this error kind indicates a client-recoverable condition
    /// (as opposed to one that should be logged loudly as a bug).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Authorization(_)
                | Self::NotFound { .. }
                | Self::Conflict(_)
                | Self::VersionConflict { .. }
                | Self::BusinessRule(_)
        )
    }
}
