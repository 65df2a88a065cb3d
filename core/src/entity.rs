//! Common capability trait shared by every persisted document.
//!
//! The original system modelled entities as dynamically-typed documents with
//! ad-hoc `created_at`/`updated_at`/`version` bookkeeping sprinkled across
//! each service. Here every mutable entity implements [`Entity`] instead,
//! giving the concurrency manager and document-store layer one place to bump
//! a version and stamp an update time rather than a class hierarchy of
//! optional fields.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A mutable, store-scoped, optimistically-versioned entity.
pub trait Entity {
    /// Opaque identifier, unique within `store_id()`.
    fn id(&self) -> Uuid;

    /// Tenant (single-site store) this entity belongs to.
    fn store_id(&self) -> &str;

    /// Monotonically increasing version, starting at 1.
    fn version(&self) -> u64;

    /// Overwrite the stored version (used by the store layer after a write).
    fn set_version(&mut self, version: u64);

    /// Overwrite `updated_at`.
    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Bump the version by exactly one and stamp `updated_at` to now.
    ///
    /// Invariant (spec §8.3): a successful mutation increments `version` by
    /// exactly 1 and updates `updated_at`.
    fn touch(&mut self) {
        let next = self.version() + 1;
        self.set_version(next);
        self.set_updated_at(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        id: Uuid,
        store_id: String,
        version: u64,
        updated_at: DateTime<Utc>,
    }

    impl Entity for Dummy {
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

    #[test]
    fn touch_increments_version_by_exactly_one() {
        let mut d = Dummy {
            id: Uuid::new_v4(),
            store_id: "store-1".into(),
            version: 1,
            updated_at: DateTime::<Utc>::MIN_UTC,
        };
        let before = d.updated_at;
        d.touch();
        assert_eq!(d.version, 2);
        assert!(d.updated_at > before);
    }
}
