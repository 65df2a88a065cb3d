//! Document store abstraction used by every domain crate.
//!
//! Modeled on the teacher crate's `EventStore`/`EventBus` traits: `Send + Sync`,
//! returning boxed futures so the trait stays object-safe and can be held as
//! `Arc<dyn DocumentStore>`. Unlike an event store, documents here are
//! mutable key-value records (collection + id → JSON document), matching
//! the specification's `get/upsert/query/delete` contract (§4.1).
//!
//! [`InMemoryDocumentStore`] is the always-available implementation (used in
//! tests and as the default runtime backend); `pos-postgres` provides a
//! JSONB-backed alternative behind the same trait.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::CoreError;

/// A single equality/range constraint against a top-level document field.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Field equals value.
    Eq(String, Value),
    /// Field value is one of the given set.
    In(String, Vec<Value>),
    /// Field value is greater than or equal to the given value (numbers, or
    /// ISO-8601 strings compared lexicographically, which is
    /// order-preserving for UTC timestamps).
    Gte(String, Value),
    /// Field value is less than or equal to the given value.
    Lte(String, Value),
}

/// A conjunction of [`Predicate`]s, sufficient to express every filter used
/// by the queue and reservation cores (phone lookup, status-in-set, date
/// range, table/overlap scans).
#[derive(Clone, Debug, Default)]
pub struct Query {
    predicates: Vec<Predicate>,
}

impl Query {
    /// An unconstrained query matching every document in the collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq(field.into(), value.into()));
        self
    }

    /// Require `field` to be one of `values`.
    #[must_use]
    pub fn in_(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.predicates.push(Predicate::In(field.into(), values));
        self
    }

    /// Require `field >= value`.
    #[must_use]
    pub fn gte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Gte(field.into(), value.into()));
        self
    }

    /// Require `field <= value`.
    #[must_use]
    pub fn lte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Lte(field.into(), value.into()));
        self
    }

    /// The underlying predicate list, for backends that translate it into a
    /// native query (e.g. `pos-postgres` translating into `->>`/`@>` clauses).
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Evaluate the query against a single document. This is the reference
    /// semantics every `DocumentStore::query` implementation must agree with.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        self.predicates.iter().all(|p| predicate_matches(p, document))
    }
}

fn field_value<'a>(document: &'a Value, field: &str) -> Option<&'a Value> {
    document.get(field)
}

fn predicate_matches(predicate: &Predicate, document: &Value) -> bool {
    match predicate {
        Predicate::Eq(field, expected) => field_value(document, field) == Some(expected),
        Predicate::In(field, expected) => field_value(document, field)
            .map(|v| expected.contains(v))
            .unwrap_or(false),
        Predicate::Gte(field, expected) => {
            field_value(document, field).is_some_and(|v| compare(v, expected) >= std::cmp::Ordering::Equal)
        }
        Predicate::Lte(field, expected) => {
            field_value(document, field).is_some_and(|v| compare(v, expected) <= std::cmp::Ordering::Equal)
        }
    }
}

/// Compare two JSON scalars. Numbers compare numerically; everything else
/// (in practice, ISO-8601 timestamp strings) compares lexicographically,
/// which is order-preserving for zero-padded UTC timestamps.
fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);
    }
    let a = a.as_str().map(str::to_owned).unwrap_or_else(|| a.to_string());
    let b = b.as_str().map(str::to_owned).unwrap_or_else(|| b.to_string());
    a.cmp(&b)
}

/// Boxed future type used throughout the trait to keep it object-safe.
type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CoreError>> + Send + 'a>>;

/// Key/document store interface used by every domain crate.
///
/// Semantics (spec §4.1): read-your-writes within a single logical thread; no
/// cross-document transaction is required; `query` is a conjunction of
/// equality/range predicates.
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id, or `None` if it does not exist.
    fn get<'a>(&'a self, collection: &'a str, id: &'a str) -> StoreFuture<'a, Option<Value>>;

    /// Insert or replace a document by id.
    fn upsert<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        document: Value,
    ) -> StoreFuture<'a, ()>;

    /// Return every document in `collection` matching `query`.
    fn query<'a>(&'a self, collection: &'a str, query: &'a Query) -> StoreFuture<'a, Vec<Value>>;

    /// Remove a document by id. Returns whether a document was actually removed.
    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> StoreFuture<'a, bool>;
}

/// In-memory [`DocumentStore`], the default backend and the one used by
/// every unit test in this workspace.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get<'a>(&'a self, collection: &'a str, id: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move {
            let collections = self.collections.read().await;
            Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
        })
    }

    fn upsert<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        document: Value,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut collections = self.collections.write().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), document);
            Ok(())
        })
    }

    fn query<'a>(&'a self, collection: &'a str, query: &'a Query) -> StoreFuture<'a, Vec<Value>> {
        Box::pin(async move {
            let collections = self.collections.read().await;
            Ok(collections
                .get(collection)
                .map(|c| c.values().filter(|d| query.matches(d)).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut collections = self.collections.write().await;
            Ok(collections
                .get_mut(collection)
                .map(|c| c.remove(id).is_some())
                .unwrap_or(false))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = InMemoryDocumentStore::new();
        let doc = json!({"name": "John", "party_size": 4});
        store.upsert("queue_entries", "1", doc.clone()).await.unwrap();
        let fetched = store.get("queue_entries", "1").await.unwrap();
        assert_eq!(fetched, Some(doc));
    }

    #[tokio::test]
    async fn delete_reports_whether_a_document_existed() {
        let store = InMemoryDocumentStore::new();
        store.upsert("queue_entries", "1", json!({})).await.unwrap();
        assert!(store.delete("queue_entries", "1").await.unwrap());
        assert!(!store.delete("queue_entries", "1").await.unwrap());
    }

    #[tokio::test]
    async fn query_applies_in_and_range_predicates() {
        let store = InMemoryDocumentStore::new();
        store
            .upsert("reservations", "a", json!({"status": "PENDING", "party_size": 2}))
            .await
            .unwrap();
        store
            .upsert("reservations", "b", json!({"status": "CONFIRMED", "party_size": 6}))
            .await
            .unwrap();
        store
            .upsert("reservations", "c", json!({"status": "CANCELLED", "party_size": 10}))
            .await
            .unwrap();

        let q = Query::new()
            .in_("status", vec![json!("PENDING"), json!("CONFIRMED")])
            .gte("party_size", 2);
        let results = store.query("reservations", &q).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn query_matches_is_a_pure_predicate_evaluator() {
        let q = Query::new().eq("status", "WAITING");
        assert!(q.matches(&json!({"status": "WAITING"})));
        assert!(!q.matches(&json!({"status": "SEATED"})));
    }
}
