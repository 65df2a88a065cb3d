//! Application state shared across all HTTP/WebSocket handlers.

use std::sync::Arc;

use pos_audit::AuditLogger;
use pos_concurrency::ConcurrencyManager;
use pos_core::DocumentStore;
use pos_queue::QueueService;
use pos_reservation::ReservationService;
use pos_sync::SyncHub;

/// State shared across every handler, built once at process start and
/// cloned into each request's [`axum::extract::State`].
#[derive(Clone)]
pub struct AppState {
    /// Walk-in waiting list core.
    pub queue: QueueService,
    /// Table reservation core.
    pub reservation: ReservationService,
    /// Real-time terminal fan-out hub.
    pub sync: SyncHub,
    /// Shared audit log pipeline.
    pub audit: AuditLogger,
    /// Optimistic concurrency manager (editing leases, version checks).
    pub concurrency: ConcurrencyManager,
    /// Backing document store, exposed for handlers that need ad hoc reads
    /// (e.g. listing tables for allocation) rather than going through one
    /// of the domain services.
    pub store: Arc<dyn DocumentStore>,
}

impl AppState {
    /// Assemble application state from already-constructed services.
    #[must_use]
    pub fn new(
        queue: QueueService,
        reservation: ReservationService,
        sync: SyncHub,
        audit: AuditLogger,
        concurrency: ConcurrencyManager,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self { queue, reservation, sync, audit, concurrency, store }
    }
}
