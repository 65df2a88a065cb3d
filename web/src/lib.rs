//! Axum HTTP/WebSocket surface for the restaurant point-of-sale
//! coordination core.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, JSON, WebSocket upgrade
//! │  - Request parsing                      │  ← Correlation IDs, extractors
//! │  - Response serialization               │  ← Logging
//! ├─────────────────────────────────────────┤
//! │         Domain Services                 │
//! │  - QueueService / ReservationService    │  ← pos-queue / pos-reservation
//! │  - SyncHub                              │  ← pos-sync
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract data** from the request (JSON body, path, headers)
//! 3. **Call the domain service** (`AppState::queue`, `AppState::reservation`, ...)
//! 4. **Map the result** to an HTTP response, converting [`pos_core::CoreError`]
//!    to [`AppError`]
//!
//! # Example
//!
//! ```ignore
//! use pos_web::{router, state::AppState};
//!
//! let app = router(app_state);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

// Re-export key types for convenience
pub use config::CoreConfig;
pub use error::AppError;
pub use extractors::UserId;
pub use middleware::{correlation_id_layer, CorrelationIdExt, CORRELATION_ID_HEADER};
pub use routes::router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
