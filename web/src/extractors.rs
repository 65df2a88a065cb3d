//! Custom Axum extractors.
//!
//! # Examples
//!
//! ```ignore
//! use axum::extract::State;
//! use pos_web::extractors::UserId;
//!
//! async fn handler(
//!     State(state): State<AppState>,
//!     user: UserId,
//! ) -> Result<Json<Response>, AppError> {
//!     tracing::info!(user = %user.0, "Processing request");
//!     Ok(Json(response))
//! }
//! ```

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Acting staff/terminal user, for audit attribution.
///
/// Extracts the `X-User-Id` header, or falls back to `"anonymous"` when
/// absent — this workspace has no auth module, so callers are trusted to
/// set the header themselves.
///
/// # Example
///
/// ```ignore
/// async fn handler(user: UserId) -> String {
///     format!("Acting as: {}", user.0)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct UserId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous")
            .to_string();

        Ok(Self(user_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_user_id_from_header() {
        let req = Request::builder()
            .header("X-User-Id", "staff-42")
            .body(())
            .expect("Valid request");

        let (mut parts, _) = req.into_parts();
        let user_id = UserId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(user_id.0, "staff-42");
    }

    #[tokio::test]
    async fn test_user_id_fallback() {
        let req = Request::builder()
            .body(())
            .expect("Valid request");

        let (mut parts, _) = req.into_parts();
        let user_id = UserId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(user_id.0, "anonymous");
    }
}
