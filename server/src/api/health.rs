//! Health and readiness endpoints.

use axum::http::StatusCode;

/// Liveness probe.
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}
