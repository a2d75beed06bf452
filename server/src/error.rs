//! API error type bridging engine errors to HTTP responses.
//!
//! The error taxonomy maps onto status codes at this boundary only:
//! validation → 422, not-found → 404, conflict → 409, backend outage →
//! 503, anything else → 500. Engine errors propagate to here unchanged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gridcast_core::catalog::CatalogError;
use gridcast_core::event::EventDecodeError;
use gridcast_core::projection::ProjectionError;
use gridcast_core::solve::SolveError;
use gridcast_core::store::StoreError;
use gridcast_hub::HubError;
use serde::Serialize;
use thiserror::Error;

/// Application error for HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed input: bad payload shape, unknown event type, missing
    /// field.
    #[error("{0}")]
    Validation(String),

    /// The referenced resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A write lost to a concurrent writer and could not be resolved.
    #[error("{0}")]
    Conflict(String),

    /// A backing service (store/bus) is unavailable.
    #[error("{0}")]
    Unavailable(String),

    /// Unexpected internal failure.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable code for the client.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, code = self.code(), message = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => Self::Conflict(err.to_string()),
            StoreError::Backend(_) => Self::Unavailable(err.to_string()),
            StoreError::Decode(_) | StoreError::Serialization(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Validation(e) => Self::Validation(e.to_string()),
            HubError::Store(e) => e.into(),
            HubError::Closed => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::DuplicatePid(_) => Self::Conflict(err.to_string()),
            CatalogError::Backend(_) => Self::Unavailable(err.to_string()),
            CatalogError::Serialization(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<SolveError> for ApiError {
    fn from(err: SolveError) -> Self {
        match err {
            SolveError::InvalidTimeTaken(_) => Self::Validation(err.to_string()),
            SolveError::Store(e) => e.into(),
            SolveError::Conflict { .. } => Self::Conflict(err.to_string()),
            SolveError::Backend(_) => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::NoCreateEvent => Self::NotFound(err.to_string()),
        }
    }
}

impl From<EventDecodeError> for ApiError {
    fn from(err: EventDecodeError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_maps_to_409() {
        use gridcast_core::stream::{StreamId, StreamKind};
        let err: ApiError = StoreError::Conflict {
            kind: StreamKind::Game,
            stream_id: StreamId::new("g-1"),
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn missing_create_maps_to_404() {
        let err: ApiError = ProjectionError::NoCreateEvent.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn invalid_time_maps_to_422() {
        let err: ApiError = SolveError::InvalidTimeTaken(0).into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
