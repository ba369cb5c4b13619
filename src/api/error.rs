//! API error type mapping domain errors to HTTP responses.
//!
//! Only validation-class errors surface synchronously; pipeline failures
//! are reported through lab status, never through handler errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::registry::RegistryError;

/// API error for route handlers. Serialized as `{error, detail?}`.
#[derive(Debug)]
pub enum ApiError {
    /// Invalid request payload or lab in the wrong state.
    BadRequest {
        /// Short error description.
        error: String,
        /// Optional elaboration.
        detail: Option<String>,
    },
    /// Requested lab does not exist.
    NotFound(String),
}

impl ApiError {
    /// Convenience constructor for a detail-less 400.
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::BadRequest {
            error: error.into(),
            detail: None,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(lab_id) => Self::NotFound(format!("lab not found: {lab_id}")),
            RegistryError::InvalidState { lab_id, status } => Self::BadRequest {
                error: format!("lab {lab_id} does not accept messages"),
                detail: Some(format!("status is {status}")),
            },
            RegistryError::QueueFull(lab_id) => Self::BadRequest {
                error: format!("lab {lab_id}: pending message queue is full"),
                detail: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            Self::BadRequest { error, detail } => (StatusCode::BAD_REQUEST, error, detail),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
        };

        let body = match detail {
            Some(detail) => json!({ "error": error, "detail": detail }),
            None => json!({ "error": error }),
        };
        (status, axum::Json(body)).into_response()
    }
}
