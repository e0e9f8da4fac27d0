//! API Error Types
//!
//! Maps the service error taxonomy onto HTTP statuses and the common
//! `{ error, message }` envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use divd_store::StoreError;
use divd_upstream::FetchError;

/// API-specific errors
#[derive(Error, Debug)]
pub enum ApiError {
    /// Bad input
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    /// Resource not found
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Missing, malformed, unknown, or inactive API key
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Per-key or upstream quota exhausted
    #[error("Rate limit exceeded: {message}")]
    QuotaExceeded {
        message: String,
        reset_at: Option<DateTime<Utc>>,
    },

    /// State conflict (non-pending cancel, subscription cap)
    #[error("{message}")]
    Conflict { message: String },

    /// Unexpected failure
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Upstream fetch error
    #[error("Upstream error: {0}")]
    Fetch(#[from] FetchError),
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// Common error envelope
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            // Conflicts surface as 400 with an explanatory message
            ApiError::Conflict { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(err) => match err {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Invalid(_) | StoreError::Conflict(_) => StatusCode::BAD_REQUEST,
                StoreError::Transient(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Fetch(err) => match err {
                FetchError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable error label for the envelope
    pub fn error_label(&self) -> &'static str {
        match self {
            ApiError::ValidationError { .. } => "validation_error",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Unauthorized { .. } => "unauthorized",
            ApiError::QuotaExceeded { .. } => "rate_limit_exceeded",
            ApiError::Conflict { .. } => "conflict",
            ApiError::Internal { .. } => "internal_error",
            ApiError::Store(err) => match err {
                StoreError::NotFound(_) => "not_found",
                StoreError::Invalid(_) => "validation_error",
                StoreError::Conflict(_) => "conflict",
                StoreError::Transient(_) => "internal_error",
            },
            ApiError::Fetch(err) => match err {
                FetchError::RateLimited { .. } => "rate_limit_exceeded",
                _ => "upstream_error",
            },
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::ValidationError {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        ApiError::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let reset_at = match &self {
            ApiError::QuotaExceeded { reset_at, .. } => *reset_at,
            _ => None,
        };
        let body = ErrorResponse {
            error: self.error_label().to_string(),
            message: Some(self.to_string()),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(reset_at) = reset_at {
            if let Ok(value) = reset_at.timestamp().to_string().parse() {
                response.headers_mut().insert("X-RateLimit-Reset", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::not_found("job").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::unauthorized("no key").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Conflict {
                message: "cap".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Store(StoreError::Conflict("cap".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Fetch(FetchError::RateLimited { wait_ms: 10 }).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_error_labels() {
        assert_eq!(ApiError::validation("x").error_label(), "validation_error");
        assert_eq!(
            ApiError::Store(StoreError::Transient("io".into())).error_label(),
            "internal_error"
        );
    }
}
