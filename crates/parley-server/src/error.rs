//! HTTP error responses.

use crate::metrics;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use parley_core::{PipelineError, RateLimited};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request is malformed or fails validation.
    #[error("{0}")]
    BadRequest(String),

    /// No valid session.
    #[error("Unauthorized - No valid session")]
    Unauthorized,

    /// A rate limiter stage rejected the request.
    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    /// Something failed on our side. The detail is logged, not returned.
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(e) => Self::BadRequest(e.to_string()),
            PipelineError::Storage(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::RateLimited(limited) => {
                metrics::record_rate_limited(&limited.stage);
                let retry_after = limited.retry_after_secs();
                let mut response = (
                    status,
                    Json(json!({
                        "message": limited.message,
                        "retryAfterSeconds": retry_after,
                    })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
            Self::Internal(detail) => {
                error!(error = %detail, "Request failed");
                metrics::record_error("internal");
                (
                    status,
                    Json(json!({ "message": "Internal server error" })),
                )
                    .into_response()
            }
            other => (status, Json(json!({ "message": other.to_string() }))).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{StorageError, ValidationError};
    use std::time::Duration;

    #[test]
    fn test_rate_limited_response() {
        let err = ApiError::from(RateLimited {
            stage: "signup".into(),
            retry_after: Duration::from_millis(1500),
            message: "Too many signup attempts. Try again later.".into(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn test_pipeline_error_mapping() {
        let validation = ApiError::from(PipelineError::from(ValidationError::EmptyMessage));
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(validation.to_string(), "Message text or image is required");

        let storage = ApiError::from(PipelineError::from(StorageError::Unavailable("down".into())));
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.to_string(), "Internal server error");
    }
}
