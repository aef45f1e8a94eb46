// ABOUTME: API error type with HTTP status mapping and structured JSON responses
// ABOUTME: Every handler failure funnels through here so clients see one consistent error shape

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use patchbox_challenges::ChallengeError;
use patchbox_quota::QuotaDecision;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Main application error type that all handlers should return
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Challenge not found: {0}")]
    ChallengeNotFound(String),

    #[error("Rate limit exceeded")]
    RateLimited { decision: QuotaDecision },

    #[error("Submission already in flight")]
    DuplicateSubmission { existing_status: String },

    /// Wrap challenge store failures
    #[error("Challenge store error")]
    Challenges(#[from] ChallengeError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Structured error response format for API consistency
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
    request_id: String,
}

/// Error detail structure with machine-readable codes
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    /// Status of the submission already holding the key, on conflicts.
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

impl ApiError {
    /// Convert ApiError to appropriate HTTP status code and error code
    fn to_status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::ChallengeNotFound(_) => (StatusCode::NOT_FOUND, "CHALLENGE_NOT_FOUND"),
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            ApiError::DuplicateSubmission { .. } => (StatusCode::CONFLICT, "SUBMISSION_IN_FLIGHT"),
            ApiError::Challenges(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Get user-friendly error message (sanitized for external consumption)
    fn to_user_message(&self) -> String {
        match self {
            ApiError::Validation(msg) => format!("Validation failed: {}", msg),
            ApiError::ChallengeNotFound(id) => format!("Challenge '{}' was not found", id),
            ApiError::RateLimited { .. } => {
                "Too many submissions. Please try again later".to_string()
            }
            ApiError::DuplicateSubmission { .. } => {
                "This submission is already being processed".to_string()
            }
            ApiError::Challenges(_) => "Challenge data is unavailable".to_string(),
            ApiError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status_code, error_code) = self.to_status_and_code();
        let user_message = self.to_user_message();

        // Log internal errors with full context but don't expose details
        match &self {
            ApiError::Internal(err) => {
                error!(
                    request_id = %request_id,
                    error = %err,
                    "Internal server error occurred"
                );
            }
            ApiError::Challenges(err) => {
                error!(
                    request_id = %request_id,
                    storage_error = %err,
                    "Challenge store error"
                );
            }
            ApiError::RateLimited { decision } => {
                error!(
                    request_id = %request_id,
                    limit = decision.limit,
                    audit = true,
                    "Rate limit exceeded"
                );
            }
            _ => {
                // Expected business logic errors
                tracing::info!(
                    request_id = %request_id,
                    error_code = %error_code,
                    error = %self,
                    "API error response"
                );
            }
        }

        let mut error_detail = ErrorDetail {
            code: error_code.to_string(),
            message: user_message,
            retry_after: None,
            status: None,
        };

        if let ApiError::RateLimited { decision } = &self {
            error_detail.retry_after = Some(seconds_until(decision));
        }
        if let ApiError::DuplicateSubmission { existing_status } = &self {
            error_detail.status = Some(existing_status.clone());
        }

        let error_response = ErrorResponse {
            success: false,
            error: error_detail,
            request_id,
        };

        let mut response = Json(error_response).into_response();
        *response.status_mut() = status_code;

        if let ApiError::RateLimited { decision } = &self {
            let headers = response.headers_mut();
            apply_rate_limit_headers(headers, decision);
            headers.insert("Retry-After", HeaderValue::from(seconds_until(decision)));
        }

        response
    }
}

/// Standard quota headers, attached to 429s and to accepted submissions.
pub(crate) fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &QuotaDecision) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "X-RateLimit-Reset",
        HeaderValue::from(decision.reset_at.timestamp_millis()),
    );
}

fn seconds_until(decision: &QuotaDecision) -> u64 {
    (decision.reset_at - Utc::now()).num_seconds().max(1) as u64
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Helper functions for common error scenarios
impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}
