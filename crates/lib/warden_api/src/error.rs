//! Application error types.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};
use warden_core::auth::AuthError;
use warden_core::csrf::CsrfError;
use warden_core::quota::QuotaError;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token invalid")]
    TokenInvalid,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("CSRF validation failed")]
    CsrfMismatch,

    #[error("Too many requests")]
    RateLimited { retry_after: Duration },

    #[error("Quota exceeded")]
    QuotaExceeded {
        retry_after: Duration,
        /// Unix ms.
        reset_at: i64,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(String),
}

/// Whole seconds for `Retry-After`, never below one.
fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "Invalid email or password".to_string(),
            ),
            AppError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "token_expired",
                "Token expired".to_string(),
            ),
            AppError::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                "token_invalid",
                "Token invalid".to_string(),
            ),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.clone()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.clone()),
            AppError::CsrfMismatch => (
                StatusCode::FORBIDDEN,
                "csrf_mismatch",
                "CSRF token missing or invalid".to_string(),
            ),
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests".to_string(),
            ),
            AppError::QuotaExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "quota_exceeded",
                "Usage quota exceeded for this period".to_string(),
            ),
            AppError::ServiceUnavailable(m) => {
                warn!("service unavailable: {m}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "Service temporarily unavailable".to_string(),
                )
            }
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            AppError::Internal(m) => {
                error!("internal error: {m}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let (retry_after, reset_at) = match &self {
            AppError::RateLimited { retry_after } => (Some(*retry_after), None),
            AppError::QuotaExceeded {
                retry_after,
                reset_at,
            } => (Some(*retry_after), Some(*reset_at)),
            _ => (None, None),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
            reset_at,
        });
        let mut response = (status, body).into_response();
        if let Some(retry_after) = retry_after {
            response.headers_mut().insert(
                RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => AppError::InvalidCredentials,
            AuthError::TokenExpired => AppError::TokenExpired,
            AuthError::TokenInvalid => AppError::TokenInvalid,
            AuthError::ServiceUnavailable(msg) => AppError::ServiceUnavailable(msg),
            AuthError::ValidationError(msg) => AppError::Validation(msg),
            AuthError::RegistrationDisabled => {
                AppError::Forbidden("Registration is disabled".into())
            }
            AuthError::DbError(e) => AppError::ServiceUnavailable(e.to_string()),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<QuotaError> for AppError {
    fn from(e: QuotaError) -> Self {
        match e {
            QuotaError::InvalidAmount => AppError::Validation(e.to_string()),
            QuotaError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
        }
    }
}

impl From<CsrfError> for AppError {
    fn from(_: CsrfError) -> Self {
        AppError::CsrfMismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(2500)), 3);
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let resp = AppError::RateLimited {
            retry_after: Duration::from_secs(7),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[RETRY_AFTER], "7");
    }

    #[test]
    fn auth_errors_map_to_distinct_statuses() {
        let unavailable = AppError::from(AuthError::ServiceUnavailable("down".into())).into_response();
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        let invalid = AppError::from(AuthError::InvalidCredentials).into_response();
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
        let csrf = AppError::from(CsrfError::Expired).into_response();
        assert_eq!(csrf.status(), StatusCode::FORBIDDEN);
    }
}
