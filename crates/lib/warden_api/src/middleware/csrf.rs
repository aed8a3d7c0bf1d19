//! CSRF middleware: double-submit check on mutating requests.
//!
//! The ticket is read from the `warden_csrf` cookie and compared with the
//! `X-CSRF-Token` header or, failing that, the `csrfToken` field of a JSON
//! body. Safe methods pass through untouched.

use axum::body::{Body, to_bytes};
use axum::http::Method;
use axum::http::header::CONTENT_TYPE;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use tracing::debug;
use warden_core::csrf::{CSRF_BODY_FIELD, CSRF_COOKIE, CSRF_HEADER};

use crate::AppState;
use crate::error::AppError;

fn is_mutating(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

fn is_json(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

pub async fn csrf_protect(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let guard = &state.services.csrf;
    if !guard.is_enabled() || !is_mutating(request.method()) {
        return Ok(next.run(request).await);
    }

    let cookie = CookieJar::from_headers(request.headers())
        .get(CSRF_COOKIE)
        .map(|c| c.value().to_string());
    let header = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (request, submitted) = match header {
        Some(value) => (request, Some(value)),
        None if is_json(&request) => {
            // Buffer the body to look for the field, then hand it on intact.
            let (parts, body) = request.into_parts();
            let bytes = to_bytes(body, state.config.max_request_body_size)
                .await
                .map_err(|e| AppError::Validation(format!("Unreadable request body: {e}")))?;
            let submitted = serde_json::from_slice::<serde_json::Value>(&bytes)
                .ok()
                .and_then(|v| v.get(CSRF_BODY_FIELD)?.as_str().map(str::to_string));
            (Request::from_parts(parts, Body::from(bytes)), submitted)
        }
        None => (request, None),
    };

    if let Err(e) = guard.validate(cookie.as_deref(), submitted.as_deref(), Utc::now()) {
        debug!(path = %request.uri().path(), "csrf rejected: {e}");
        return Err(e.into());
    }
    Ok(next.run(request).await)
}
