//! Rate-limit middleware: first gate on every request.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use warden_core::ratelimit::{EndpointClass, RateDecision};

use crate::AppState;
use crate::error::AppError;

/// Routes that always use the auth-sensitive bucket.
const AUTH_CLASS_PATHS: &[&str] = &[
    "/api/v1/auth/login",
    "/api/v1/auth/register",
    "/api/v1/auth/refresh",
    "/api/v1/user/password",
];

pub fn classify(path: &str) -> EndpointClass {
    if AUTH_CLASS_PATHS.contains(&path.trim_end_matches('/')) {
        EndpointClass::Auth
    } else {
        EndpointClass::General
    }
}

/// Client identity: the first forwarded hop when trusted, else the peer IP.
fn client_key(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for
        && let Some(first) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let limiter = &state.services.rate_limiter;
    if limiter.is_enabled() {
        let class = classify(request.uri().path());
        let client = client_key(&request, state.config.trust_forwarded_for);
        if let RateDecision::Limited { retry_after } = limiter.check(&client, class) {
            return Err(AppError::RateLimited { retry_after });
        }
    }
    Ok(next.run(request).await)
}
