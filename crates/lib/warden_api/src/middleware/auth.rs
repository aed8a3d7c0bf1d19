//! Authentication middleware: Bearer token extraction and verification.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use warden_core::models::auth::Principal;

use crate::AppState;
use crate::error::AppError;

/// Verified principal, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

/// The raw bearer token, for handlers that must forward it.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Axum middleware: extracts `Authorization: Bearer <token>`, verifies it
/// through the active token service, and injects [`AuthenticatedUser`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?
        .to_string();

    let principal = state.services.tokens.verify(&token).await?;

    request.extensions_mut().insert(AuthenticatedUser(principal));
    request.extensions_mut().insert(BearerToken(token));

    Ok(next.run(request).await)
}
