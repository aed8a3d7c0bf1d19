//! Authentication request handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use warden_core::csrf::CSRF_COOKIE;
use warden_core::models::auth::TokenPair;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::BearerToken;
use crate::models::{
    AuthConfigResponse, ChangePasswordRequest, CsrfResponse, LoginRequest, RefreshRequest,
    RegisterRequest, TokenResponse,
};
use crate::services::cookies::{REFRESH_COOKIE, clear_refresh_cookie, csrf_cookie, refresh_cookie};

impl From<&TokenPair> for TokenResponse {
    fn from(pair: &TokenPair) -> Self {
        Self {
            token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            expires_at: pair.access_expires_at.timestamp_millis(),
        }
    }
}

/// Cookie lifetime: the pair's remaining refresh lifetime, capped by config.
fn refresh_max_age(pair: &TokenPair, cap_secs: i64, now: DateTime<Utc>) -> i64 {
    (pair.refresh_expires_at - now)
        .num_seconds()
        .clamp(0, cap_secs.max(0))
}

fn with_refresh_cookie(state: &AppState, jar: CookieJar, pair: &TokenPair) -> CookieJar {
    let max_age = refresh_max_age(pair, state.config.refresh_cookie_max_age_secs, Utc::now());
    jar.add(refresh_cookie(
        &pair.refresh_token,
        max_age,
        state.config.secure_cookies,
    ))
}

/// Attach the refresh cookie for `pair` and rotate the CSRF ticket.
fn session_cookies(state: &AppState, jar: CookieJar, pair: &TokenPair) -> CookieJar {
    let jar = with_refresh_cookie(state, jar, pair);
    rotate_csrf(state, jar)
}

fn rotate_csrf(state: &AppState, jar: CookieJar) -> CookieJar {
    let guard = &state.services.csrf;
    if !guard.is_enabled() {
        return jar;
    }
    let now = Utc::now();
    let ticket = guard.rotate(jar.get(CSRF_COOKIE).map(|c| c.value()), now);
    jar.add(csrf_cookie(&ticket, now))
}

/// Refresh token from the JSON body, falling back to the refresh cookie.
fn refresh_token_from(body: &Bytes, jar: &CookieJar) -> AppResult<Option<String>> {
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<RefreshRequest>(body)
            .map_err(|e| AppError::Validation(format!("Invalid request body: {e}")))?
            .refresh_token
    };
    Ok(from_body
        .filter(|t| !t.is_empty())
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()))
        .filter(|t| !t.is_empty()))
}

/// `GET /api/v1/auth/config`: operating mode and enabled features.
pub async fn config_handler(State(state): State<AppState>) -> Json<AuthConfigResponse> {
    Json(AuthConfigResponse {
        mode: state.services.mode.mode().to_string(),
        registration_enabled: state.config.registration_enabled,
        csrf_enabled: state.services.csrf.is_enabled(),
    })
}

/// `GET /api/v1/auth/csrf`: issue (or rotate) the CSRF ticket.
pub async fn csrf_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<CsrfResponse>) {
    let now = Utc::now();
    let ticket = state
        .services
        .csrf
        .rotate(jar.get(CSRF_COOKIE).map(|c| c.value()), now);
    let body = CsrfResponse {
        csrf_token: ticket.value.clone(),
        expires_at: ticket.expires_at.timestamp_millis(),
    };
    (jar.add(csrf_cookie(&ticket, now)), Json(body))
}

/// `POST /api/v1/auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let pair = state.services.tokens.login(&body.email, &body.password).await?;
    let jar = session_cookies(&state, jar, &pair);
    Ok((jar, Json(TokenResponse::from(&pair))))
}

/// `POST /api/v1/auth/register`: create an account and sign in.
pub async fn register_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let pair = state
        .services
        .tokens
        .register(&body.email, &body.password)
        .await?;
    let jar = session_cookies(&state, jar, &pair);
    Ok((jar, Json(TokenResponse::from(&pair))))
}

/// `POST /api/v1/auth/refresh`: exchange a refresh token for a new pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let token = refresh_token_from(&body, &jar)?.ok_or(AppError::TokenInvalid)?;
    let pair = state.services.tokens.refresh(&token).await?;
    let jar = with_refresh_cookie(&state, jar, &pair);
    Ok((jar, Json(TokenResponse::from(&pair))))
}

/// `POST /api/v1/auth/logout`: revoke the refresh token. Idempotent.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(StatusCode, CookieJar)> {
    if let Some(token) = refresh_token_from(&body, &jar)? {
        state.services.tokens.logout(&token).await?;
    }
    let jar = jar.add(clear_refresh_cookie(state.config.secure_cookies));
    Ok((StatusCode::NO_CONTENT, jar))
}

/// `POST /api/v1/user/password`: change the caller's password.
///
/// Every refresh token of the principal is revoked, so the refresh cookie is
/// cleared and the CSRF ticket rotated.
pub async fn change_password_handler(
    State(state): State<AppState>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    jar: CookieJar,
    Json(body): Json<ChangePasswordRequest>,
) -> AppResult<(StatusCode, CookieJar)> {
    state
        .services
        .tokens
        .change_password(&token, &body.current_password, &body.new_password)
        .await?;
    let jar = jar.add(clear_refresh_cookie(state.config.secure_cookies));
    Ok((StatusCode::NO_CONTENT, rotate_csrf(&state, jar)))
}
