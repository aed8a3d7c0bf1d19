//! Cookie service: build the refresh-token and CSRF cookies.
//!
//! The refresh cookie is httpOnly and scoped to the auth routes. The CSRF
//! cookie must stay readable by scripts so the value can be echoed back.

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use time::Duration;
use warden_core::csrf::{CSRF_COOKIE, CsrfTicket};

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "warden_refresh";

/// Path the refresh cookie is sent on.
const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";

/// Build a httpOnly cookie for the refresh token.
pub fn refresh_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE.to_string(), token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path(REFRESH_COOKIE_PATH)
        .max_age(Duration::seconds(max_age_secs))
        .build()
}

/// Build an expired cookie to clear the refresh token.
pub fn clear_refresh_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE.to_string(), String::new()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path(REFRESH_COOKIE_PATH)
        .max_age(Duration::ZERO)
        .build()
}

/// Build the CSRF cookie for a ticket.
pub fn csrf_cookie(ticket: &CsrfTicket, now: DateTime<Utc>) -> Cookie<'static> {
    let max_age = (ticket.expires_at - now).num_seconds().max(0);
    Cookie::build((CSRF_COOKIE.to_string(), ticket.value.clone()))
        .http_only(false)
        .secure(ticket.secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::seconds(max_age))
        .build()
}
