//! HTTP-layer configuration, derived from [`WardenConfig`].

use warden_core::config::WardenConfig;

/// Settings the router and handlers need at request time.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// CORS origins; empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Key rate-limit buckets on the first `X-Forwarded-For` hop.
    pub trust_forwarded_for: bool,
    pub max_request_body_size: usize,
    pub registration_enabled: bool,
    /// Lifetime of the refresh-token cookie.
    pub refresh_cookie_max_age_secs: i64,
    /// Set the `Secure` attribute on cookies.
    pub secure_cookies: bool,
}

impl ApiConfig {
    pub fn from_config(config: &WardenConfig) -> Self {
        Self {
            allowed_origins: config.server.allowed_origins.clone(),
            trust_forwarded_for: config.server.trust_forwarded_for,
            max_request_body_size: config.server.max_request_body_size,
            registration_enabled: config.auth.registration_enabled,
            refresh_cookie_max_age_secs: config.auth.refresh_expire_secs,
            secure_cookies: config.security.csrf_secure_cookie,
        }
    }
}
