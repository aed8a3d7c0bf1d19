//! Startup validation for [`WardenConfig`].

use super::{ConfigError, PeriodKind, WardenConfig};

/// Minimum accepted length for signing secrets.
const MIN_SECRET_LEN: usize = 16;

/// Upper bound on extra attempts after a transient provider failure.
pub const MAX_PROVIDER_RETRIES: u32 = 5;

/// Validate a loaded config. Returns every problem found, joined.
pub fn validate(config: &WardenConfig) -> Result<(), ConfigError> {
    let errors = collect_errors(config);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

/// Returns a list of validation error messages (empty = valid).
pub fn collect_errors(config: &WardenConfig) -> Vec<String> {
    let mut errors = Vec::new();
    let auth = &config.auth;
    let security = &config.security;
    let subscription = &config.subscription;

    // Delegated mode verifies tokens remotely, but the CSRF guard still signs
    // with the access secret unless a dedicated one is set.
    let signing_secret = security.csrf_secret(auth);
    if !config.delegated.enabled && auth.access_secret.len() < MIN_SECRET_LEN {
        errors.push(format!(
            "auth.access_secret must be at least {MIN_SECRET_LEN} bytes"
        ));
    } else if security.csrf_enabled && signing_secret.len() < MIN_SECRET_LEN {
        errors.push(format!(
            "security.csrf_secret (or auth.access_secret) must be at least {MIN_SECRET_LEN} bytes"
        ));
    }

    if auth.access_expire_secs <= 0 {
        errors.push("auth.access_expire_secs must be positive".into());
    }
    if auth.refresh_expire_secs <= 0 {
        errors.push("auth.refresh_expire_secs must be positive".into());
    }
    if auth.access_expire_secs > auth.refresh_expire_secs {
        errors.push("auth.access_expire_secs must not exceed auth.refresh_expire_secs".into());
    }

    if security.csrf_token_expiry_secs <= 0 {
        errors.push("security.csrf_token_expiry_secs must be positive".into());
    }
    if security.rate_limit_requests == 0 || security.rate_limit_interval_secs == 0 {
        errors.push("security.rate_limit_requests and rate_limit_interval_secs must be positive".into());
    }
    if security.rate_limit_burst == 0 {
        errors.push("security.rate_limit_burst must be positive".into());
    }
    if security.auth_rate_limit_requests == 0 || security.auth_rate_limit_interval_secs == 0 {
        errors.push(
            "security.auth_rate_limit_requests and auth_rate_limit_interval_secs must be positive"
                .into(),
        );
    }
    if security.auth_rate_limit_burst == Some(0) {
        errors.push("security.auth_rate_limit_burst must be positive".into());
    }

    for (name, value) in [
        ("free_tier_analyses", subscription.free_tier_analyses),
        ("pro_tier_analyses", subscription.pro_tier_analyses),
        ("team_tier_analyses", subscription.team_tier_analyses),
        ("free_tier_history_days", subscription.free_tier_history_days),
        ("pro_tier_history_days", subscription.pro_tier_history_days),
        ("team_tier_history_days", subscription.team_tier_history_days),
    ] {
        if value < -1 {
            errors.push(format!(
                "subscription.{name} must be -1 (unlimited) or non-negative"
            ));
        }
    }
    if let PeriodKind::RollingDays { days: 0 } = subscription.period {
        errors.push("subscription.period.days must be positive".into());
    }

    if config.delegated.max_retries > MAX_PROVIDER_RETRIES {
        errors.push(format!(
            "delegated.max_retries must not exceed {MAX_PROVIDER_RETRIES}"
        ));
    }

    if config.server.max_connections == 0 {
        errors.push("server.max_connections must be positive".into());
    }

    errors
}
