//! Structured configuration: YAML file plus environment overrides.
//!
//! Every field has a default so an empty file (or no file) yields a usable
//! local-mode configuration once an access secret is supplied.

pub mod validation;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors. Always fatal: they abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Delegated provider misconfigured: {0}")]
    Delegated(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub subscription: SubscriptionConfig,
    pub delegated: DelegatedConfig,
}

/// HTTP listener and local database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// SQLite URL used in local mode.
    pub database_url: String,
    pub max_connections: u32,
    /// CORS origins; empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Use the first `X-Forwarded-For` entry as the client key.
    pub trust_forwarded_for: bool,
    pub max_request_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8888".into(),
            database_url: "sqlite://./data/warden.db?mode=rwc".into(),
            max_connections: 5,
            allowed_origins: Vec::new(),
            trust_forwarded_for: false,
            max_request_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Token issuance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret for local access tokens.
    pub access_secret: String,
    pub access_expire_secs: i64,
    pub refresh_expire_secs: i64,
    pub registration_enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            access_expire_secs: 15 * 60,
            refresh_expire_secs: 7 * 24 * 60 * 60,
            registration_enabled: true,
        }
    }
}

/// CSRF and rate-limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub csrf_enabled: bool,
    /// Falls back to `auth.access_secret` when empty.
    pub csrf_secret: String,
    pub csrf_token_expiry_secs: i64,
    pub csrf_secure_cookie: bool,

    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_interval_secs: u64,
    pub rate_limit_burst: u32,
    pub auth_rate_limit_requests: u32,
    pub auth_rate_limit_interval_secs: u64,
    /// Defaults to `auth_rate_limit_requests` when unset.
    pub auth_rate_limit_burst: Option<u32>,
    /// Buckets untouched for this long are evicted.
    pub rate_limit_idle_ttl_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            csrf_enabled: true,
            csrf_secret: String::new(),
            csrf_token_expiry_secs: 12 * 60 * 60,
            csrf_secure_cookie: true,
            rate_limit_enabled: true,
            rate_limit_requests: 100,
            rate_limit_interval_secs: 60,
            rate_limit_burst: 20,
            auth_rate_limit_requests: 5,
            auth_rate_limit_interval_secs: 60,
            auth_rate_limit_burst: None,
            rate_limit_idle_ttl_secs: 10 * 60,
        }
    }
}

impl SecurityConfig {
    /// Secret used to sign CSRF tickets.
    pub fn csrf_secret<'a>(&'a self, auth: &'a AuthConfig) -> &'a str {
        if self.csrf_secret.is_empty() {
            &auth.access_secret
        } else {
            &self.csrf_secret
        }
    }
}

/// How billing periods are cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PeriodKind {
    CalendarMonth,
    RollingDays { days: u32 },
}

/// Subscription tiers, quota caps and history retention.
///
/// Caps and retention use `-1` for "unlimited".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub enforce_quotas: bool,
    pub period: PeriodKind,
    pub free_tier_analyses: i64,
    pub pro_tier_analyses: i64,
    pub team_tier_analyses: i64,
    pub free_tier_history_days: i64,
    pub pro_tier_history_days: i64,
    pub team_tier_history_days: i64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            enforce_quotas: true,
            period: PeriodKind::CalendarMonth,
            free_tier_analyses: 5,
            pro_tier_analyses: 100,
            team_tier_analyses: -1,
            free_tier_history_days: 7,
            pro_tier_history_days: 30,
            team_tier_history_days: -1,
        }
    }
}

/// External identity/billing provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegatedConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// Extra attempts after a transient failure.
    pub max_retries: u32,
    pub verify_cache_ttl_secs: u64,
    pub usage_cache_ttl_secs: u64,
}

impl Default for DelegatedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            timeout_secs: 10,
            max_retries: 2,
            verify_cache_ttl_secs: 60,
            usage_cache_ttl_secs: 30,
        }
    }
}

impl DelegatedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl WardenConfig {
    /// Load a YAML config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&raw)?;
        config.apply_env();
        Ok(config)
    }

    /// Parse YAML without touching the environment.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply environment variable overrides.
    ///
    /// | Variable                     | Field                 |
    /// |------------------------------|-----------------------|
    /// | `WARDEN_ACCESS_SECRET`       | `auth.access_secret`  |
    /// | `DATABASE_URL`               | `server.database_url` |
    /// | `BIND_ADDR`                  | `server.bind_addr`    |
    /// | `WARDEN_DELEGATED_API_KEY`   | `delegated.api_key`   |
    /// | `WARDEN_DELEGATED_BASE_URL`  | `delegated.base_url`  |
    pub fn apply_env(&mut self) {
        let set = |target: &mut String, var: &str| {
            if let Ok(value) = std::env::var(var)
                && !value.is_empty()
            {
                *target = value;
            }
        };
        set(&mut self.auth.access_secret, "WARDEN_ACCESS_SECRET");
        set(&mut self.server.database_url, "DATABASE_URL");
        set(&mut self.server.bind_addr, "BIND_ADDR");
        set(&mut self.delegated.api_key, "WARDEN_DELEGATED_API_KEY");
        set(&mut self.delegated.base_url, "WARDEN_DELEGATED_BASE_URL");
    }

    /// Run every startup check; see [`validation::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)
    }
}
