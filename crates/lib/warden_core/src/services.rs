//! Startup wiring: the one place that branches on [`Mode`].
//!
//! Everything downstream holds trait objects and never asks which mode is
//! active.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::info;

use crate::audit::{AuditSink, SqliteAuditSink, TracingAuditSink};
use crate::auth::TokenService;
use crate::auth::delegated::DelegatedTokenService;
use crate::auth::local::LocalTokenService;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, WardenConfig};
use crate::csrf::CsrfGuard;
use crate::db;
use crate::delegated::DelegatedClient;
use crate::delegated::cache::VerifyCache;
use crate::delegated::http::HttpDelegatedClient;
use crate::mode::{Mode, ModeSelector};
use crate::quota::delegated::DelegatedQuotaLedger;
use crate::quota::local::LocalQuotaLedger;
use crate::quota::{QuotaLedger, QuotaPolicy};
use crate::ratelimit::RateLimiter;

/// Long-lived services shared by every request.
#[derive(Clone)]
pub struct Services {
    pub mode: ModeSelector,
    pub tokens: Arc<dyn TokenService>,
    pub quota: Arc<dyn QuotaLedger>,
    pub rate_limiter: Arc<RateLimiter>,
    pub csrf: Arc<CsrfGuard>,
    verify_cache: Option<Arc<VerifyCache>>,
    pool: Option<SqlitePool>,
}

impl Services {
    /// Build everything from a validated config. Local mode opens (and
    /// migrates) the database; delegated mode constructs the provider client.
    pub async fn build(config: &WardenConfig) -> Result<Self, ConfigError> {
        let mode = ModeSelector::from_config(&config.delegated)?;
        match mode.mode() {
            Mode::Local => {
                let pool =
                    db::connect(&config.server.database_url, config.server.max_connections)
                        .await
                        .map_err(|e| ConfigError::ValidationError(format!("database: {e}")))?;
                Self::local(config, pool, Arc::new(SystemClock))
            }
            Mode::Delegated => {
                let client = HttpDelegatedClient::new(&config.delegated)
                    .map_err(|e| ConfigError::Delegated(e.to_string()))?;
                Self::delegated(config, Arc::new(client), Arc::new(SystemClock))
            }
        }
    }

    /// Local-mode services over an existing pool.
    pub fn local(
        config: &WardenConfig,
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let audit: Arc<dyn AuditSink> = Arc::new(SqliteAuditSink::new(pool.clone()));
        let tokens = LocalTokenService::new(pool.clone(), &config.auth, audit);
        let quota = LocalQuotaLedger::new(
            pool.clone(),
            QuotaPolicy::from_config(&config.subscription),
            clock,
        );
        let csrf = CsrfGuard::from_config(&config.security, &config.auth)?;
        info!(mode = %Mode::Local, "services ready");
        Ok(Self {
            mode: ModeSelector::fixed(Mode::Local),
            tokens: Arc::new(tokens),
            quota: Arc::new(quota),
            rate_limiter: Arc::new(RateLimiter::from_config(&config.security)),
            csrf: Arc::new(csrf),
            verify_cache: None,
            pool: Some(pool),
        })
    }

    /// Delegated-mode services over an existing provider client.
    pub fn delegated(
        config: &WardenConfig,
        client: Arc<dyn DelegatedClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let delegated = &config.delegated;
        let cache = Arc::new(VerifyCache::new(std::time::Duration::from_secs(
            delegated.verify_cache_ttl_secs,
        )));
        let tokens = DelegatedTokenService::new(
            Arc::clone(&client),
            Arc::clone(&cache),
            config.auth.registration_enabled,
            Arc::new(TracingAuditSink),
        );
        let quota = DelegatedQuotaLedger::new(
            client,
            QuotaPolicy::from_config(&config.subscription),
            clock,
            std::time::Duration::from_secs(delegated.usage_cache_ttl_secs),
        );
        let csrf = CsrfGuard::from_config(&config.security, &config.auth)?;
        info!(mode = %Mode::Delegated, base_url = %delegated.base_url, "services ready");
        Ok(Self {
            mode: ModeSelector::fixed(Mode::Delegated),
            tokens: Arc::new(tokens),
            quota: Arc::new(quota),
            rate_limiter: Arc::new(RateLimiter::from_config(&config.security)),
            csrf: Arc::new(csrf),
            verify_cache: Some(cache),
            pool: None,
        })
    }

    /// Database pool, present in local mode only.
    pub fn pool(&self) -> Option<&SqlitePool> {
        self.pool.as_ref()
    }

    /// Start the periodic eviction tasks for in-memory state.
    pub fn spawn_cleanup_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            self.rate_limiter.spawn_cleanup_task(),
            self.csrf.spawn_cleanup_task(),
        ];
        if let Some(cache) = &self.verify_cache {
            handles.push(cache.spawn_cleanup_task());
        }
        handles
    }
}
