//! SQLite-backed quota ledger (local mode).
//!
//! Windows are created lazily with `INSERT OR IGNORE` and charged with a
//! single conditional `UPDATE ... RETURNING`, so the check and the increment
//! happen in one statement and concurrent callers cannot over-admit.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use super::period::period_bounds;
use super::{QuotaError, QuotaLedger, QuotaPolicy};
use crate::clock::Clock;
use crate::models::auth::Principal;
use crate::models::quota::{Limit, QuotaDecision, QuotaWindow, ResourceKind};

pub struct LocalQuotaLedger {
    pool: SqlitePool,
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl LocalQuotaLedger {
    pub fn new(pool: SqlitePool, policy: QuotaPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            policy,
            clock,
        }
    }

    fn window(
        principal: &Principal,
        resource: ResourceKind,
        (period_start, period_end): (DateTime<Utc>, DateTime<Utc>),
        used: u64,
        limit: Limit,
    ) -> QuotaWindow {
        QuotaWindow {
            principal_id: principal.id.clone(),
            resource,
            period_start,
            period_end,
            used,
            limit,
        }
    }

    async fn ensure_window(
        &self,
        principal_id: &str,
        resource: ResourceKind,
        (start, end): (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<(), QuotaError> {
        sqlx::query(
            "INSERT OR IGNORE INTO quota_windows (principal_id, resource, period_start, period_end, used) \
             VALUES (?1, ?2, ?3, ?4, 0)",
        )
        .bind(principal_id)
        .bind(resource.as_str())
        .bind(start.timestamp())
        .bind(end.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_used(
        &self,
        principal_id: &str,
        resource: ResourceKind,
        start: DateTime<Utc>,
    ) -> Result<u64, QuotaError> {
        let used: Option<i64> = sqlx::query_scalar(
            "SELECT used FROM quota_windows \
             WHERE principal_id = ?1 AND resource = ?2 AND period_start = ?3",
        )
        .bind(principal_id)
        .bind(resource.as_str())
        .bind(start.timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(used.map(to_u64).unwrap_or(0))
    }

    /// Charge against a capped window. `None` means the charge did not fit.
    async fn charge_capped(
        &self,
        principal_id: &str,
        resource: ResourceKind,
        start: DateTime<Utc>,
        amount: u64,
        limit: u64,
    ) -> Result<Option<u64>, QuotaError> {
        let used: Option<i64> = sqlx::query_scalar(
            "UPDATE quota_windows SET used = used + ?4 \
             WHERE principal_id = ?1 AND resource = ?2 AND period_start = ?3 \
               AND used + ?4 <= ?5 \
             RETURNING used",
        )
        .bind(principal_id)
        .bind(resource.as_str())
        .bind(start.timestamp())
        .bind(to_i64(amount))
        .bind(to_i64(limit))
        .fetch_optional(&self.pool)
        .await?;
        Ok(used.map(to_u64))
    }

    async fn charge_unconditionally(
        &self,
        principal_id: &str,
        resource: ResourceKind,
        start: DateTime<Utc>,
        amount: u64,
    ) -> Result<u64, QuotaError> {
        let used: i64 = sqlx::query_scalar(
            "UPDATE quota_windows SET used = used + ?4 \
             WHERE principal_id = ?1 AND resource = ?2 AND period_start = ?3 \
             RETURNING used",
        )
        .bind(principal_id)
        .bind(resource.as_str())
        .bind(start.timestamp())
        .bind(to_i64(amount))
        .fetch_one(&self.pool)
        .await?;
        Ok(to_u64(used))
    }
}

#[async_trait]
impl QuotaLedger for LocalQuotaLedger {
    async fn check_and_consume(
        &self,
        principal: &Principal,
        resource: ResourceKind,
        amount: u64,
    ) -> Result<QuotaDecision, QuotaError> {
        if amount == 0 {
            return Err(QuotaError::InvalidAmount);
        }
        let bounds = period_bounds(self.policy.period, self.clock.now());
        let limit = self.policy.limit(principal.tier, resource);
        self.ensure_window(&principal.id, resource, bounds)
            .await
            .inspect_err(|e| warn!(principal_id = %principal.id, "quota ledger: {e}"))?;

        let capped = match limit {
            Limit::Capped(cap) if self.policy.enforce => Some(cap),
            _ => None,
        };
        let Some(cap) = capped else {
            let used = self
                .charge_unconditionally(&principal.id, resource, bounds.0, amount)
                .await?;
            return Ok(QuotaDecision::Allowed {
                window: Self::window(principal, resource, bounds, used, limit),
            });
        };

        match self
            .charge_capped(&principal.id, resource, bounds.0, amount, cap)
            .await?
        {
            Some(used) => {
                debug!(principal_id = %principal.id, %resource, used, "quota charged");
                Ok(QuotaDecision::Allowed {
                    window: Self::window(principal, resource, bounds, used, limit),
                })
            }
            None => {
                let used = self.read_used(&principal.id, resource, bounds.0).await?;
                debug!(principal_id = %principal.id, %resource, used, "quota exceeded");
                Ok(QuotaDecision::Exceeded {
                    window: Self::window(principal, resource, bounds, used, limit),
                })
            }
        }
    }

    async fn remaining(
        &self,
        principal: &Principal,
        resource: ResourceKind,
    ) -> Result<QuotaWindow, QuotaError> {
        let bounds = period_bounds(self.policy.period, self.clock.now());
        let used = self.read_used(&principal.id, resource, bounds.0).await?;
        Ok(Self::window(
            principal,
            resource,
            bounds,
            used,
            self.policy.limit(principal.tier, resource),
        ))
    }

    fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }
}
