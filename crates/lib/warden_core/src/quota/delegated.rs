//! Provider-backed quota ledger (delegated mode).
//!
//! The provider owns the usage counters. We keep a per-key cached copy in a
//! sharded map, decide admission against it under the shard lock, and report
//! the charge to the provider after the lock is released. A failed report
//! rolls the local charge back and fails closed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use super::{QuotaError, QuotaLedger, QuotaPolicy};
use crate::clock::Clock;
use crate::delegated::{DelegatedClient, ProviderUsage};
use crate::models::auth::Principal;
use crate::models::quota::{Limit, QuotaDecision, QuotaWindow, ResourceKind};
use crate::uuid::uuidv7;

#[derive(Debug, Clone)]
struct CachedUsage {
    used: u64,
    remote_limit: Limit,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    fetched_at: DateTime<Utc>,
}

impl CachedUsage {
    fn from_remote(usage: ProviderUsage, now: DateTime<Utc>) -> Self {
        Self {
            used: usage.used,
            remote_limit: Limit::from_config(usage.limit),
            period_start: usage.period_start,
            period_end: usage.period_end,
            fetched_at: now,
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now < self.period_end && now < self.fetched_at + ttl
    }
}

/// The stricter of two limits.
fn stricter(a: Limit, b: Limit) -> Limit {
    match (a, b) {
        (Limit::Capped(x), Limit::Capped(y)) => Limit::Capped(x.min(y)),
        (Limit::Capped(x), Limit::Unlimited) | (Limit::Unlimited, Limit::Capped(x)) => {
            Limit::Capped(x)
        }
        (Limit::Unlimited, Limit::Unlimited) => Limit::Unlimited,
    }
}

type Key = (String, ResourceKind);

pub struct DelegatedQuotaLedger {
    client: Arc<dyn DelegatedClient>,
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
    cache: DashMap<Key, CachedUsage>,
    cache_ttl: Duration,
}

impl DelegatedQuotaLedger {
    pub fn new(
        client: Arc<dyn DelegatedClient>,
        policy: QuotaPolicy,
        clock: Arc<dyn Clock>,
        cache_ttl: std::time::Duration,
    ) -> Self {
        Self {
            client,
            policy,
            clock,
            cache: DashMap::new(),
            cache_ttl: Duration::from_std(cache_ttl).unwrap_or(Duration::zero()),
        }
    }

    /// Make sure the cached copy for `key` is usable, fetching outside any lock.
    async fn refresh_if_stale(&self, key: &Key, now: DateTime<Utc>) -> Result<(), QuotaError> {
        let fresh = self
            .cache
            .get(key)
            .is_some_and(|entry| entry.is_fresh(now, self.cache_ttl));
        if fresh {
            return Ok(());
        }

        let remote = self
            .client
            .get_usage(&key.0, key.1)
            .await
            .map_err(|e| QuotaError::Unavailable(e.to_string()))?;
        let fetched = CachedUsage::from_remote(remote, now);
        self.cache
            .entry(key.clone())
            .and_modify(|entry| {
                // Keep local charges the provider has not reflected yet.
                let used = if entry.period_start == fetched.period_start {
                    entry.used.max(fetched.used)
                } else {
                    fetched.used
                };
                *entry = CachedUsage {
                    used,
                    ..fetched.clone()
                };
            })
            .or_insert_with(|| fetched.clone());
        Ok(())
    }

    fn snapshot(&self, principal: &Principal, resource: ResourceKind, entry: &CachedUsage) -> QuotaWindow {
        QuotaWindow {
            principal_id: principal.id.clone(),
            resource,
            period_start: entry.period_start,
            period_end: entry.period_end,
            used: entry.used,
            limit: stricter(self.policy.limit(principal.tier, resource), entry.remote_limit),
        }
    }

    fn rollback(&self, key: &Key, period_start: DateTime<Utc>, amount: u64) {
        if let Some(mut entry) = self.cache.get_mut(key)
            && entry.period_start == period_start
        {
            entry.used = entry.used.saturating_sub(amount);
        }
    }
}

#[async_trait]
impl QuotaLedger for DelegatedQuotaLedger {
    async fn check_and_consume(
        &self,
        principal: &Principal,
        resource: ResourceKind,
        amount: u64,
    ) -> Result<QuotaDecision, QuotaError> {
        if amount == 0 {
            return Err(QuotaError::InvalidAmount);
        }
        let key = (principal.id.clone(), resource);
        let now = self.clock.now();
        self.refresh_if_stale(&key, now).await?;

        // Decide and charge under the shard lock; no await in this block.
        let decision = {
            let mut entry = self
                .cache
                .get_mut(&key)
                .ok_or_else(|| QuotaError::Unavailable("usage cache entry vanished".into()))?;
            let limit = stricter(self.policy.limit(principal.tier, resource), entry.remote_limit);
            if !self.policy.enforce || limit.admits(entry.used, amount) {
                entry.used = entry.used.saturating_add(amount);
                QuotaDecision::Allowed {
                    window: self.snapshot(principal, resource, &entry),
                }
            } else {
                QuotaDecision::Exceeded {
                    window: self.snapshot(principal, resource, &entry),
                }
            }
        };

        if let QuotaDecision::Allowed { window } = &decision {
            let idempotency_key = uuidv7();
            if let Err(e) = self
                .client
                .record_usage(&principal.id, resource, amount, &idempotency_key)
                .await
            {
                warn!(principal_id = %principal.id, %resource, "usage report failed, rolling back: {e}");
                self.rollback(&key, window.period_start, amount);
                return Err(QuotaError::Unavailable(e.to_string()));
            }
            debug!(principal_id = %principal.id, %resource, used = window.used, "quota charged (delegated)");
        }
        Ok(decision)
    }

    async fn remaining(
        &self,
        principal: &Principal,
        resource: ResourceKind,
    ) -> Result<QuotaWindow, QuotaError> {
        let key = (principal.id.clone(), resource);
        let now = self.clock.now();
        if let Err(e) = self.refresh_if_stale(&key, now).await {
            // A stale copy is good enough for display.
            let stale = self.cache.get(&key).map(|entry| entry.value().clone());
            return match stale {
                Some(entry) => Ok(self.snapshot(principal, resource, &entry)),
                None => Err(e),
            };
        }
        let entry = self
            .cache
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| QuotaError::Unavailable("usage cache entry vanished".into()))?;
        Ok(self.snapshot(principal, resource, &entry))
    }

    fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }
}
