//! Short-lived cache of verified provider tokens.
//!
//! Entries never outlive the token they describe: each one expires at the
//! earlier of `now + ttl` and the token's own expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::auth::hash_token;
use crate::models::auth::Principal;

/// Default upper bound on cached tokens.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone)]
struct CacheEntry {
    principal: Principal,
    expires_at: DateTime<Utc>,
}

/// Verified-token cache keyed by the SHA-256 of the access token.
#[derive(Debug)]
pub struct VerifyCache {
    entries: DashMap<String, CacheEntry>,
    ttl: chrono::Duration,
    max_entries: usize,
}

impl VerifyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Cached principal for `token`, if present and still fresh at `now`.
    pub fn get(&self, token: &str, now: DateTime<Utc>) -> Option<Principal> {
        let key = hash_token(token);
        let hit = self
            .entries
            .get(&key)
            .map(|entry| (entry.expires_at > now).then(|| entry.principal.clone()))?;
        if hit.is_none() {
            self.entries.remove(&key);
        }
        hit
    }

    /// Cache a verification result.
    pub fn insert(
        &self,
        token: &str,
        principal: Principal,
        token_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let expires_at = (now + self.ttl).min(token_expires_at);
        if expires_at <= now {
            return;
        }
        if self.entries.len() >= self.max_entries {
            self.cleanup(now);
            if self.entries.len() >= self.max_entries {
                return;
            }
        }
        self.entries.insert(
            hash_token(token),
            CacheEntry {
                principal,
                expires_at,
            },
        );
    }

    pub fn invalidate(&self, token: &str) {
        self.entries.remove(&hash_token(token));
    }

    /// Drop every cached token of one principal.
    pub fn invalidate_principal(&self, principal_id: &str) {
        self.entries.retain(|_, e| e.principal.id != principal_id);
    }

    /// Evict expired entries.
    pub fn cleanup(&self, now: DateTime<Utc>) {
        self.entries.retain(|_, e| e.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                cache.cleanup(Utc::now());
            }
        })
    }
}
