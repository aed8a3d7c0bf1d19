//! Delegated client adapter: the external identity and billing provider.
//!
//! The token service and quota ledger talk to the provider only through the
//! [`DelegatedClient`] trait. [`http::HttpDelegatedClient`] is the production
//! implementation; tests substitute an in-process fake.

pub mod cache;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::auth::Principal;
use crate::models::quota::ResourceKind;

/// Provider call failures, already classified for the callers.
#[derive(Debug, Error)]
pub enum DelegatedError {
    /// Credentials or token rejected by the provider.
    #[error("Provider rejected the credentials")]
    Unauthorized,

    #[error("Provider account not found")]
    NotFound,

    /// Request understood but refused (duplicate account, weak password, ...).
    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    /// Network failure, timeout, or provider-side error. Retryable.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Provider answered with something we could not decode.
    #[error("Provider protocol error: {0}")]
    Protocol(String),
}

impl DelegatedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DelegatedError::Unavailable(_))
    }
}

/// Token pair as the provider returns it. Expiries are RFC 3339 strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSession {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: String,
    #[serde(default)]
    pub refresh_expires_at: Option<String>,
}

/// Result of a successful provider token verification.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub principal: Principal,
    pub expires_at: DateTime<Utc>,
}

/// Usage counters held by the provider for one billing period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUsage {
    pub used: u64,
    /// `-1` for unlimited.
    pub limit: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Operations the provider must offer.
#[async_trait]
pub trait DelegatedClient: Send + Sync {
    async fn register(&self, email: &str, password: &str) -> Result<ProviderSession, DelegatedError>;

    async fn login(&self, email: &str, password: &str) -> Result<ProviderSession, DelegatedError>;

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderSession, DelegatedError>;

    async fn verify_token(&self, access_token: &str) -> Result<VerifiedToken, DelegatedError>;

    /// Revoke a refresh token. Unknown tokens are not an error.
    async fn revoke(&self, refresh_token: &str) -> Result<(), DelegatedError>;

    async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), DelegatedError>;

    async fn get_usage(
        &self,
        principal_id: &str,
        resource: ResourceKind,
    ) -> Result<ProviderUsage, DelegatedError>;

    /// Report consumption. `idempotency_key` lets retries be deduplicated.
    async fn record_usage(
        &self,
        principal_id: &str,
        resource: ResourceKind,
        amount: u64,
        idempotency_key: &str,
    ) -> Result<(), DelegatedError>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-process provider used by unit tests.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use chrono::Duration;

    use super::*;
    use crate::models::auth::Tier;

    #[derive(Default)]
    struct State {
        /// email -> (principal, password)
        accounts: HashMap<String, (Principal, String)>,
        /// access token -> (principal id, expiry)
        access: HashMap<String, (String, DateTime<Utc>)>,
        /// refresh token -> principal id
        refresh: HashMap<String, String>,
        usage: HashMap<String, u64>,
        seq: u64,
    }

    /// Minimal provider: accounts, opaque tokens, and a usage counter.
    #[derive(Default)]
    pub struct FakeProvider {
        state: Mutex<State>,
        pub down: AtomicBool,
        pub verify_calls: AtomicUsize,
        pub usage_calls: AtomicUsize,
        pub limit: Mutex<i64>,
        pub access_ttl: Mutex<Option<Duration>>,
        /// Artificial latency on `verify_token`.
        pub verify_delay: Mutex<Option<std::time::Duration>>,
    }

    impl FakeProvider {
        pub fn new() -> Self {
            let fake = Self::default();
            *fake.limit.lock().unwrap() = 5;
            fake
        }

        pub fn add_account(&self, id: &str, email: &str, password: &str, tier: Tier) {
            let principal = Principal {
                id: id.into(),
                email: email.into(),
                tier,
                created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            };
            self.state
                .lock()
                .unwrap()
                .accounts
                .insert(email.into(), (principal, password.into()));
        }

        pub fn set_used(&self, principal_id: &str, used: u64) {
            self.state
                .lock()
                .unwrap()
                .usage
                .insert(principal_id.into(), used);
        }

        pub fn used(&self, principal_id: &str) -> u64 {
            self.state
                .lock()
                .unwrap()
                .usage
                .get(principal_id)
                .copied()
                .unwrap_or(0)
        }

        pub fn revoke_access(&self, access_token: &str) {
            self.state.lock().unwrap().access.remove(access_token);
        }

        fn check_up(&self) -> Result<(), DelegatedError> {
            if self.down.load(Ordering::SeqCst) {
                Err(DelegatedError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }

        fn mint(&self, state: &mut State, principal_id: &str) -> ProviderSession {
            state.seq += 1;
            let ttl = self
                .access_ttl
                .lock()
                .unwrap()
                .unwrap_or(Duration::minutes(15));
            let expires = Utc::now() + ttl;
            let access = format!("acc-{}-{}", principal_id, state.seq);
            let refresh = format!("ref-{}-{}", principal_id, state.seq);
            state
                .access
                .insert(access.clone(), (principal_id.into(), expires));
            state.refresh.insert(refresh.clone(), principal_id.into());
            ProviderSession {
                access_token: access,
                refresh_token: refresh,
                access_expires_at: expires.to_rfc3339(),
                refresh_expires_at: Some((Utc::now() + Duration::days(7)).to_rfc3339()),
            }
        }
    }

    #[async_trait]
    impl DelegatedClient for FakeProvider {
        async fn register(&self, email: &str, password: &str) -> Result<ProviderSession, DelegatedError> {
            self.check_up()?;
            if self.state.lock().unwrap().accounts.contains_key(email) {
                return Err(DelegatedError::Rejected("email taken".into()));
            }
            let id = format!("prov-{email}");
            self.add_account(&id, email, password, Tier::Free);
            let mut state = self.state.lock().unwrap();
            Ok(self.mint(&mut state, &id))
        }

        async fn login(&self, email: &str, password: &str) -> Result<ProviderSession, DelegatedError> {
            self.check_up()?;
            let mut state = self.state.lock().unwrap();
            let id = match state.accounts.get(email) {
                Some((p, pw)) if pw == password => p.id.clone(),
                Some(_) => return Err(DelegatedError::Unauthorized),
                None => return Err(DelegatedError::NotFound),
            };
            Ok(self.mint(&mut state, &id))
        }

        async fn refresh(&self, refresh_token: &str) -> Result<ProviderSession, DelegatedError> {
            self.check_up()?;
            let mut state = self.state.lock().unwrap();
            let id = state
                .refresh
                .remove(refresh_token)
                .ok_or(DelegatedError::Unauthorized)?;
            Ok(self.mint(&mut state, &id))
        }

        async fn verify_token(&self, access_token: &str) -> Result<VerifiedToken, DelegatedError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.verify_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.check_up()?;
            let state = self.state.lock().unwrap();
            let (id, expires_at) = state
                .access
                .get(access_token)
                .cloned()
                .ok_or(DelegatedError::Unauthorized)?;
            let principal = state
                .accounts
                .values()
                .find(|(p, _)| p.id == id)
                .map(|(p, _)| p.clone())
                .ok_or(DelegatedError::NotFound)?;
            Ok(VerifiedToken {
                principal,
                expires_at,
            })
        }

        async fn revoke(&self, refresh_token: &str) -> Result<(), DelegatedError> {
            self.check_up()?;
            self.state.lock().unwrap().refresh.remove(refresh_token);
            Ok(())
        }

        async fn change_password(
            &self,
            access_token: &str,
            current_password: &str,
            new_password: &str,
        ) -> Result<(), DelegatedError> {
            self.check_up()?;
            let mut state = self.state.lock().unwrap();
            let (id, _) = state
                .access
                .get(access_token)
                .cloned()
                .ok_or(DelegatedError::Unauthorized)?;
            let entry = state
                .accounts
                .values_mut()
                .find(|(p, _)| p.id == id)
                .ok_or(DelegatedError::NotFound)?;
            if entry.1 != current_password {
                return Err(DelegatedError::Unauthorized);
            }
            entry.1 = new_password.to_string();
            Ok(())
        }

        async fn get_usage(
            &self,
            principal_id: &str,
            _resource: ResourceKind,
        ) -> Result<ProviderUsage, DelegatedError> {
            self.usage_calls.fetch_add(1, Ordering::SeqCst);
            self.check_up()?;
            let now = Utc::now();
            Ok(ProviderUsage {
                used: self.used(principal_id),
                limit: *self.limit.lock().unwrap(),
                period_start: now - Duration::days(1),
                period_end: now + Duration::days(29),
            })
        }

        async fn record_usage(
            &self,
            principal_id: &str,
            _resource: ResourceKind,
            amount: u64,
            _idempotency_key: &str,
        ) -> Result<(), DelegatedError> {
            self.check_up()?;
            *self
                .state
                .lock()
                .unwrap()
                .usage
                .entry(principal_id.into())
                .or_default() += amount;
            Ok(())
        }
    }
}
