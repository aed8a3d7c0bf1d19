//! Delegated token backend: the external provider is authoritative.
//!
//! Provider tokens are opaque. Verification goes through a bounded TTL cache
//! so the hot path does not need a network round-trip per request.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::{AuthError, TokenService, normalize_email, validate_email};
use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::delegated::cache::VerifyCache;
use crate::delegated::http::parse_provider_time;
use crate::delegated::{DelegatedClient, DelegatedError, ProviderSession};
use crate::mode::Mode;
use crate::models::auth::{Principal, TokenPair};

/// Token service that forwards every operation to the provider.
pub struct DelegatedTokenService {
    client: Arc<dyn DelegatedClient>,
    cache: Arc<VerifyCache>,
    registration_enabled: bool,
    audit: Arc<dyn AuditSink>,
}

/// Provider is down or answered nonsense.
fn unavailable(e: DelegatedError) -> AuthError {
    AuthError::ServiceUnavailable(e.to_string())
}

impl DelegatedTokenService {
    pub fn new(
        client: Arc<dyn DelegatedClient>,
        cache: Arc<VerifyCache>,
        registration_enabled: bool,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            client,
            cache,
            registration_enabled,
            audit,
        }
    }

    pub fn cache(&self) -> &Arc<VerifyCache> {
        &self.cache
    }

    /// Re-express a provider session as a [`TokenPair`].
    fn to_pair(session: ProviderSession) -> Result<TokenPair, AuthError> {
        let access_expires_at =
            parse_provider_time(&session.access_expires_at).map_err(unavailable)?;
        let refresh_expires_at = match session.refresh_expires_at.as_deref() {
            Some(raw) => parse_provider_time(raw).map_err(unavailable)?,
            None => access_expires_at,
        };
        Ok(TokenPair::new(
            session.access_token,
            session.refresh_token,
            access_expires_at,
            refresh_expires_at,
            Mode::Delegated,
        ))
    }

    /// Resolve the principal behind a freshly issued pair in the background,
    /// then audit. Also warms the verify cache. The caller never waits on it.
    fn spawn_audit(&self, pair: &TokenPair, action: AuditAction) {
        let client = Arc::clone(&self.client);
        let cache = Arc::clone(&self.cache);
        let audit = Arc::clone(&self.audit);
        let access_token = pair.access_token.clone();
        tokio::spawn(async move {
            match verify_with(client.as_ref(), &cache, &access_token).await {
                Ok(principal) => {
                    audit.record(AuditEvent::now(&principal.id, action, Mode::Delegated))
                }
                Err(e) => warn!(
                    action = action.as_str(),
                    "delegated: could not resolve principal for audit: {e}"
                ),
            }
        });
    }
}

/// Cache lookup, then provider verification on a miss.
async fn verify_with(
    client: &dyn DelegatedClient,
    cache: &VerifyCache,
    access_token: &str,
) -> Result<Principal, AuthError> {
    let now = Utc::now();
    if let Some(principal) = cache.get(access_token, now) {
        return Ok(principal);
    }
    let verified = client
        .verify_token(access_token)
        .await
        .map_err(|e| match e {
            DelegatedError::Unauthorized
            | DelegatedError::NotFound
            | DelegatedError::Rejected(_) => AuthError::TokenInvalid,
            other => unavailable(other),
        })?;
    if verified.expires_at <= now {
        return Err(AuthError::TokenExpired);
    }
    debug!(principal_id = %verified.principal.id, "delegated token verified");
    cache.insert(
        access_token,
        verified.principal.clone(),
        verified.expires_at,
        now,
    );
    Ok(verified.principal)
}

#[async_trait]
impl TokenService for DelegatedTokenService {
    fn mode(&self) -> Mode {
        Mode::Delegated
    }

    async fn register(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        if !self.registration_enabled {
            return Err(AuthError::RegistrationDisabled);
        }
        validate_email(email)?;
        let email = normalize_email(email);
        let session = self
            .client
            .register(&email, password)
            .await
            .map_err(|e| match e {
                DelegatedError::Rejected(msg) => AuthError::ValidationError(msg),
                DelegatedError::Unauthorized | DelegatedError::NotFound => {
                    AuthError::ValidationError("Registration rejected".into())
                }
                other => unavailable(other),
            })?;
        let pair = Self::to_pair(session)?;
        info!(email = %email, "principal registered (delegated)");
        self.spawn_audit(&pair, AuditAction::Register);
        Ok(pair)
    }

    async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        let email = normalize_email(email);
        let session = self
            .client
            .login(&email, password)
            .await
            .map_err(|e| match e {
                DelegatedError::Unauthorized
                | DelegatedError::NotFound
                | DelegatedError::Rejected(_) => AuthError::InvalidCredentials,
                other => unavailable(other),
            })?;
        let pair = Self::to_pair(session)?;
        info!(email = %email, "principal logged in (delegated)");
        self.spawn_audit(&pair, AuditAction::Login);
        Ok(pair)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let session = self
            .client
            .refresh(refresh_token)
            .await
            .map_err(|e| match e {
                DelegatedError::Unauthorized
                | DelegatedError::NotFound
                | DelegatedError::Rejected(_) => AuthError::TokenInvalid,
                other => unavailable(other),
            })?;
        let pair = Self::to_pair(session)?;
        self.spawn_audit(&pair, AuditAction::Refresh);
        Ok(pair)
    }

    async fn verify(&self, access_token: &str) -> Result<Principal, AuthError> {
        verify_with(self.client.as_ref(), &self.cache, access_token).await
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        match self.client.revoke(refresh_token).await {
            // Unknown to the provider counts as already logged out.
            Ok(()) | Err(DelegatedError::Unauthorized | DelegatedError::NotFound) => Ok(()),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let principal = self.verify(access_token).await?;
        self.client
            .change_password(access_token, current_password, new_password)
            .await
            .map_err(|e| match e {
                DelegatedError::Unauthorized | DelegatedError::NotFound => {
                    AuthError::InvalidCredentials
                }
                DelegatedError::Rejected(msg) => AuthError::ValidationError(msg),
                other => unavailable(other),
            })?;
        self.cache.invalidate_principal(&principal.id);
        info!(principal_id = %principal.id, "password changed (delegated)");
        self.audit.record(AuditEvent::now(
            &principal.id,
            AuditAction::PasswordChange,
            Mode::Delegated,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::delegated::fake::FakeProvider;
    use crate::models::auth::Tier;

    fn service(provider: Arc<FakeProvider>) -> DelegatedTokenService {
        DelegatedTokenService::new(
            provider,
            Arc::new(VerifyCache::new(Duration::from_secs(60))),
            true,
            Arc::new(TracingAuditSink),
        )
    }

    /// Wait for the background audit lookup to land in the verify cache.
    async fn settle(svc: &DelegatedTokenService) {
        for _ in 0..100 {
            if !svc.cache().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<AuditEvent>>);

    impl AuditSink for RecordingSink {
        fn record(&self, event: AuditEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn provider() -> Arc<FakeProvider> {
        let provider = Arc::new(FakeProvider::new());
        provider.add_account("p-1", "ann@example.com", "secret-pw", Tier::Pro);
        provider
    }

    #[tokio::test]
    async fn login_maps_provider_session_to_token_pair() {
        let svc = service(provider());
        let pair = svc.login("Ann@Example.com", "secret-pw").await.unwrap();
        assert_eq!(pair.mode, Mode::Delegated);
        assert!(pair.access_expires_at <= pair.refresh_expires_at);

        let principal = svc.verify(&pair.access_token).await.unwrap();
        assert_eq!(principal.id, "p-1");
        assert_eq!(principal.tier, Tier::Pro);
    }

    #[tokio::test]
    async fn login_does_not_wait_for_audit_lookup() {
        let provider = provider();
        *provider.verify_delay.lock().unwrap() = Some(Duration::from_secs(1));
        let sink = Arc::new(RecordingSink::default());
        let svc = DelegatedTokenService::new(
            Arc::clone(&provider) as Arc<dyn DelegatedClient>,
            Arc::new(VerifyCache::new(Duration::from_secs(60))),
            true,
            Arc::clone(&sink) as Arc<dyn AuditSink>,
        );

        let started = Instant::now();
        svc.login("ann@example.com", "secret-pw").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(sink.0.lock().unwrap().is_empty());

        // The audit entry still arrives once the slow lookup finishes.
        for _ in 0..40 {
            if !sink.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let events = sink.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].principal_id, "p-1");
        assert_eq!(events[0].action, AuditAction::Login);
    }

    #[tokio::test]
    async fn bad_password_and_unknown_account_are_invalid_credentials() {
        let svc = service(provider());
        assert!(matches!(
            svc.login("ann@example.com", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            svc.login("nobody@example.com", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn provider_outage_is_not_invalid_credentials() {
        let provider = provider();
        provider.down.store(true, Ordering::SeqCst);
        let svc = service(provider);
        assert!(matches!(
            svc.login("ann@example.com", "secret-pw").await,
            Err(AuthError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn verify_is_served_from_cache() {
        let provider = provider();
        let svc = service(Arc::clone(&provider));
        let pair = svc.login("ann@example.com", "secret-pw").await.unwrap();
        settle(&svc).await;
        let calls = provider.verify_calls.load(Ordering::SeqCst);

        for _ in 0..5 {
            svc.verify(&pair.access_token).await.unwrap();
        }
        assert_eq!(provider.verify_calls.load(Ordering::SeqCst), calls);

        // Cached result survives a provider outage until the entry expires.
        provider.down.store(true, Ordering::SeqCst);
        assert!(svc.verify(&pair.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn cache_entry_does_not_outlive_short_token() {
        let provider = provider();
        *provider.access_ttl.lock().unwrap() = Some(chrono::Duration::milliseconds(1500));
        let svc = service(Arc::clone(&provider));
        let pair = svc.login("ann@example.com", "secret-pw").await.unwrap();
        assert!(svc.verify(&pair.access_token).await.is_ok());

        tokio::time::sleep(Duration::from_millis(1600)).await;
        provider.revoke_access(&pair.access_token);
        assert!(matches!(
            svc.verify(&pair.access_token).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn refresh_is_single_use_on_the_provider() {
        let svc = service(provider());
        let pair = svc.login("ann@example.com", "secret-pw").await.unwrap();
        assert!(svc.refresh(&pair.refresh_token).await.is_ok());
        assert!(matches!(
            svc.refresh(&pair.refresh_token).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let svc = service(provider());
        let pair = svc.login("ann@example.com", "secret-pw").await.unwrap();
        svc.logout(&pair.refresh_token).await.unwrap();
        svc.logout(&pair.refresh_token).await.unwrap();
        assert!(svc.refresh(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn register_conflict_is_a_validation_error() {
        let svc = service(provider());
        assert!(matches!(
            svc.register("ann@example.com", "whatever-pw").await,
            Err(AuthError::ValidationError(_))
        ));
        let pair = svc.register("new@example.com", "whatever-pw").await.unwrap();
        assert_eq!(svc.verify(&pair.access_token).await.unwrap().tier, Tier::Free);
    }

    #[tokio::test]
    async fn password_change_is_forwarded() {
        let svc = service(provider());
        let pair = svc.login("ann@example.com", "secret-pw").await.unwrap();
        assert!(matches!(
            svc.change_password(&pair.access_token, "nope", "next-pw-123").await,
            Err(AuthError::InvalidCredentials)
        ));
        svc.change_password(&pair.access_token, "secret-pw", "next-pw-123")
            .await
            .unwrap();
        assert!(svc.login("ann@example.com", "next-pw-123").await.is_ok());
    }
}
