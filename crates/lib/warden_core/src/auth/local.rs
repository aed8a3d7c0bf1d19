//! Local token backend: SQLite credential store and HS256 access tokens.
//!
//! Access tokens verify without a database round-trip. Refresh tokens are
//! single-use: each refresh moves the presented token from `active` to
//! `consumed` and issues a new pair in the same transaction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use super::{AuthError, TokenService, hash_token, jwt, normalize_email, password, store, validate_email};
use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::config::AuthConfig;
use crate::mode::Mode;
use crate::models::auth::{Principal, RefreshState, TokenPair, Tier};

/// Length of generated refresh tokens.
const REFRESH_TOKEN_LEN: usize = 64;

/// Generate a cryptographically random refresh token (64 alphanumeric chars).
fn generate_refresh_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Token service backed by the local credential store.
pub struct LocalTokenService {
    pool: SqlitePool,
    secret: Vec<u8>,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
    registration_enabled: bool,
    audit: Arc<dyn AuditSink>,
}

impl LocalTokenService {
    pub fn new(pool: SqlitePool, config: &AuthConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            pool,
            secret: config.access_secret.as_bytes().to_vec(),
            access_lifetime: Duration::seconds(config.access_expire_secs),
            refresh_lifetime: Duration::seconds(config.refresh_expire_secs),
            registration_enabled: config.registration_enabled,
            audit,
        }
    }

    /// Mint a new pair and persist its refresh token on `conn`.
    async fn issue_pair(
        &self,
        conn: &mut SqliteConnection,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, AuthError> {
        let (access_token, access_expires_at) =
            jwt::generate_access_token(principal, &self.secret, now, self.access_lifetime)?;
        let refresh_token = generate_refresh_token();
        let refresh_expires_at = (now + self.refresh_lifetime).max(access_expires_at);
        store::store_refresh_token(
            conn,
            &hash_token(&refresh_token),
            &principal.id,
            now,
            refresh_expires_at,
        )
        .await?;
        Ok(TokenPair::new(
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
            Mode::Local,
        ))
    }

    fn audit(&self, principal_id: &str, action: AuditAction) {
        self.audit
            .record(AuditEvent::now(principal_id, action, Mode::Local));
    }
}

#[async_trait]
impl TokenService for LocalTokenService {
    fn mode(&self) -> Mode {
        Mode::Local
    }

    async fn register(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        if !self.registration_enabled {
            return Err(AuthError::RegistrationDisabled);
        }
        validate_email(email)?;
        password::validate_new_password(password)?;

        let email = normalize_email(email);
        let hash = password::hash_password(password)?;
        let now = Utc::now();
        let principal = store::create_principal(&self.pool, &email, &hash, Tier::Free, now).await?;

        let mut conn = self.pool.acquire().await?;
        let pair = self.issue_pair(&mut conn, &principal, now).await?;
        info!(principal_id = %principal.id, email = %email, "principal registered");
        self.audit(&principal.id, AuditAction::Register);
        Ok(pair)
    }

    async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        let email = normalize_email(email);
        let Some(row) = store::find_principal_by_email(&self.pool, &email).await? else {
            password::verify_dummy(password);
            return Err(AuthError::InvalidCredentials);
        };
        let Some(hash) = row.password_hash.as_deref() else {
            password::verify_dummy(password);
            return Err(AuthError::InvalidCredentials);
        };
        if !password::verify_password(password, hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        let mut conn = self.pool.acquire().await?;
        let pair = self.issue_pair(&mut conn, &row.principal, Utc::now()).await?;
        info!(principal_id = %row.principal.id, email = %email, "principal logged in (local)");
        self.audit(&row.principal.id, AuditAction::Login);
        Ok(pair)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let token_hash = hash_token(refresh_token);
        let record = store::find_refresh_token(&self.pool, &token_hash)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        let now = Utc::now();

        match record.state {
            RefreshState::Active => {}
            RefreshState::Consumed => {
                // A consumed token coming back means it leaked: cut off the
                // whole family.
                let mut conn = self.pool.acquire().await?;
                let revoked =
                    store::revoke_all_refresh_tokens(&mut conn, &record.principal_id, now).await?;
                warn!(
                    principal_id = %record.principal_id,
                    revoked,
                    "refresh token reuse detected"
                );
                return Err(AuthError::TokenInvalid);
            }
            RefreshState::Revoked => return Err(AuthError::TokenInvalid),
        }
        if record.expires_at <= now {
            return Err(AuthError::TokenExpired);
        }

        let principal = store::find_principal_by_id(&self.pool, &record.principal_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?
            .principal;

        let mut tx = self.pool.begin().await?;
        if !store::consume_refresh_token(&mut tx, &record.id, now).await? {
            // Lost the race to a concurrent refresh; the transaction rolls back on drop.
            return Err(AuthError::TokenInvalid);
        }
        let pair = self.issue_pair(&mut tx, &principal, now).await?;
        tx.commit().await?;

        self.audit(&principal.id, AuditAction::Refresh);
        Ok(pair)
    }

    async fn verify(&self, access_token: &str) -> Result<Principal, AuthError> {
        jwt::verify_access_token(access_token, &self.secret).map(|claims| claims.principal())
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let token_hash = hash_token(refresh_token);
        let revoked =
            store::revoke_refresh_token_by_hash(&self.pool, &token_hash, Utc::now()).await?;
        if revoked > 0
            && let Some(record) = store::find_refresh_token(&self.pool, &token_hash).await?
        {
            self.audit(&record.principal_id, AuditAction::Logout);
        }
        Ok(())
    }

    async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let principal = self.verify(access_token).await?;
        let row = store::find_principal_by_id(&self.pool, &principal.id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        let hash = row
            .password_hash
            .as_deref()
            .ok_or(AuthError::InvalidCredentials)?;
        if !password::verify_password(current_password, hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        password::validate_new_password(new_password)?;
        let new_hash = password::hash_password(new_password)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        store::update_password_hash(&mut tx, &principal.id, &new_hash).await?;
        let revoked = store::revoke_all_refresh_tokens(&mut tx, &principal.id, now).await?;
        tx.commit().await?;

        info!(principal_id = %principal.id, revoked, "password changed");
        self.audit(&principal.id, AuditAction::PasswordChange);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::db::connect_in_memory;

    fn config() -> AuthConfig {
        AuthConfig {
            access_secret: "local-test-secret-0123456789".into(),
            ..AuthConfig::default()
        }
    }

    async fn service() -> LocalTokenService {
        let pool = connect_in_memory().await.unwrap();
        LocalTokenService::new(pool, &config(), Arc::new(TracingAuditSink))
    }

    #[tokio::test]
    async fn login_then_verify_returns_same_principal() {
        let svc = service().await;
        let registered = svc.register("Ann@Example.com", "hunter2hunter2").await.unwrap();
        let registered_principal = svc.verify(&registered.access_token).await.unwrap();

        let pair = svc.login("ann@example.com", "hunter2hunter2").await.unwrap();
        let principal = svc.verify(&pair.access_token).await.unwrap();
        assert_eq!(principal, registered_principal);
        assert_eq!(principal.email, "ann@example.com");
        assert_eq!(principal.tier, Tier::Free);
        assert_eq!(pair.mode, Mode::Local);
        assert!(pair.access_expires_at <= pair.refresh_expires_at);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_identical() {
        let svc = service().await;
        svc.register("ben@example.com", "correct-password").await.unwrap();

        let wrong = svc.login("ben@example.com", "wrong-password").await.unwrap_err();
        let unknown = svc.login("nobody@example.com", "wrong-password").await.unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn refresh_token_is_single_use() {
        let svc = service().await;
        let pair = svc.register("cat@example.com", "password-123").await.unwrap();

        let rotated = svc.refresh(&pair.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert!(svc.verify(&rotated.access_token).await.is_ok());

        let second = svc.refresh(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(second, AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn reusing_a_consumed_token_revokes_the_family() {
        let svc = service().await;
        let pair = svc.register("dan@example.com", "password-123").await.unwrap();
        let rotated = svc.refresh(&pair.refresh_token).await.unwrap();

        assert!(svc.refresh(&pair.refresh_token).await.is_err());
        let err = svc.refresh(&rotated.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_admit_exactly_one() {
        let svc = Arc::new(service().await);
        let pair = svc.register("eve@example.com", "password-123").await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let svc = Arc::clone(&svc);
                let token = pair.refresh_token.clone();
                tokio::spawn(async move { svc.refresh(&token).await })
            })
            .collect();
        let results = futures::future::join_all(tasks).await;
        let ok = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn unknown_refresh_token_is_invalid() {
        let svc = service().await;
        assert!(matches!(
            svc.refresh("does-not-exist").await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn expired_refresh_token_is_reported_as_expired() {
        let svc = service().await;
        let pair = svc.register("fay@example.com", "password-123").await.unwrap();
        let principal = svc.verify(&pair.access_token).await.unwrap();

        let stale = "stale-refresh-token";
        let past = Utc::now() - Duration::days(10);
        let mut conn = svc.pool.acquire().await.unwrap();
        store::store_refresh_token(
            &mut conn,
            &hash_token(stale),
            &principal.id,
            past,
            past + Duration::days(1),
        )
        .await
        .unwrap();
        drop(conn);

        assert!(matches!(svc.refresh(stale).await, Err(AuthError::TokenExpired)));
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_blocks_refresh() {
        let svc = service().await;
        let pair = svc.register("gus@example.com", "password-123").await.unwrap();

        svc.logout(&pair.refresh_token).await.unwrap();
        svc.logout(&pair.refresh_token).await.unwrap();
        svc.logout("never-issued").await.unwrap();
        assert!(matches!(
            svc.refresh(&pair.refresh_token).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn password_change_revokes_refresh_tokens() {
        let svc = service().await;
        let pair = svc.register("hal@example.com", "old-password").await.unwrap();
        let err = svc
            .change_password(&pair.access_token, "not-the-password", "new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        svc.change_password(&pair.access_token, "old-password", "new-password")
            .await
            .unwrap();
        assert!(svc.refresh(&pair.refresh_token).await.is_err());
        assert!(svc.login("hal@example.com", "old-password").await.is_err());
        assert!(svc.login("hal@example.com", "new-password").await.is_ok());
    }

    #[tokio::test]
    async fn registration_can_be_disabled() {
        let pool = connect_in_memory().await.unwrap();
        let config = AuthConfig {
            registration_enabled: false,
            ..config()
        };
        let svc = LocalTokenService::new(pool, &config, Arc::new(TracingAuditSink));
        assert!(matches!(
            svc.register("ivy@example.com", "password-123").await,
            Err(AuthError::RegistrationDisabled)
        ));
    }
}
