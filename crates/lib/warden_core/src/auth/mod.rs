//! Authentication: one token-service contract, two backends.
//!
//! [`TokenService`] is implemented by [`local::LocalTokenService`] (SQLite
//! credential store, HS256 access tokens, single-use refresh tokens) and by
//! [`delegated::DelegatedTokenService`] (external provider with a short-lived
//! verification cache). The backend is chosen once at startup.

pub mod delegated;
pub mod jwt;
pub mod local;
pub mod password;
pub mod store;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::mode::Mode;
use crate::models::auth::{Principal, TokenPair};

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong email or password. Never says which.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token invalid")]
    TokenInvalid,

    /// Backend or provider unreachable. Distinct from bad credentials.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Registration is disabled")]
    RegistrationDisabled,

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Uniform authentication contract for both operating modes.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Mode that issued this service's tokens.
    fn mode(&self) -> Mode;

    /// Create an account and return its first token pair.
    async fn register(&self, email: &str, password: &str) -> Result<TokenPair, AuthError>;

    /// Exchange credentials for a fresh token pair.
    async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError>;

    /// Exchange a refresh token for a new pair.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;

    /// Resolve an access token to its principal. Hot path.
    async fn verify(&self, access_token: &str) -> Result<Principal, AuthError>;

    /// Invalidate a refresh token. Idempotent.
    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;

    /// Replace the password of the principal holding `access_token` and
    /// invalidate its outstanding refresh tokens.
    async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;
}

/// SHA-256 hex digest of a token, used wherever tokens are stored or keyed.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lowercase and trim an email for lookup and storage.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check applied before registration.
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AuthError::ValidationError("Invalid email address".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_is_stable_hex() {
        let digest = hash_token("abc");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_token("abc"));
        assert_ne!(digest, hash_token("abd"));
    }

    #[test]
    fn normalize_email_lowercases_and_trims() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn validate_email_requires_local_part_and_domain() {
        assert!(validate_email("a@b.io").is_ok());
        assert!(validate_email("@b.io").is_err());
        assert!(validate_email("a@localhost").is_err());
        assert!(validate_email("plain").is_err());
    }
}
