//! JWT access token generation and verification.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use super::AuthError;
use crate::models::auth::{Principal, TokenClaims};

/// Generate a signed HS256 access token issued at `now`.
///
/// Returns the token and its absolute expiry.
pub fn generate_access_token(
    principal: &Principal,
    secret: &[u8],
    now: DateTime<Utc>,
    lifetime: Duration,
) -> Result<(String, DateTime<Utc>), AuthError> {
    let expires_at = now + lifetime;
    let claims = TokenClaims {
        sub: principal.id.clone(),
        email: principal.email.clone(),
        tier: principal.tier,
        created: principal.created_at.timestamp(),
        exp: expires_at.timestamp(),
        iat: now.timestamp(),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
    Ok((token, expires_at))
}

/// Verify an access token's signature and expiry without touching storage.
pub fn verify_access_token(token: &str, secret: &[u8]) -> Result<TokenClaims, AuthError> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);
    decode::<TokenClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::TokenInvalid,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::Tier;

    const SECRET: &[u8] = b"test-secret-0123456789";

    fn principal() -> Principal {
        Principal {
            id: "p-1".into(),
            email: "a@b.io".into(),
            tier: Tier::Pro,
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn roundtrip_preserves_principal() {
        let (token, _) =
            generate_access_token(&principal(), SECRET, Utc::now(), Duration::minutes(15))
                .unwrap();
        let claims = verify_access_token(&token, SECRET).unwrap();
        assert_eq!(claims.principal(), principal());
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let issued = Utc::now() - Duration::hours(2);
        let (token, _) =
            generate_access_token(&principal(), SECRET, issued, Duration::hours(1)).unwrap();
        assert!(matches!(
            verify_access_token(&token, SECRET),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let (token, _) =
            generate_access_token(&principal(), SECRET, Utc::now(), Duration::minutes(15))
                .unwrap();
        assert!(matches!(
            verify_access_token(&token, b"another-secret-0123456789"),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            verify_access_token("not.a.jwt", SECRET),
            Err(AuthError::TokenInvalid)
        ));
    }
}
