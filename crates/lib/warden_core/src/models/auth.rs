//! Authentication domain models.
//!
//! These are internal domain models, distinct from the HTTP response shapes in
//! `warden_api` (which have `#[serde(rename_all = "camelCase")]` etc.).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mode::Mode;

/// Subscription tier of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Team,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Team => "team",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "team" => Ok(Tier::Team),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
}

/// Principal row including the password hash (local auth flows only).
#[derive(Debug, Clone)]
pub struct PrincipalWithPassword {
    pub principal: Principal,
    pub password_hash: Option<String>,
}

/// Access + refresh token issued to one principal at one point in time.
///
/// `access_expires_at <= refresh_expires_at` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub mode: Mode,
}

impl TokenPair {
    /// Build a pair, clamping the refresh expiry so it never precedes the
    /// access expiry.
    pub fn new(
        access_token: String,
        refresh_token: String,
        access_expires_at: DateTime<Utc>,
        refresh_expires_at: DateTime<Utc>,
        mode: Mode,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at: refresh_expires_at.max(access_expires_at),
            mode,
        }
    }
}

/// Lifecycle of a stored refresh token. `Consumed` and `Revoked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Active,
    /// Exchanged for a new pair.
    Consumed,
    /// Invalidated by logout, password change, or reuse detection.
    Revoked,
}

impl RefreshState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshState::Active => "active",
            RefreshState::Consumed => "consumed",
            RefreshState::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RefreshState::Active),
            "consumed" => Some(RefreshState::Consumed),
            "revoked" => Some(RefreshState::Revoked),
            _ => None,
        }
    }
}

/// Refresh token record stored in the database.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub principal_id: String,
    pub state: RefreshState,
    pub expires_at: DateTime<Utc>,
}

/// JWT claims embedded in local access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: principal ID (standard JWT `sub` claim).
    pub sub: String,
    pub email: String,
    pub tier: Tier,
    /// Principal creation time (unix timestamp).
    pub created: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

impl TokenClaims {
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.sub.clone(),
            email: self.email.clone(),
            tier: self.tier,
            created_at: DateTime::from_timestamp(self.created, 0).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn tier_parses_case_insensitively() {
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert!("enterprise".parse::<Tier>().is_err());
    }

    #[test]
    fn token_pair_clamps_refresh_expiry() {
        let now = Utc::now();
        let pair = TokenPair::new(
            "a".into(),
            "r".into(),
            now + Duration::minutes(15),
            now,
            Mode::Delegated,
        );
        assert_eq!(pair.refresh_expires_at, pair.access_expires_at);
    }

    #[test]
    fn refresh_state_roundtrips_through_text() {
        for state in [RefreshState::Active, RefreshState::Consumed, RefreshState::Revoked] {
            assert_eq!(RefreshState::parse(state.as_str()), Some(state));
        }
        assert_eq!(RefreshState::parse("bogus"), None);
    }
}
