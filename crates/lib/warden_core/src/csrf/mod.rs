//! CSRF guard: signed double-submit tickets bound to a session.
//!
//! A ticket has the form `session.expiry.nonce.signature`, where the
//! signature is an HMAC-SHA256 over the first three parts. The guard keeps
//! the current nonce per session, so issuing a new ticket for a session
//! invalidates the previous one.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use crate::config::{AuthConfig, ConfigError, SecurityConfig};

type HmacSha256 = Hmac<Sha256>;

/// Name of the cookie carrying the ticket. Readable by scripts so they can
/// echo it back.
pub const CSRF_COOKIE: &str = "warden_csrf";

/// Header clients echo the ticket in.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// JSON body field accepted instead of the header.
pub const CSRF_BODY_FIELD: &str = "csrfToken";

const ID_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CsrfError {
    #[error("CSRF token missing")]
    Missing,

    #[error("CSRF token mismatch")]
    Mismatch,

    #[error("CSRF token expired")]
    Expired,

    /// Superseded by a newer ticket for the same session.
    #[error("CSRF token no longer valid")]
    Stale,
}

/// A freshly issued ticket.
#[derive(Debug, Clone)]
pub struct CsrfTicket {
    pub value: String,
    pub session: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub secure: bool,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    nonce: String,
    expires_at: DateTime<Utc>,
}

struct ParsedTicket<'a> {
    session: &'a str,
    expires_at: i64,
    nonce: &'a str,
    signature: &'a str,
    signed: &'a str,
}

fn parse(ticket: &str) -> Option<ParsedTicket<'_>> {
    let (signed, signature) = ticket.rsplit_once('.')?;
    let mut parts = signed.splitn(3, '.');
    let session = parts.next()?;
    let expires_at = parts.next()?.parse().ok()?;
    let nonce = parts.next()?;
    if session.is_empty() || nonce.is_empty() {
        return None;
    }
    Some(ParsedTicket {
        session,
        expires_at,
        nonce,
        signature,
        signed,
    })
}

fn random_id() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

pub struct CsrfGuard {
    enabled: bool,
    /// Keyed once; cloned per signature.
    mac: HmacSha256,
    expiry: chrono::Duration,
    secure_cookie: bool,
    sessions: DashMap<String, SessionEntry>,
}

impl CsrfGuard {
    pub fn new(
        enabled: bool,
        secret: &str,
        expiry: Duration,
        secure_cookie: bool,
    ) -> Result<Self, ConfigError> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ConfigError::ValidationError(format!("csrf secret: {e}")))?;
        Ok(Self {
            enabled,
            mac,
            expiry: chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::hours(12)),
            secure_cookie,
            sessions: DashMap::new(),
        })
    }

    pub fn from_config(security: &SecurityConfig, auth: &AuthConfig) -> Result<Self, ConfigError> {
        Self::new(
            security.csrf_enabled,
            security.csrf_secret(auth),
            Duration::from_secs(u64::try_from(security.csrf_token_expiry_secs).unwrap_or(0)),
            security.csrf_secure_cookie,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn sign(&self, data: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(data.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Parse `value` and check its signature. Expiry is not checked.
    fn authentic<'a>(&self, value: &'a str) -> Option<ParsedTicket<'a>> {
        let ticket = parse(value)?;
        let signature = URL_SAFE_NO_PAD.decode(ticket.signature).ok()?;
        let mut mac = self.mac.clone();
        mac.update(ticket.signed.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(ticket)
    }

    /// Issue a ticket, reusing `session` when given. Any earlier ticket for
    /// the same session stops validating.
    pub fn issue(&self, session: Option<&str>, now: DateTime<Utc>) -> CsrfTicket {
        let session = session
            .filter(|s| !s.is_empty() && !s.contains('.'))
            .map(str::to_string)
            .unwrap_or_else(random_id);
        let nonce = random_id();
        let expires_at = now + self.expiry;
        let signed = format!("{session}.{}.{nonce}", expires_at.timestamp());
        let value = format!("{signed}.{}", self.sign(&signed));

        self.sessions.insert(
            session.clone(),
            SessionEntry {
                nonce,
                expires_at,
            },
        );
        debug!("csrf ticket issued");
        CsrfTicket {
            value,
            session,
            issued_at: now,
            expires_at,
            secure: self.secure_cookie,
        }
    }

    /// Rotate the ticket of whatever session `current` belongs to, or start a
    /// new session if it is absent or not signed by this guard.
    pub fn rotate(&self, current: Option<&str>, now: DateTime<Utc>) -> CsrfTicket {
        let session = current.and_then(|value| self.authentic(value)).map(|t| t.session);
        self.issue(session, now)
    }

    /// Double-submit check: `cookie` and `submitted` must be identical and the
    /// ticket must be authentic, unexpired and current for its session.
    pub fn validate(
        &self,
        cookie: Option<&str>,
        submitted: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), CsrfError> {
        if !self.enabled {
            return Ok(());
        }
        let (Some(cookie), Some(submitted)) = (cookie, submitted) else {
            return Err(CsrfError::Missing);
        };

        // Compare MACs of both values so the comparison time does not depend
        // on where they differ.
        let mut expected = self.mac.clone();
        expected.update(cookie.as_bytes());
        let mut actual = self.mac.clone();
        actual.update(submitted.as_bytes());
        expected
            .verify_slice(&actual.finalize().into_bytes())
            .map_err(|_| CsrfError::Mismatch)?;

        let ticket = self.authentic(cookie).ok_or(CsrfError::Mismatch)?;

        if ticket.expires_at <= now.timestamp() {
            return Err(CsrfError::Expired);
        }
        let current = self
            .sessions
            .get(ticket.session)
            .map(|entry| entry.nonce == ticket.nonce)
            .unwrap_or(false);
        if !current {
            return Err(CsrfError::Stale);
        }
        Ok(())
    }

    /// Forget sessions whose latest ticket has expired.
    pub fn cleanup(&self, now: DateTime<Utc>) {
        self.sessions.retain(|_, entry| entry.expires_at > now);
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let guard = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                guard.cleanup(Utc::now());
            }
        })
    }
}
