//! Auth audit trail: fire-and-forget event emission.
//!
//! Recording never blocks the response: the SQLite sink writes from a spawned
//! task and failures are logged but otherwise ignored.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::mode::Mode;
use crate::uuid::uuidv7;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Register,
    Login,
    Refresh,
    Logout,
    PasswordChange,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Register => "register",
            AuditAction::Login => "login",
            AuditAction::Refresh => "refresh",
            AuditAction::Logout => "logout",
            AuditAction::PasswordChange => "password_change",
        }
    }
}

/// One audit entry.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub principal_id: String,
    pub action: AuditAction,
    pub mode: Mode,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn now(principal_id: &str, action: AuditAction, mode: Mode) -> Self {
        Self {
            principal_id: principal_id.to_string(),
            action,
            mode,
            occurred_at: Utc::now(),
        }
    }
}

/// Destination for audit events. Must return immediately.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "warden::audit",
            principal_id = %event.principal_id,
            action = event.action.as_str(),
            mode = %event.mode,
            occurred_at = %event.occurred_at.to_rfc3339(),
            "auth event"
        );
    }
}

/// Persists audit events to the `auth_audit` table.
#[derive(Debug, Clone)]
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, event: AuditEvent) {
        TracingAuditSink.record(event.clone());
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = insert_audit_event(&pool, &event).await {
                warn!("audit: failed to record {} event: {e}", event.action.as_str());
            }
        });
    }
}

/// Insert one audit row.
pub async fn insert_audit_event(pool: &SqlitePool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO auth_audit (id, principal_id, action, mode, occurred_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(uuidv7())
    .bind(&event.principal_id)
    .bind(event.action.as_str())
    .bind(event.mode.as_str())
    .bind(event.occurred_at.timestamp())
    .execute(pool)
    .await?;
    Ok(())
}
