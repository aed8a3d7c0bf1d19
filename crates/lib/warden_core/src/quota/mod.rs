//! Quota ledger: per-principal, per-period consumption of metered resources.
//!
//! `check_and_consume` is the only authoritative admission path; it is
//! atomic per principal and fails closed when the backing store is
//! unreachable. `remaining` is a read-only view that may be stale.

pub mod delegated;
pub mod local;
pub mod period;
pub mod policy;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::auth::Principal;
use crate::models::quota::{QuotaDecision, QuotaWindow, ResourceKind};

pub use policy::QuotaPolicy;

/// Quota ledger errors. None of these ever mean "allowed".
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("Quota amount must be positive")]
    InvalidAmount,

    /// Backing store or provider unreachable.
    #[error("Quota ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for QuotaError {
    fn from(e: sqlx::Error) -> Self {
        QuotaError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Charge `amount` units of `resource` if the current window admits it.
    async fn check_and_consume(
        &self,
        principal: &Principal,
        resource: ResourceKind,
        amount: u64,
    ) -> Result<QuotaDecision, QuotaError>;

    /// Current window, for display only.
    async fn remaining(
        &self,
        principal: &Principal,
        resource: ResourceKind,
    ) -> Result<QuotaWindow, QuotaError>;

    fn policy(&self) -> &QuotaPolicy;
}
