//! Quota domain models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A metered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Analyses,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Analyses => "analyses",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-period ceiling. Configured as an integer where `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Capped(u64),
    Unlimited,
}

impl Limit {
    /// Decode the configured integer form.
    pub fn from_config(value: i64) -> Self {
        if value < 0 {
            Limit::Unlimited
        } else {
            Limit::Capped(value as u64)
        }
    }

    /// Integer form used on the wire (`-1` = unlimited).
    pub fn as_i64(&self) -> i64 {
        match self {
            Limit::Capped(n) => i64::try_from(*n).unwrap_or(i64::MAX),
            Limit::Unlimited => -1,
        }
    }

    pub fn admits(&self, used: u64, amount: u64) -> bool {
        match self {
            Limit::Capped(limit) => used.saturating_add(amount) <= *limit,
            Limit::Unlimited => true,
        }
    }
}

/// Consumption record for one principal and resource within one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaWindow {
    pub principal_id: String,
    pub resource: ResourceKind,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub used: u64,
    pub limit: Limit,
}

impl QuotaWindow {
    pub fn remaining(&self) -> Option<u64> {
        match self.limit {
            Limit::Capped(limit) => Some(limit.saturating_sub(self.used)),
            Limit::Unlimited => None,
        }
    }
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Charged; `window` reflects the state after the increment.
    Allowed { window: QuotaWindow },
    /// Not charged; the window is unchanged.
    Exceeded { window: QuotaWindow },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }

    pub fn window(&self) -> &QuotaWindow {
        match self {
            QuotaDecision::Allowed { window } | QuotaDecision::Exceeded { window } => window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_config_value_is_unlimited() {
        assert_eq!(Limit::from_config(-1), Limit::Unlimited);
        assert_eq!(Limit::from_config(0), Limit::Capped(0));
        assert_eq!(Limit::Unlimited.as_i64(), -1);
    }

    #[test]
    fn capped_limit_admits_up_to_ceiling() {
        let limit = Limit::Capped(5);
        assert!(limit.admits(4, 1));
        assert!(!limit.admits(5, 1));
        assert!(!limit.admits(3, 3));
        assert!(Limit::Unlimited.admits(u64::MAX, 1));
    }
}
