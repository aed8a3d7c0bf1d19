//! Tier → limit resolution.

use crate::config::{PeriodKind, SubscriptionConfig};
use crate::models::auth::Tier;
use crate::models::quota::{Limit, ResourceKind};

/// Per-tier caps and retention, resolved once from config.
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    pub enforce: bool,
    pub period: PeriodKind,
    free_analyses: Limit,
    pro_analyses: Limit,
    team_analyses: Limit,
    free_history_days: i64,
    pro_history_days: i64,
    team_history_days: i64,
}

impl QuotaPolicy {
    pub fn from_config(config: &SubscriptionConfig) -> Self {
        Self {
            enforce: config.enforce_quotas,
            period: config.period,
            free_analyses: Limit::from_config(config.free_tier_analyses),
            pro_analyses: Limit::from_config(config.pro_tier_analyses),
            team_analyses: Limit::from_config(config.team_tier_analyses),
            free_history_days: config.free_tier_history_days,
            pro_history_days: config.pro_tier_history_days,
            team_history_days: config.team_tier_history_days,
        }
    }

    /// Cap for `resource` on `tier`.
    pub fn limit(&self, tier: Tier, resource: ResourceKind) -> Limit {
        match (resource, tier) {
            (ResourceKind::Analyses, Tier::Free) => self.free_analyses,
            (ResourceKind::Analyses, Tier::Pro) => self.pro_analyses,
            (ResourceKind::Analyses, Tier::Team) => self.team_analyses,
        }
    }

    /// Days of history retained for `tier`; `-1` is unlimited.
    pub fn history_days(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Free => self.free_history_days,
            Tier::Pro => self.pro_history_days,
            Tier::Team => self.team_history_days,
        }
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::from_config(&SubscriptionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_caps() {
        let policy = QuotaPolicy::default();
        assert_eq!(policy.limit(Tier::Free, ResourceKind::Analyses), Limit::Capped(5));
        assert_eq!(policy.limit(Tier::Pro, ResourceKind::Analyses), Limit::Capped(100));
        assert_eq!(policy.limit(Tier::Team, ResourceKind::Analyses), Limit::Unlimited);
        assert_eq!(policy.history_days(Tier::Free), 7);
        assert_eq!(policy.history_days(Tier::Team), -1);
    }
}
