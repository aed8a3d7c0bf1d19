//! Token-bucket rate limiter keyed by (client, endpoint class).
//!
//! Buckets refill lazily when touched; no timer runs per bucket. Each bucket
//! lives in its own shard entry of a [`DashMap`], so unrelated clients never
//! contend. Idle buckets are evicted by [`RateLimiter::evict_idle`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::config::SecurityConfig;

/// Endpoint class. Auth-sensitive routes get their own, stricter buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    General,
    Auth,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::General => "general",
            EndpointClass::Auth => "auth",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `requests` per `interval`, with at most `burst` stored tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    pub requests: u32,
    pub interval: Duration,
    pub burst: u32,
}

impl BucketConfig {
    /// Tokens added per second.
    fn rate(&self) -> f64 {
        let secs = self.interval.as_secs_f64();
        if secs <= 0.0 {
            f64::INFINITY
        } else {
            f64::from(self.requests) / secs
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(config: &BucketConfig, now: Instant) -> Self {
        Self {
            tokens: f64::from(config.burst),
            last_refill: now,
        }
    }

    fn refill(&mut self, config: &BucketConfig, now: Instant) {
        // Instants earlier than the last refill (out-of-order callers) add nothing.
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let added = elapsed.as_secs_f64() * config.rate();
        self.tokens = (self.tokens + added).min(f64::from(config.burst));
        self.last_refill = now;
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Admitted { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, RateDecision::Admitted { .. })
    }
}

pub struct RateLimiter {
    enabled: bool,
    general: BucketConfig,
    auth: BucketConfig,
    idle_ttl: Duration,
    buckets: DashMap<(String, EndpointClass), Bucket>,
}

impl RateLimiter {
    pub fn new(enabled: bool, general: BucketConfig, auth: BucketConfig, idle_ttl: Duration) -> Self {
        Self {
            enabled,
            general,
            auth,
            idle_ttl,
            buckets: DashMap::new(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        let general = BucketConfig {
            requests: config.rate_limit_requests,
            interval: Duration::from_secs(config.rate_limit_interval_secs),
            burst: config.rate_limit_burst,
        };
        let auth = BucketConfig {
            requests: config.auth_rate_limit_requests,
            interval: Duration::from_secs(config.auth_rate_limit_interval_secs),
            burst: config
                .auth_rate_limit_burst
                .unwrap_or(config.auth_rate_limit_requests),
        };
        Self::new(
            config.rate_limit_enabled,
            general,
            auth,
            Duration::from_secs(config.rate_limit_idle_ttl_secs),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self, class: EndpointClass) -> &BucketConfig {
        match class {
            EndpointClass::General => &self.general,
            EndpointClass::Auth => &self.auth,
        }
    }

    pub fn check(&self, client: &str, class: EndpointClass) -> RateDecision {
        self.check_at(client, class, Instant::now())
    }

    /// Admission check at an explicit instant.
    pub fn check_at(&self, client: &str, class: EndpointClass, now: Instant) -> RateDecision {
        if !self.enabled {
            return RateDecision::Admitted { remaining: u32::MAX };
        }
        let config = *self.config(class);
        let mut bucket = self
            .buckets
            .entry((client.to_string(), class))
            .or_insert_with(|| Bucket::full(&config, now));
        bucket.refill(&config, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Admitted {
                remaining: bucket.tokens.floor() as u32,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            let secs = (deficit / config.rate()).ceil().max(1.0);
            debug!(client, %class, "rate limited");
            RateDecision::Limited {
                retry_after: Duration::from_secs_f64(secs),
            }
        }
    }

    /// Drop buckets untouched for longer than the idle TTL.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < self.idle_ttl);
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Spawn a periodic idle-bucket eviction task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let evicted = limiter.evict_idle(Instant::now());
                if evicted > 0 {
                    debug!(evicted, "evicted idle rate-limit buckets");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(general: BucketConfig) -> RateLimiter {
        RateLimiter::new(
            true,
            general,
            BucketConfig {
                requests: 5,
                interval: Duration::from_secs(60),
                burst: 5,
            },
            Duration::from_secs(600),
        )
    }

    fn default_general() -> BucketConfig {
        BucketConfig {
            requests: 100,
            interval: Duration::from_secs(60),
            burst: 20,
        }
    }

    #[test]
    fn instantaneous_burst_admits_exactly_burst() {
        let limiter = limiter(default_general());
        let now = Instant::now();
        let decisions: Vec<_> = (0..25)
            .map(|_| limiter.check_at("1.2.3.4", EndpointClass::General, now))
            .collect();
        assert_eq!(decisions.iter().filter(|d| d.is_admitted()).count(), 20);
        for decision in &decisions[20..] {
            match decision {
                RateDecision::Limited { retry_after } => assert!(*retry_after >= Duration::from_secs(1)),
                other => panic!("expected limit, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_elapsed_never_exceeds_burst() {
        let limiter = limiter(BucketConfig {
            requests: 1,
            interval: Duration::from_secs(1),
            burst: 2,
        });
        let now = Instant::now();
        assert!(limiter.check_at("k", EndpointClass::General, now).is_admitted());
        assert!(limiter.check_at("k", EndpointClass::General, now).is_admitted());
        assert!(!limiter.check_at("k", EndpointClass::General, now).is_admitted());
        assert!(!limiter.check_at("k", EndpointClass::General, now).is_admitted());
    }

    #[test]
    fn tokens_refill_with_time_up_to_burst() {
        let limiter = limiter(BucketConfig {
            requests: 60,
            interval: Duration::from_secs(60),
            burst: 3,
        });
        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("k", EndpointClass::General, start).is_admitted());
        }
        assert!(!limiter.check_at("k", EndpointClass::General, start).is_admitted());

        let later = start + Duration::from_secs(1);
        assert!(limiter.check_at("k", EndpointClass::General, later).is_admitted());
        assert!(!limiter.check_at("k", EndpointClass::General, later).is_admitted());

        // A long pause only refills to burst.
        let much_later = later + Duration::from_secs(3600);
        let admitted = (0..10)
            .filter(|_| limiter.check_at("k", EndpointClass::General, much_later).is_admitted())
            .count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn retry_after_reflects_deficit() {
        let limiter = limiter(BucketConfig {
            requests: 1,
            interval: Duration::from_secs(10),
            burst: 1,
        });
        let now = Instant::now();
        assert!(limiter.check_at("k", EndpointClass::General, now).is_admitted());
        assert_eq!(
            limiter.check_at("k", EndpointClass::General, now),
            RateDecision::Limited {
                retry_after: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn classes_and_clients_have_separate_buckets() {
        let limiter = limiter(default_general());
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_at("a", EndpointClass::Auth, now).is_admitted());
        }
        assert!(!limiter.check_at("a", EndpointClass::Auth, now).is_admitted());
        assert!(limiter.check_at("a", EndpointClass::General, now).is_admitted());
        assert!(limiter.check_at("b", EndpointClass::Auth, now).is_admitted());
    }

    #[test]
    fn idle_buckets_are_evicted() {
        let limiter = limiter(default_general());
        let now = Instant::now();
        limiter.check_at("old", EndpointClass::General, now);
        limiter.check_at("new", EndpointClass::General, now + Duration::from_secs(500));
        assert_eq!(limiter.evict_idle(now + Duration::from_secs(700)), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn disabled_limiter_admits_everything() {
        let limiter = RateLimiter::from_config(&SecurityConfig {
            rate_limit_enabled: false,
            ..SecurityConfig::default()
        });
        let now = Instant::now();
        assert!((0..1000).all(|_| limiter.check_at("k", EndpointClass::Auth, now).is_admitted()));
        assert!(limiter.is_empty());
    }

    #[test]
    fn auth_burst_defaults_to_request_count() {
        let limiter = RateLimiter::from_config(&SecurityConfig::default());
        assert_eq!(limiter.config(EndpointClass::Auth).burst, 5);
        assert_eq!(limiter.config(EndpointClass::General).burst, 20);
    }
}
