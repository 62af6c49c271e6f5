//! Fixed-window request counters keyed by who is calling and what they call.
//!
//! Each window is its own cache key (`floor(now / window)`), created by the first
//! increment with a TTL of one window. Counters never share keys across limit
//! types or categories.
pub mod policy;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::services::cache::{CacheBackend, CacheClient, CacheError};

pub use policy::{LimitCategory, LimitType, RateLimitPolicy, RateLimitRule};

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded")]
    Exceeded {
        limit: u64,
        current: u64,
        /// Remaining lifetime of the counter as the store reports it.
        retry_after: Duration,
        /// End of the window the request was counted in.
        reset_at: DateTime<Utc>,
    },
    #[error("rate limit store error: {0}")]
    Backend(#[from] CacheError),
}

/// Admitted request: what the `X-RateLimit-*` headers report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub current: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitUsage {
    pub limit_type: LimitType,
    pub category: LimitCategory,
    pub limit: u64,
    pub current: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RateLimiter<C = CacheBackend>
where
    C: CacheClient,
{
    cache: C,
    policy: RateLimitPolicy,
}

impl<C: CacheClient> std::fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.cache.backend_name())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Window index containing `now`.
pub fn bucket_of(now: DateTime<Utc>, window_seconds: u64) -> i64 {
    now.timestamp().div_euclid(window_seconds as i64)
}

fn bucket_end(bucket: i64, window_seconds: u64) -> DateTime<Utc> {
    let end = bucket.saturating_add(1).saturating_mul(window_seconds as i64);
    Utc.timestamp_opt(end, 0).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn counter_key(
    limit_type: LimitType,
    category: LimitCategory,
    identifier: &str,
    bucket: i64,
) -> String {
    format!(
        "ratelimit:{}:{}:{}:{}",
        limit_type.as_str(),
        category.as_str(),
        identifier,
        bucket
    )
}

impl<C: CacheClient> RateLimiter<C> {
    pub fn new(cache: C, policy: RateLimitPolicy) -> Self {
        Self { cache, policy }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one request and decide whether it is admitted.
    ///
    /// Store failures admit the request: the limiter must not take the service down
    /// with it.
    pub async fn check(
        &self,
        limit_type: LimitType,
        identifier: &str,
        category: LimitCategory,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus, RateLimitError> {
        let rule = self.policy.rule(category);
        let window = rule.window_seconds();
        let allowed = rule.allowed();
        let bucket = bucket_of(now, window);
        let reset_at = bucket_end(bucket, window);
        let key = counter_key(limit_type, category, identifier, bucket);

        let counter = match self
            .cache
            .incr_with_ttl(&key, Duration::from_secs(window))
            .await
        {
            Ok(counter) => counter,
            Err(e) => {
                error!(
                    backend = self.cache.backend_name(),
                    limit_type = limit_type.as_str(),
                    category = category.as_str(),
                    error = %e,
                    "rate limit store unavailable, admitting request"
                );
                return Ok(RateLimitStatus {
                    limit: allowed,
                    current: 0,
                    remaining: allowed,
                    reset_at,
                });
            }
        };

        if counter.count > allowed {
            let retry_after = if counter.ttl.is_zero() {
                (reset_at - now).to_std().unwrap_or_default()
            } else {
                counter.ttl
            };
            debug!(
                limit_type = limit_type.as_str(),
                category = category.as_str(),
                current = counter.count,
                limit = allowed,
                "rate limit exceeded"
            );
            return Err(RateLimitError::Exceeded {
                limit: allowed,
                current: counter.count,
                retry_after,
                reset_at,
            });
        }

        Ok(RateLimitStatus {
            limit: allowed,
            current: counter.count,
            remaining: allowed - counter.count,
            reset_at,
        })
    }

    /// Read the current window's counter without counting.
    pub async fn get_usage(
        &self,
        limit_type: LimitType,
        identifier: &str,
        category: LimitCategory,
        now: DateTime<Utc>,
    ) -> Result<RateLimitUsage, RateLimitError> {
        let rule = self.policy.rule(category);
        let window = rule.window_seconds();
        let allowed = rule.allowed();
        let bucket = bucket_of(now, window);
        let key = counter_key(limit_type, category, identifier, bucket);

        let current = match self.cache.get_string(&key).await? {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| CacheError::InvalidValue(format!("counter {key}: {e}")))?,
            None => 0,
        };

        Ok(RateLimitUsage {
            limit_type,
            category,
            limit: allowed,
            current,
            remaining: allowed.saturating_sub(current),
            reset_at: bucket_end(bucket, window),
        })
    }

    /// Drop the current window's counter. Returns whether one existed.
    pub async fn reset_limit(
        &self,
        limit_type: LimitType,
        identifier: &str,
        category: LimitCategory,
        now: DateTime<Utc>,
    ) -> Result<bool, RateLimitError> {
        let window = self.policy.rule(category).window_seconds();
        let key = counter_key(limit_type, category, identifier, bucket_of(now, window));
        let deleted = self.cache.del(&key).await?;
        info!(
            limit_type = limit_type.as_str(),
            category = category.as_str(),
            deleted,
            "rate limit counter reset"
        );
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MemoryCache;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn bucket_is_floor_of_time_over_window() {
        assert_eq!(bucket_of(at(0), 60), 0);
        assert_eq!(bucket_of(at(59), 60), 0);
        assert_eq!(bucket_of(at(60), 60), 1);
        assert_eq!(bucket_of(at(1_700_000_000), 300), 5_666_666);
    }

    #[test]
    fn reset_is_end_of_bucket() {
        assert_eq!(bucket_end(bucket_of(at(61), 60), 60), at(120));
    }

    #[test]
    fn keys_differ_per_dimension() {
        let a = counter_key(LimitType::Ip, LimitCategory::Auth, "1.2.3.4", 7);
        let b = counter_key(LimitType::Client, LimitCategory::Auth, "1.2.3.4", 7);
        let c = counter_key(LimitType::Ip, LimitCategory::General, "1.2.3.4", 7);
        assert_eq!(a, "ratelimit:ip:auth:1.2.3.4:7");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_limit_plus_burst_then_rejects() {
        let mut policy = RateLimitPolicy::default();
        policy.auth = RateLimitRule::new(5, 2, 60);
        let limiter = RateLimiter::new(MemoryCache::new(), policy);
        let now = at(1_700_000_000);

        for i in 1..=7 {
            let status = limiter
                .check(LimitType::Ip, "10.0.0.1", LimitCategory::Auth, now)
                .await
                .unwrap();
            assert_eq!(status.current, i);
            assert_eq!(status.remaining, 7 - i);
        }
        match limiter
            .check(LimitType::Ip, "10.0.0.1", LimitCategory::Auth, now)
            .await
        {
            Err(RateLimitError::Exceeded {
                limit,
                current,
                retry_after,
                reset_at,
            }) => {
                assert_eq!(limit, 7);
                assert_eq!(current, 8);
                assert_eq!(reset_at, bucket_end(bucket_of(now, 60), 60));
                assert!(retry_after <= Duration::from_secs(60));
                assert!(!retry_after.is_zero());
            }
            other => panic!("expected exceeded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn usage_and_reset() {
        let limiter = RateLimiter::new(MemoryCache::new(), RateLimitPolicy::default());
        let now = at(1_700_000_000);
        for _ in 0..3 {
            limiter
                .check(LimitType::User, "u1", LimitCategory::General, now)
                .await
                .unwrap();
        }
        let usage = limiter
            .get_usage(LimitType::User, "u1", LimitCategory::General, now)
            .await
            .unwrap();
        assert_eq!(usage.current, 3);
        assert_eq!(usage.remaining, 117);

        assert!(limiter
            .reset_limit(LimitType::User, "u1", LimitCategory::General, now)
            .await
            .unwrap());
        let usage = limiter
            .get_usage(LimitType::User, "u1", LimitCategory::General, now)
            .await
            .unwrap();
        assert_eq!(usage.current, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn next_window_starts_fresh() {
        let mut policy = RateLimitPolicy::default();
        policy.sensitive = RateLimitRule::new(1, 0, 300);
        let limiter = RateLimiter::new(MemoryCache::new(), policy);

        let t0 = at(1_700_000_100);
        limiter
            .check(LimitType::User, "u", LimitCategory::Sensitive, t0)
            .await
            .unwrap();
        assert!(limiter
            .check(LimitType::User, "u", LimitCategory::Sensitive, t0)
            .await
            .is_err());

        let t1 = at(1_700_000_100 + 300);
        assert!(limiter
            .check(LimitType::User, "u", LimitCategory::Sensitive, t1)
            .await
            .is_ok());
    }
}
