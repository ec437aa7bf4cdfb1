//! Per-key token-bucket rate limiter.
//!
//! Each key (a caller address in practice) gets its own bucket holding up
//! to `burst` tokens, refilled continuously at `requests_per_second`.
//! Buckets are created on first use and evicted by `sweep_idle`.

use std::time::Duration;

use dashmap::DashMap;
use parley_types::config::RateLimitConfig;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct RateBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl RateBucket {
    fn full(burst: f64, now: Instant) -> Self {
        Self {
            tokens: burst,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, now: Instant, rate: f64, burst: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_refill = now;
    }
}

/// Admission control keyed by caller.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    buckets: DashMap<String, RateBucket>,
}

impl RateLimiter {
    /// `rate` tokens per second, at most `burst` tokens banked.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate: rate.max(0.0),
            burst: f64::from(burst.max(1)),
            buckets: DashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst)
    }

    /// Take one token from `key`'s bucket. Returns false if it is empty.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RateBucket::full(self.burst, now));

        bucket.refill(now, self.rate, self.burst);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            debug!(key, "rate limit exceeded");
            false
        }
    }

    /// Remove buckets not seen for longer than `max_idle`. Returns the
    /// number evicted.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= max_idle);
        before.saturating_sub(self.buckets.len())
    }

    /// Configured refill rate, reported in `X-RateLimit-Limit`.
    pub fn requests_per_second(&self) -> f64 {
        self.rate
    }

    /// Number of tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_admits_burst_then_rejects() {
        let limiter = RateLimiter::new(2.0, 2);
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1.0, 1);
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_from_config() {
        let limiter = RateLimiter::from_config(&RateLimitConfig::default());
        for _ in 0..20 {
            assert!(limiter.allow("client"));
        }
        assert!(!limiter.allow("client"));
        assert!((limiter.requests_per_second() - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_over_time() {
        let limiter = RateLimiter::new(10.0, 5);
        for _ in 0..5 {
            assert!(limiter.allow("k"));
        }
        assert!(!limiter.allow("k"));

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_capped_at_burst() {
        let limiter = RateLimiter::new(100.0, 3);
        assert!(limiter.allow("k"));
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..3 {
            assert!(limiter.allow("k"));
        }
        assert!(!limiter.allow("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_buckets() {
        let limiter = RateLimiter::new(1.0, 1);
        limiter.allow("old");
        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.allow("fresh");

        let evicted = limiter.sweep_idle(Duration::from_secs(60));
        assert_eq!(evicted, 1);
        assert_eq!(limiter.tracked_keys(), 1);
        // An evicted key starts over with a full bucket.
        assert!(limiter.allow("old"));
    }

    #[test]
    fn test_concurrent_first_use_shares_one_bucket() {
        let limiter = Arc::new(RateLimiter::new(0.0, 10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..5).filter(|_| limiter.allow("shared")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
