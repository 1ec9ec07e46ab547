//! Per-sender rate limiting using a token bucket.
//!
//! The pipeline is single-threaded, so the limiter is a plain map keyed by
//! sender uid. Buckets refill one token per interval up to the burst size.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    buckets: HashMap<String, TokenBucket>,
    max_tokens: u32,
    refill_interval: Duration,
    blocked_count: u64,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(max_tokens: u32, refill_interval: Duration) -> Self {
        Self {
            buckets: HashMap::new(),
            max_tokens,
            refill_interval,
            blocked_count: 0,
        }
    }

    /// Checks whether a message from `uid` fits the budget.
    pub fn check(&mut self, uid: &str) -> bool {
        self.check_at(uid, Instant::now())
    }

    pub fn check_at(&mut self, uid: &str, now: Instant) -> bool {
        let max_tokens = self.max_tokens;
        let refill_interval = self.refill_interval;
        let bucket = self
            .buckets
            .entry(uid.to_string())
            .or_insert(TokenBucket {
                tokens: max_tokens,
                last_refill: now,
            });

        // Refill tokens based on elapsed time
        let elapsed = now.duration_since(bucket.last_refill);
        if elapsed >= refill_interval && refill_interval.as_millis() > 0 {
            let intervals_passed = (elapsed.as_millis() / refill_interval.as_millis()) as u32;
            let tokens_to_add = intervals_passed.min(max_tokens - bucket.tokens);
            bucket.tokens = (bucket.tokens + tokens_to_add).min(max_tokens);
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            self.blocked_count += 1;
            false
        }
    }

    /// Number of senders currently holding a bucket. Lets tests assert that
    /// the limiter was never consulted for a frame rejected earlier in the
    /// pipeline.
    pub fn tracked_senders(&self) -> usize {
        self.buckets.len()
    }

    pub fn blocked_count(&self) -> u64 {
        self.blocked_count
    }

    /// Drops buckets idle longer than `max_idle`.
    pub fn cleanup_stale(&mut self, now: Instant, max_idle: Duration) {
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < max_idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_within_limit() {
        let mut limiter = RateLimiter::new(5, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.check_at("u1", now));
        }
        assert!(!limiter.check_at("u1", now));
        assert_eq!(limiter.blocked_count(), 1);
    }

    #[test]
    fn test_refills_over_time() {
        let mut limiter = RateLimiter::new(2, Duration::from_millis(100));
        let start = Instant::now();

        assert!(limiter.check_at("u1", start));
        assert!(limiter.check_at("u1", start));
        assert!(!limiter.check_at("u1", start));

        // Two intervals later both tokens are back.
        let later = start + Duration::from_millis(250);
        assert!(limiter.check_at("u1", later));
        assert!(limiter.check_at("u1", later));
        assert!(!limiter.check_at("u1", later));
    }

    #[test]
    fn test_buckets_are_per_sender() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at("u1", now));
        assert!(!limiter.check_at("u1", now));
        assert!(limiter.check_at("u2", now));
        assert_eq!(limiter.tracked_senders(), 2);
    }

    #[test]
    fn test_cleanup_drops_idle_buckets() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(1));
        let start = Instant::now();
        limiter.check_at("u1", start);

        limiter.cleanup_stale(start + Duration::from_secs(3600), Duration::from_secs(600));
        assert_eq!(limiter.tracked_senders(), 0);
    }
}
