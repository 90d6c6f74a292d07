//! Rate Limiting for RelayRPC
//!
//! This module provides the token bucket used by the server rate-limit
//! filter. Buckets are keyed by an arbitrary string, normally the interface
//! name, so each service gets its own budget.
//!
//! Checks never wait: a request either takes a token right away or is
//! rejected with the time until the next token would be available.
//!
//! # Example
//!
//! ```
//! use relayrpc_common::rate_limit::{RateLimiter, RateLimitConfig};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::per_second(10.0));
//!
//! if limiter.check_rate_limit("UserService").is_allowed() {
//!     // Process the request
//! } else {
//!     // Reject it
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Configuration for rate limiting.
///
/// # Fields
///
/// * `requests_per_second` - Maximum sustained request rate
/// * `burst_size` - Maximum number of requests allowed in a burst
/// * `cleanup_interval` - How often to clean up stale entries
/// * `entry_ttl` - How long to keep entries without activity
///
/// # Example
///
/// ```
/// use relayrpc_common::rate_limit::RateLimitConfig;
///
/// // 10 requests per second, burst of 20
/// let config = RateLimitConfig::new(10.0, 20);
/// assert_eq!(config.requests_per_second, 10.0);
/// assert_eq!(config.burst_size, 20);
/// ```
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Maximum sustained request rate (requests per second)
    pub requests_per_second: f64,
    /// Maximum burst size (number of tokens)
    pub burst_size: u32,
    /// Interval for cleaning up stale entries
    pub cleanup_interval: Duration,
    /// Time-to-live for entries without activity
    pub entry_ttl: Duration,
}

impl RateLimitConfig {
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
            cleanup_interval: Duration::from_secs(60),
            entry_ttl: Duration::from_secs(300), // 5 minutes
        }
    }

    /// Creates a configuration with burst size set to 2x the rate.
    ///
    /// # Example
    ///
    /// ```
    /// use relayrpc_common::rate_limit::RateLimitConfig;
    ///
    /// let config = RateLimitConfig::per_second(10.0);
    /// assert_eq!(config.burst_size, 20);
    /// ```
    pub fn per_second(rps: f64) -> Self {
        let burst_size = (rps * 2.0).ceil() as u32;
        Self::new(rps, burst_size)
    }
}

impl Default for RateLimitConfig {
    /// Creates a default configuration with rate limiting disabled.
    fn default() -> Self {
        Self {
            requests_per_second: f64::MAX,
            burst_size: u32::MAX,
            cleanup_interval: Duration::from_secs(60),
            entry_ttl: Duration::from_secs(300),
        }
    }
}

/// Result of a rate limit check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed,
    /// Request is rate limited
    RateLimited {
        /// Time until the next request will be allowed
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::RateLimited { retry_after } => Some(*retry_after),
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(burst_size: u32) -> Self {
        Self {
            tokens: burst_size as f64,
            last_update: Instant::now(),
        }
    }

    /// Refills according to elapsed time, then takes one token if available.
    fn try_consume(&mut self, config: &RateLimitConfig, now: Instant) -> bool {
        let elapsed_secs = now.duration_since(self.last_update).as_secs_f64();
        let new_tokens = elapsed_secs * config.requests_per_second;
        self.tokens = (self.tokens + new_tokens).min(config.burst_size as f64);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_next_token(&self, config: &RateLimitConfig) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let tokens_needed = 1.0 - self.tokens;
            Duration::try_from_secs_f64(tokens_needed / config.requests_per_second)
                .unwrap_or(Duration::MAX)
        }
    }
}

struct Buckets {
    by_key: HashMap<String, TokenBucket>,
    last_cleanup: Instant,
}

/// Token bucket rate limiter keyed by string.
///
/// Cloning is cheap and yields a handle to the same buckets.
#[derive(Clone)]
pub struct RateLimiter {
    pub config: RateLimitConfig,
    buckets: Arc<Mutex<Buckets>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(Buckets {
                by_key: HashMap::new(),
                last_cleanup: Instant::now(),
            })),
        }
    }

    /// Creates a rate limiter that allows everything.
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig::default())
    }

    /// Checks whether one more request for `key` is allowed right now.
    ///
    /// This method:
    /// 1. Periodically cleans up stale entries (based on cleanup_interval)
    /// 2. Gets or creates the token bucket for the key
    /// 3. Attempts to consume a token
    pub fn check_rate_limit(&self, key: &str) -> RateLimitResult {
        if !self.is_enabled() {
            return RateLimitResult::Allowed;
        }

        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        if now.duration_since(buckets.last_cleanup) >= self.config.cleanup_interval {
            let ttl = self.config.entry_ttl;
            buckets
                .by_key
                .retain(|_, bucket| now.duration_since(bucket.last_update) < ttl);
            buckets.last_cleanup = now;
        }

        let burst_size = self.config.burst_size;
        let bucket = buckets
            .by_key
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(burst_size));

        if bucket.try_consume(&self.config, now) {
            RateLimitResult::Allowed
        } else {
            RateLimitResult::RateLimited {
                retry_after: bucket.time_until_next_token(&self.config),
            }
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_key_count(&self) -> usize {
        self.buckets.lock().by_key.len()
    }

    /// Rate limiting counts as disabled at 1,000,000 requests per second or
    /// more, and for rates that are zero, negative or not a number.
    pub fn is_enabled(&self) -> bool {
        let rps = self.config.requests_per_second;
        rps > 0.0 && rps < 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_config_per_second() {
        let config = RateLimitConfig::per_second(10.0);
        assert_eq!(config.requests_per_second, 10.0);
        assert_eq!(config.burst_size, 20); // 2x rate
    }

    #[test]
    fn test_non_positive_rates_disable_limiting() {
        for rps in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let limiter = RateLimiter::new(RateLimitConfig::new(rps, 1));
            assert!(!limiter.is_enabled(), "rate {}", rps);
            for _ in 0..3 {
                assert!(limiter.check_rate_limit("S").is_allowed());
            }
        }
    }

    #[test]
    fn test_tiny_rate_caps_retry_after() {
        let limiter = RateLimiter::new(RateLimitConfig::new(f64::MIN_POSITIVE, 1));
        assert!(limiter.check_rate_limit("S").is_allowed());
        let result = limiter.check_rate_limit("S");
        assert_eq!(result.retry_after(), Some(Duration::MAX));
    }

    #[test]
    fn test_disabled_allows_everything() {
        let limiter = RateLimiter::disabled();
        assert!(!limiter.is_enabled());
        for _ in 0..10_000 {
            assert!(limiter.check_rate_limit("S").is_allowed());
        }
        assert_eq!(limiter.tracked_key_count(), 0);
    }

    #[test]
    fn test_burst_then_limited() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1.0, 3));
        for _ in 0..3 {
            assert!(limiter.check_rate_limit("S").is_allowed());
        }
        let result = limiter.check_rate_limit("S");
        assert!(!result.is_allowed());
        assert!(result.retry_after().unwrap() > Duration::ZERO);
    }

    #[test]
    fn test_tokens_refill() {
        let limiter = RateLimiter::new(RateLimitConfig::new(100.0, 1));
        assert!(limiter.check_rate_limit("S").is_allowed());
        assert!(!limiter.check_rate_limit("S").is_allowed());

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check_rate_limit("S").is_allowed());
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1.0, 1));
        assert!(limiter.check_rate_limit("A").is_allowed());
        assert!(limiter.check_rate_limit("B").is_allowed());
        assert!(!limiter.check_rate_limit("A").is_allowed());
        assert_eq!(limiter.tracked_key_count(), 2);
    }

    #[test]
    fn test_stale_entries_are_cleaned() {
        let mut config = RateLimitConfig::new(10.0, 10);
        config.cleanup_interval = Duration::ZERO;
        config.entry_ttl = Duration::from_millis(10);
        let limiter = RateLimiter::new(config);

        limiter.check_rate_limit("A");
        std::thread::sleep(Duration::from_millis(20));
        limiter.check_rate_limit("B");

        assert_eq!(limiter.tracked_key_count(), 1);
    }
}
