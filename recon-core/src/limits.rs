//! Sliding-window rate limiting for heavyweight operations.
//!
//! Keyed by caller (IP or user id), process-local, cleared by age. The
//! reconcile and force-match paths consult this before doing any work.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests per window
    pub max_requests: u32,

    /// Time window duration
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Rate limiter verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request allowed
    Allowed,

    /// Request denied (limit exceeded)
    Denied { retry_after: Duration },
}

/// Sliding window rate limiter keyed by client
pub struct SlidingWindowLimiter {
    config: RateLimiterConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `key` and decide whether it passes
    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitResult {
        let mut windows = self.windows.lock();
        let window = windows.entry(key.to_string()).or_default();

        // Drop timestamps that slid out of the window
        while let Some(&front) = window.front() {
            if now.duration_since(front) >= self.config.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.config.max_requests as usize {
            let oldest = *window.front().expect("non-empty window");
            let retry_after = self
                .config
                .window
                .saturating_sub(now.duration_since(oldest));
            tracing::warn!(key, "rate limit exceeded");
            return RateLimitResult::Denied { retry_after };
        }

        window.push_back(now);
        RateLimitResult::Allowed
    }

    /// Drop idle client entries
    pub fn cleanup(&self) {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        windows.retain(|_, window| {
            window
                .back()
                .map(|&last| now.duration_since(last) < self.config.window)
                .unwrap_or(false)
        });
    }

    /// Number of tracked clients
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, secs: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(RateLimiterConfig {
            max_requests: max,
            window: Duration::from_secs(secs),
        })
    }

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = limiter(3, 60);
        let start = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.check_at("10.0.0.1", start), RateLimitResult::Allowed);
        }
        assert!(matches!(
            limiter.check_at("10.0.0.1", start),
            RateLimitResult::Denied { .. }
        ));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1, 60);
        let start = Instant::now();
        assert_eq!(limiter.check_at("a", start), RateLimitResult::Allowed);
        assert_eq!(limiter.check_at("b", start), RateLimitResult::Allowed);
        assert!(matches!(limiter.check_at("a", start), RateLimitResult::Denied { .. }));
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(1, 60);
        let start = Instant::now();
        assert_eq!(limiter.check_at("a", start), RateLimitResult::Allowed);
        assert!(matches!(
            limiter.check_at("a", start + Duration::from_secs(30)),
            RateLimitResult::Denied { .. }
        ));
        assert_eq!(
            limiter.check_at("a", start + Duration::from_secs(61)),
            RateLimitResult::Allowed
        );
    }

    #[test]
    fn test_retry_after_counts_down() {
        let limiter = limiter(1, 60);
        let start = Instant::now();
        limiter.check_at("a", start);
        match limiter.check_at("a", start + Duration::from_secs(45)) {
            RateLimitResult::Denied { retry_after } => {
                assert!(retry_after <= Duration::from_secs(15));
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }
}
