//! Fixed-window rate limiting of outbound delivery attempts
//!
//! Each key owns a window that opens on the first request after the previous
//! window expired. Within a window at most `max_requests` requests are
//! admitted; further requests wait for the window to roll over.
//!
//! # Example
//!
//! ```text
//! Rate limit: 3 requests per 60s
//! t=0s:   request 1 opens a window, admitted (count 1)
//! t=1s:   requests 2 and 3 admitted (count 3)
//! t=2s:   request 4 rejected, waits until t=60s
//! t=60s:  request 4 opens a new window, admitted (count 1)
//! ```
//!
//! Windows are not aligned to wall-clock boundaries, so a burst at the end of
//! one window followed by a burst at the start of the next can exceed the
//! nominal rate for a short period.

use std::{sync::Arc, time::Duration};

use courier_common::tracing;
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Configuration for rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Length of a window (milliseconds)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

const fn default_max_requests() -> u32 {
    100
}

const fn default_window_ms() -> u64 {
    60_000 // 1 minute
}

/// Counter for a single key
#[derive(Debug)]
struct Window {
    /// When the current window opened
    started_at: Instant,
    /// Requests admitted in the current window
    count: u32,
}

impl Window {
    fn open(now: Instant) -> Self {
        Self {
            started_at: now,
            count: 1,
        }
    }

    fn ends_at(&self, length: Duration) -> Instant {
        self.started_at + length
    }
}

/// Keyed fixed-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Arc<parking_lot::Mutex<Window>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    const fn window_length(&self) -> Duration {
        Duration::from_millis(self.config.window_ms)
    }

    /// Try to admit one request for `key`
    ///
    /// Returns `Ok(())` if admitted, `Err(Duration)` with the time left until
    /// the current window rolls over if rejected.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let length = self.window_length();

        let window = match self.windows.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(parking_lot::Mutex::new(Window::open(now))));
                return Ok(());
            }
        };

        let mut window = window.lock();

        if now >= window.ends_at(length) {
            *window = Window::open(now);
            return Ok(());
        }

        if window.count < self.config.max_requests {
            window.count += 1;
            Ok(())
        } else {
            let remaining = window.ends_at(length).saturating_duration_since(now);
            drop(window);
            tracing::debug!(
                key,
                wait_seconds = remaining.as_secs_f64(),
                "Rate limit exceeded, must wait"
            );
            Err(remaining)
        }
    }

    /// Returns `true` if a request for `key` is admitted right now
    pub fn is_allowed(&self, key: &str) -> bool {
        self.check(key).is_ok()
    }

    /// Wait until a request for `key` is admitted
    ///
    /// Sleeps until the current window rolls over whenever the limit has been
    /// reached, then tries again.
    pub async fn wait_until_allowed(&self, key: &str) {
        while let Err(remaining) = self.check(key) {
            tokio::time::sleep(remaining).await;
        }
    }

    /// Current window statistics for `key`, or `None` if the key was never used
    pub fn stats(&self, key: &str) -> Option<RateLimitStats> {
        let window = self.windows.get(key)?.clone();
        let window = window.lock();

        Some(RateLimitStats {
            count: window.count,
            max_requests: self.config.max_requests,
            resets_in: window
                .ends_at(self.window_length())
                .saturating_duration_since(Instant::now()),
        })
    }
}

/// Statistics for a key's current window
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    /// Requests admitted in the current window
    pub count: u32,
    /// Requests allowed per window
    pub max_requests: u32,
    /// Time until the current window expires
    pub resets_in: Duration,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window_ms,
        })
    }

    #[test]
    fn test_fixed_window_admission() {
        let limiter = limiter(3, 60_000);

        assert!(limiter.is_allowed("send"));
        assert!(limiter.is_allowed("send"));
        assert!(limiter.is_allowed("send"));
        assert!(!limiter.is_allowed("send"));

        let wait = limiter.check("send").unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(60));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1, 60_000);

        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));
        assert!(limiter.is_allowed("b"));
    }

    #[test]
    fn test_first_request_always_opens_window() {
        let limiter = limiter(0, 60_000);

        assert!(limiter.is_allowed("send"));
        assert!(!limiter.is_allowed("send"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rollover() {
        let limiter = limiter(2, 1_000);

        assert!(limiter.is_allowed("send"));
        assert!(limiter.is_allowed("send"));
        assert!(!limiter.is_allowed("send"));

        tokio::time::advance(Duration::from_millis(1_000)).await;

        assert!(limiter.is_allowed("send"));
        assert_eq!(limiter.stats("send").unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_allowed_blocks_until_rollover() {
        let limiter = limiter(3, 60_000);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.wait_until_allowed("send").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.wait_until_allowed("send").await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats() {
        let limiter = limiter(5, 10_000);
        assert!(limiter.stats("send").is_none());

        limiter.check("send").unwrap();
        limiter.check("send").unwrap();

        let stats = limiter.stats("send").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.max_requests, 5);
        assert_eq!(stats.resets_in, Duration::from_secs(10));
    }
}
