//! Sliding-window rate limiter, one window per destination.
//!
//! Owned by the delivery stage; nothing here is shared or global.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Send timestamps for one destination, oldest first.
#[derive(Debug, Default)]
pub struct RateWindow {
    sends: VecDeque<Instant>,
}

impl RateWindow {
    /// Drop timestamps older than `now - window`.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.sends.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.sends.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sends.is_empty()
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_messages: usize,
    window: Duration,
    windows: HashMap<String, RateWindow>,
}

impl RateLimiter {
    pub fn new(max_messages: usize, window: Duration) -> Self {
        Self {
            enabled: true,
            max_messages,
            window,
            windows: HashMap::new(),
        }
    }

    /// A limiter that never limits.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(usize::MAX, Duration::ZERO)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `true` when `channel` already had `max_messages` sends within the window.
    pub fn is_rate_limited(&mut self, channel: &str, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(window) = self.windows.get_mut(channel) else {
            return false;
        };
        window.prune(now, self.window);
        window.len() >= self.max_messages
    }

    /// Record a successful send.
    pub fn record(&mut self, channel: &str, now: Instant) {
        if !self.enabled {
            return;
        }
        let window = self.windows.entry(channel.to_string()).or_default();
        window.prune(now, self.window);
        window.sends.push_back(now);
        while window.len() > self.max_messages {
            window.sends.pop_front();
        }
    }

    /// Sends counted against `channel` right now.
    pub fn in_window(&mut self, channel: &str, now: Instant) -> usize {
        match self.windows.get_mut(channel) {
            Some(window) => {
                window.prune(now, self.window);
                window.len()
            }
            None => 0,
        }
    }

    /// How long until `channel` may send again; `None` if it may send now.
    pub fn retry_after(&mut self, channel: &str, now: Instant) -> Option<Duration> {
        if !self.is_rate_limited(channel, now) {
            return None;
        }
        let oldest = self.windows.get(channel)?.sends.front()?;
        Some(self.window.saturating_sub(now.saturating_duration_since(*oldest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_limits_after_max_messages() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..3 {
            assert!(!limiter.is_rate_limited("ops", now));
            limiter.record("ops", now);
        }
        assert!(limiter.is_rate_limited("ops", now));
        assert!(!limiter.is_rate_limited("other", now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();
        limiter.record("ops", start);
        limiter.record("ops", start + Duration::from_secs(5));

        assert!(limiter.is_rate_limited("ops", start + Duration::from_secs(9)));
        assert_eq!(
            limiter.retry_after("ops", start + Duration::from_secs(9)),
            Some(Duration::from_secs(1))
        );

        // The first send left the window.
        assert!(!limiter.is_rate_limited("ops", start + Duration::from_secs(10)));
        assert_eq!(limiter.in_window("ops", start + Duration::from_secs(10)), 1);
        assert_eq!(limiter.in_window("ops", start + Duration::from_secs(15)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_never_exceeds_max() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..5 {
            limiter.record("ops", now);
        }
        assert_eq!(limiter.in_window("ops", now), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_limits() {
        let mut limiter = RateLimiter::disabled();
        let now = Instant::now();
        for _ in 0..1000 {
            limiter.record("ops", now);
        }
        assert!(!limiter.is_rate_limited("ops", now));
        assert_eq!(limiter.retry_after("ops", now), None);
    }
}
