//! Sliding-window demo quota, keyed by client IP.
//!
//! Demo mode lets unauthenticated users try the gateway under a small
//! per-client budget. The check runs before any billable work.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of a demo quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoDecision {
    Allowed {
        remaining: u32,
    },
    /// Quota exhausted for this window.
    Limited,
}

/// Per-IP sliding-window request counter.
pub struct DemoLimiter {
    windows: DashMap<IpAddr, VecDeque<Instant>>,
    max_queries: u32,
    window: Duration,
}

impl DemoLimiter {
    pub fn new(max_queries: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_queries,
            window,
        }
    }

    pub fn max_queries(&self) -> u32 {
        self.max_queries
    }

    /// Consume one demo query for `ip`, or refuse if the window is full.
    pub fn check(&self, ip: IpAddr) -> DemoDecision {
        let now = Instant::now();
        let mut entry = self.windows.entry(ip).or_default();

        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() as u32 >= self.max_queries {
            return DemoDecision::Limited;
        }

        entry.push_back(now);
        DemoDecision::Allowed {
            remaining: self.max_queries - entry.len() as u32,
        }
    }

    /// Evict fully-expired windows. Call periodically from a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.windows.retain(|_ip, window| {
            window
                .back()
                .map(|last| now.duration_since(*last) < self.window)
                .unwrap_or(false)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn counts_down_then_limits() {
        let limiter = DemoLimiter::new(3, Duration::from_secs(3600));
        assert_eq!(limiter.check(ip(1)), DemoDecision::Allowed { remaining: 2 });
        assert_eq!(limiter.check(ip(1)), DemoDecision::Allowed { remaining: 1 });
        assert_eq!(limiter.check(ip(1)), DemoDecision::Allowed { remaining: 0 });
        assert_eq!(limiter.check(ip(1)), DemoDecision::Limited);
    }

    #[test]
    fn clients_are_independent() {
        let limiter = DemoLimiter::new(1, Duration::from_secs(3600));
        assert_eq!(limiter.check(ip(1)), DemoDecision::Allowed { remaining: 0 });
        assert_eq!(limiter.check(ip(1)), DemoDecision::Limited);
        assert_eq!(limiter.check(ip(2)), DemoDecision::Allowed { remaining: 0 });
    }

    #[test]
    fn window_expiry_restores_quota() {
        let limiter = DemoLimiter::new(1, Duration::from_millis(20));
        assert_eq!(limiter.check(ip(1)), DemoDecision::Allowed { remaining: 0 });
        assert_eq!(limiter.check(ip(1)), DemoDecision::Limited);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(limiter.check(ip(1)), DemoDecision::Allowed { remaining: 0 });
    }

    #[test]
    fn cleanup_drops_expired_windows() {
        let limiter = DemoLimiter::new(1, Duration::from_millis(10));
        limiter.check(ip(1));
        std::thread::sleep(Duration::from_millis(20));
        limiter.cleanup();
        assert!(limiter.windows.is_empty());
    }
}
