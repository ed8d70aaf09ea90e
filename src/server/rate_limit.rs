//! Per-client request limiting for the API surface
//!
//! Fixed windows keyed by client IP. A client gets `max_requests` calls per
//! window; the window restarts on the first call after it lapses.

use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Windows are swept once the table grows past this many clients
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

pub struct RateLimiter {
    windows: DashMap<IpAddr, Window>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max_requests,
        }
    }

    /// Count one request from `ip` against its window
    pub fn check(&self, ip: IpAddr) -> Admission {
        if self.windows.len() > PRUNE_THRESHOLD {
            self.prune();
        }

        let now = Instant::now();
        let mut entry = self.windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        let window = entry.value_mut();

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(window.started));
            return Admission::Limited { retry_after };
        }

        window.count += 1;
        Admission::Allowed {
            remaining: self.max_requests - window.count,
        }
    }

    /// Drop windows that have lapsed
    pub fn prune(&self) -> usize {
        let before = self.windows.len();
        let span = self.window;
        self.windows
            .retain(|_, window| window.started.elapsed() < span);
        let pruned = before.saturating_sub(self.windows.len());
        if pruned > 0 {
            debug!(pruned, "Rate limit windows pruned");
        }
        pruned
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
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
    fn test_limit_within_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);

        assert_eq!(limiter.check(ip(1)), Admission::Allowed { remaining: 1 });
        assert_eq!(limiter.check(ip(1)), Admission::Allowed { remaining: 0 });
        match limiter.check(ip(1)) {
            Admission::Limited { retry_after } => {
                assert!(retry_after <= Duration::from_secs(60));
                assert!(retry_after > Duration::from_secs(50));
            }
            other => panic!("expected limit, got {:?}", other),
        }

        // Other clients keep their own budget
        assert!(limiter.check(ip(2)).is_allowed());
    }

    #[test]
    fn test_window_restarts_after_lapse() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 1);
        assert!(limiter.check(ip(1)).is_allowed());
        assert!(!limiter.check(ip(1)).is_allowed());

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check(ip(1)).is_allowed());
    }

    #[test]
    fn test_prune_drops_lapsed_windows() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 5);
        limiter.check(ip(1));
        limiter.check(ip(2));
        assert_eq!(limiter.tracked_clients(), 2);

        std::thread::sleep(Duration::from_millis(30));
        limiter.check(ip(3));
        assert_eq!(limiter.prune(), 2);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_zero_budget_limits_everything() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 0);
        assert!(!limiter.check(ip(1)).is_allowed());
    }
}
