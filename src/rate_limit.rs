//! Fixed-window rate limiting for the authentication endpoints.
//!
//! Counters are keyed by `(client ip, endpoint)` and live in process memory,
//! so every server instance enforces its own limit.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use metrics::counter;

use crate::config::RateLimitConfig;
use crate::error::{ApiError, rate_limited};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    /// Rejected; the window resets after this many seconds.
    Limited { retry_after: u64 },
}

type Key = (IpAddr, String);

/// In-process fixed-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<Key, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_seconds))
    }

    pub fn check(&self, ip: IpAddr, endpoint: &str) -> Decision {
        self.check_at(ip, endpoint, Instant::now())
    }

    /// Counts one request for the key at `now`. A window starts with the
    /// first request for a key and lasts the configured length.
    pub fn check_at(&self, ip: IpAddr, endpoint: &str, now: Instant) -> Decision {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let window = windows
            .entry((ip, endpoint.to_string()))
            .or_insert(Window { started: now, count: 0 });

        if now.duration_since(window.started) >= self.window {
            *window = Window { started: now, count: 0 };
        }

        if window.count >= self.max_requests {
            let elapsed = now.duration_since(window.started);
            let remaining = self.window.saturating_sub(elapsed);
            // Round up so clients never retry inside the window.
            let retry_after = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Decision::Limited {
                retry_after: retry_after.max(1),
            };
        }

        window.count += 1;
        Decision::Allowed {
            remaining: self.max_requests - window.count,
        }
    }

    /// Drops windows that have ended. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.started) < self.window);
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Middleware applying the limiter to every request of the wrapped routes.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    match limiter.check(ip, &endpoint) {
        Decision::Allowed { .. } => Ok(next.run(request).await),
        Decision::Limited { retry_after } => {
            counter!("rate_limit_rejections_total", "endpoint" => endpoint.clone()).increment(1);
            tracing::warn!(%ip, endpoint = %endpoint, retry_after, "Rate limit exceeded");
            Err(rate_limited(retry_after))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_rejects_request_over_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        for expected_remaining in [2, 1, 0] {
            assert_eq!(
                limiter.check_at(ip(1), "/auth/login", now),
                Decision::Allowed {
                    remaining: expected_remaining
                }
            );
        }
        assert_eq!(
            limiter.check_at(ip(1), "/auth/login", now + Duration::from_secs(15)),
            Decision::Limited { retry_after: 45 }
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(matches!(limiter.check_at(ip(1), "/auth/login", now), Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at(ip(2), "/auth/login", now), Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at(ip(1), "/auth/register", now), Decision::Allowed { .. }));
        assert!(matches!(limiter.check_at(ip(1), "/auth/login", now), Decision::Limited { .. }));
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let now = Instant::now();

        assert!(matches!(limiter.check_at(ip(1), "/x", now), Decision::Allowed { .. }));
        assert!(matches!(
            limiter.check_at(ip(1), "/x", now + Duration::from_secs(9)),
            Decision::Limited { retry_after: 1 }
        ));
        assert!(matches!(
            limiter.check_at(ip(1), "/x", now + Duration::from_secs(10)),
            Decision::Allowed { remaining: 0 }
        ));
    }

    #[test]
    fn test_purge_expired() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        let now = Instant::now();
        limiter.check_at(ip(1), "/a", now);
        limiter.check_at(ip(2), "/a", now + Duration::from_secs(5));

        assert_eq!(limiter.purge_expired(now + Duration::from_secs(12)), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
