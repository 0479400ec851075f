//! Per-client sliding-window limiter for busy listing routes.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::warn;

use crate::{error::ApiError, state::AppState};

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    trust_forwarded_for: bool,
    buckets: DashMap<String, VecDeque<Instant>>,
    checks: AtomicU64,
}

/// Idle buckets are swept once per this many checks.
const SWEEP_EVERY: u64 = 256;

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(first) = hits.front() {
        if now.duration_since(*first) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            trust_forwarded_for: false,
            buckets: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Key clients on the first `X-Forwarded-For` hop instead of the peer.
    pub fn trusting_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Records the hit and says whether it is allowed.
    pub fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> bool {
        // must run before an entry guard is held
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep_at(now);
        }

        let mut hits = self.buckets.entry(client.to_string()).or_default();
        prune(&mut hits, now, self.window);
        if hits.len() >= self.max_requests {
            return false;
        }
        hits.push_back(now);
        true
    }

    /// Drops buckets with no hit left inside the window.
    fn sweep_at(&self, now: Instant) {
        self.buckets.retain(|_, hits| {
            prune(hits, now, self.window);
            !hits.is_empty()
        });
    }

    /// Peer address, or the first forwarded hop when the proxy is trusted.
    fn client_key(&self, req: &Request) -> String {
        if self.trust_forwarded_for {
            if let Some(fwd) = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
            {
                let fwd = fwd.trim();
                if !fwd.is_empty() {
                    return fwd.to_string();
                }
            }
        }
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "unknown".into())
    }
}

pub async fn limit_listing(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let client = state.limiter.client_key(&req);
    if !state.limiter.check(&client) {
        warn!(%client, "rate limit exceeded");
        return ApiError::TooManyRequests.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let limiter = RateLimiter::per_minute(3);
        let now = Instant::now();
        assert!(limiter.check_at("1.2.3.4", now));
        assert!(limiter.check_at("1.2.3.4", now));
        assert!(limiter.check_at("1.2.3.4", now));
        assert!(!limiter.check_at("1.2.3.4", now));
        // other clients have their own window
        assert!(limiter.check_at("5.6.7.8", now));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("c", start));
        assert!(!limiter.check_at("c", start + Duration::from_secs(59)));
        assert!(limiter.check_at("c", start + Duration::from_secs(61)));
    }

    fn from_peer(peer: [u8; 4], forwarded: &str) -> Request {
        axum::http::Request::builder()
            .header("x-forwarded-for", forwarded)
            .extension(ConnectInfo(SocketAddr::from((peer, 4000))))
            .body(axum::body::Body::empty())
            .unwrap()
    }

    #[test]
    fn forwarded_header_is_ignored_unless_trusted() {
        let limiter = RateLimiter::per_minute(10);
        assert_eq!(
            limiter.client_key(&from_peer([203, 0, 113, 7], "10.0.0.1")),
            "203.0.113.7"
        );

        let bare = axum::http::Request::builder()
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(limiter.client_key(&bare), "unknown");

        let trusting = RateLimiter::per_minute(10).trusting_forwarded_for(true);
        assert_eq!(
            trusting.client_key(&from_peer([203, 0, 113, 7], "10.0.0.1, 192.168.0.1")),
            "10.0.0.1"
        );
    }

    #[test]
    fn rotating_forwarded_header_does_not_reset_the_window() {
        let limiter = RateLimiter::per_minute(10);
        let allowed = (0..1000)
            .filter(|i| {
                let req = from_peer([198, 51, 100, 1], &format!("10.1.{}.{}", i / 256, i % 256));
                limiter.check(&limiter.client_key(&req))
            })
            .count();
        assert_eq!(allowed, 10);
        assert_eq!(limiter.buckets.len(), 1);
    }

    #[test]
    fn idle_buckets_are_swept() {
        let limiter = RateLimiter::per_minute(10);
        let start = Instant::now();
        for i in 0..(SWEEP_EVERY - 1) {
            assert!(limiter.check_at(&format!("client-{i}"), start));
        }
        assert_eq!(limiter.buckets.len() as u64, SWEEP_EVERY - 1);

        // this check lands on the sweep and finds every earlier bucket expired
        assert!(limiter.check_at("late", start + Duration::from_secs(61)));
        assert_eq!(limiter.buckets.len(), 1);
    }
}
