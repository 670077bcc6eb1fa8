//! Per-client request limits
//!
//! Fixed windows: a client's first request opens a window of `window_secs`
//! and at most `max_requests` are admitted until it lapses. Paths that move
//! money get a second, tighter window on top. Windows live in timed stores,
//! so idle clients are forgotten once their window expires.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use cached::{Cached, TimedSizedCache};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::types::{error_codes, error_response};
use crate::config::RateLimitConfig;

/// Set by the upstream proxy; its first entry is the original client
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

struct Window {
    limit: u32,
    counts: Mutex<TimedSizedCache<String, u32>>,
}

impl Window {
    fn new(limit: u32, window_secs: u64, capacity: usize) -> Self {
        Self {
            limit,
            counts: Mutex::new(TimedSizedCache::with_size_and_lifespan(
                capacity.max(1),
                window_secs.max(1),
            )),
        }
    }

    /// Count one request; false once the client has used up its window
    fn admit(&self, client: &str) -> bool {
        let mut counts = self.counts.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limit window mutex was poisoned, recovering");
            poisoned.into_inner()
        });
        let count = counts.cache_get_or_set_with(client.to_string(), || 0);
        if *count >= self.limit {
            return false;
        }
        *count += 1;
        true
    }
}

pub struct RateLimiter {
    enabled: bool,
    window_secs: u64,
    general: Window,
    strict: Window,
    strict_paths: Vec<String>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            window_secs: config.window_secs.max(1),
            general: Window::new(config.max_requests, config.window_secs, config.capacity),
            strict: Window::new(config.strict_max_requests, config.window_secs, config.capacity),
            strict_paths: config.strict_paths.clone(),
        }
    }

    /// Admit or reject one request. `Err` carries the Retry-After seconds.
    pub fn check(&self, client: &str, path: &str) -> Result<(), u64> {
        if !self.enabled {
            return Ok(());
        }
        if !self.general.admit(client) {
            return Err(self.window_secs);
        }
        if self.strict_paths.iter().any(|p| p == path) && !self.strict.admit(client) {
            return Err(self.window_secs);
        }
        Ok(())
    }
}

/// Forwarded client address if the proxy set one, else the peer address
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(client), _) => client.to_string(),
        (None, Some(peer)) => peer.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer);

    if let Err(retry_after) = limiter.check(&client, request.uri().path()) {
        warn!(client = %client, path = %request.uri().path(), "Rate limit exceeded");
        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            error_codes::RATE_LIMITED,
            "RATE_LIMITED",
            "Too many requests, try again later",
        );
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSFER: &str = "/api/v1/transactions/transfer";

    fn limiter(max: u32, strict: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            max_requests: max,
            strict_max_requests: strict,
            ..Default::default()
        })
    }

    #[test]
    fn test_general_limit_per_client() {
        let limiter = limiter(3, 3);
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1", "/api/v1/accounts").is_ok());
        }
        assert_eq!(limiter.check("10.0.0.1", "/api/v1/accounts"), Err(60));
        assert!(limiter.check("10.0.0.2", "/api/v1/accounts").is_ok());
    }

    #[test]
    fn test_strict_paths_have_tighter_window() {
        let limiter = limiter(100, 2);
        assert!(limiter.check("c", TRANSFER).is_ok());
        assert!(limiter.check("c", TRANSFER).is_ok());
        assert!(limiter.check("c", TRANSFER).is_err());
        assert!(limiter.check("c", "/api/v1/accounts").is_ok());
    }

    #[test]
    fn test_disabled_admits_everything() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: false,
            max_requests: 0,
            ..Default::default()
        });
        assert!(limiter.check("c", TRANSFER).is_ok());
    }

    #[test]
    fn test_client_key() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "192.168.1.9:5000".parse().unwrap();
        assert_eq!(client_key(&headers, Some(peer)), "192.168.1.9");
        assert_eq!(client_key(&headers, None), "unknown");

        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.7");
    }
}
