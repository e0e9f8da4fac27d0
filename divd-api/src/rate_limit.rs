//! Per-Key Rate Limiting
//!
//! Sliding one-hour window over a per-key timestamp list. The lists live
//! in process memory behind a mutex; in multi-instance deployments each
//! instance keeps its own window and the imprecision is accepted.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Default requests per key per window
pub const DEFAULT_LIMIT: u32 = 100;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy)]
pub struct RateCheck {
    pub allowed: bool,
    pub remaining: u32,
    /// When the window frees a slot again; set on rejection
    pub reset_at: Option<DateTime<Utc>>,
}

/// Sliding-window limiter keyed by API key.
#[derive(Clone)]
pub struct KeyRateLimiter {
    limit: u32,
    window: Duration,
    windows: Arc<Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>>,
}

impl Default for KeyRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl KeyRateLimiter {
    /// Limiter admitting `limit` requests per key per hour.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::hours(1),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Configured per-key limit.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Check one request against the key's window, recording it when
    /// admitted.
    pub async fn check(&self, key: &str) -> RateCheck {
        let now = Utc::now();
        let floor = now - self.window;
        let mut windows = self.windows.lock().await;
        let timestamps = windows.entry(key.to_string()).or_default();

        while timestamps.front().is_some_and(|t| *t < floor) {
            timestamps.pop_front();
        }

        if timestamps.len() as u32 >= self.limit {
            let reset_at = timestamps
                .front()
                .map(|oldest| *oldest + self.window)
                .unwrap_or(now);
            return RateCheck {
                allowed: false,
                remaining: 0,
                reset_at: Some(reset_at),
            };
        }

        timestamps.push_back(now);
        RateCheck {
            allowed: true,
            remaining: self.limit - timestamps.len() as u32,
            reset_at: None,
        }
    }

    /// Drop keys whose windows have emptied.
    pub async fn cleanup(&self) {
        let floor = Utc::now() - self.window;
        let mut windows = self.windows.lock().await;
        windows.retain(|_, timestamps| timestamps.back().is_some_and(|t| *t >= floor));
    }
}

/// Rate-limit middleware; runs after authentication.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    // Public paths carry no AuthUser and are not limited.
    let Some(user) = request.extensions().get::<AuthUser>().cloned() else {
        return next.run(request).await;
    };

    let check = state.limiter.check(&user.api_key).await;
    if !check.allowed {
        tracing::warn!(
            "rate limit exceeded for key ending {}",
            &user.api_key[user.api_key.len().saturating_sub(4)..]
        );
        let mut response = ApiError::QuotaExceeded {
            message: format!(
                "limit of {} requests per hour reached",
                state.limiter.limit()
            ),
            reset_at: check.reset_at,
        }
        .into_response();
        apply_headers(&mut response, state.limiter.limit(), 0);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, state.limiter.limit(), check.remaining);
    response
}

fn apply_headers(response: &mut Response, limit: u32, remaining: u32) {
    let headers = response.headers_mut();
    if let Ok(value) = limit.to_string().parse() {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = remaining.to_string().parse() {
        headers.insert("X-RateLimit-Remaining", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_window_admits_up_to_limit() {
        let limiter = KeyRateLimiter::new(3);
        for i in 0..3 {
            let check = limiter.check("tk_window").await;
            assert!(check.allowed, "request {}", i);
            assert_eq!(check.remaining, 2 - i);
        }

        let rejected = limiter.check("tk_window").await;
        assert!(!rejected.allowed);
        let reset_at = rejected.reset_at.unwrap();
        let delta = reset_at - Utc::now();
        assert!(delta > Duration::minutes(59) && delta <= Duration::hours(1));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = KeyRateLimiter::new(1);
        assert!(limiter.check("tk_key_a").await.allowed);
        assert!(!limiter.check("tk_key_a").await.allowed);
        assert!(limiter.check("tk_key_b").await.allowed);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_active_windows() {
        let limiter = KeyRateLimiter::new(5);
        limiter.check("tk_active").await;
        limiter.cleanup().await;
        // The active window must survive cleanup and keep its count
        let check = limiter.check("tk_active").await;
        assert_eq!(check.remaining, 3);
    }
}
