//! Authentication
//!
//! API keys arrive in `X-API-Key` or `Authorization: Bearer <key>`.
//! Format is checked before any store lookup; unknown and inactive keys
//! both answer 401. An optional static operator key (from
//! `TICKER_API_KEY`) authenticates without a user row.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use divd_core::validate_api_key;

use crate::error::ApiError;
use crate::state::AppState;

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Static operator key accepted without a user row
    pub static_key: Option<String>,
    /// Paths served without authentication
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            static_key: None,
            public_paths: vec![
                "/".to_string(),
                "/health".to_string(),
                // Internal trigger, reachable only inside the deployment
                "/process-queue".to_string(),
            ],
        }
    }
}

impl AuthConfig {
    /// Load from environment (`TICKER_API_KEY`).
    pub fn from_env() -> Self {
        Self {
            static_key: std::env::var("TICKER_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            ..Default::default()
        }
    }

    /// Whether a path skips authentication.
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| p == path)
    }
}

/// Authenticated caller, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Store user id; `None` for the static operator key
    pub user_id: Option<Uuid>,
    pub api_key: String,
    pub user_name: Option<String>,
    pub max_subscriptions: u32,
}

impl AuthUser {
    /// The store user id, or an error for operator-key callers.
    pub fn require_user_id(&self) -> Result<Uuid, ApiError> {
        self.user_id.ok_or_else(|| {
            ApiError::unauthorized("this endpoint requires a registered user API key")
        })
    }
}

/// Pull the API key out of the request headers.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("X-API-Key").and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

/// Authentication middleware.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if state.auth.is_public_path(path) || request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let key = match extract_api_key(request.headers()) {
        Some(key) => key,
        None => {
            return ApiError::unauthorized(
                "provide X-API-Key or Authorization: Bearer <key>",
            )
            .into_response();
        }
    };

    if validate_api_key(&key).is_err() {
        return ApiError::unauthorized("malformed API key").into_response();
    }

    if state.auth.static_key.as_deref() == Some(key.as_str()) {
        request.extensions_mut().insert(AuthUser {
            user_id: None,
            api_key: key,
            user_name: Some("operator".to_string()),
            max_subscriptions: 0,
        });
        return next.run(request).await;
    }

    match state.store.get_user_by_key(&key).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(AuthUser {
                user_id: Some(user.id),
                api_key: key,
                user_name: user.user_name,
                max_subscriptions: user.max_subscriptions,
            });
            next.run(request).await
        }
        Ok(None) => ApiError::unauthorized("unknown or inactive API key").into_response(),
        Err(err) => {
            tracing::error!("auth lookup failed: {}", err);
            ApiError::internal("authentication backend unavailable").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_prefers_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", HeaderValue::from_static("tk_header"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tk_bearer"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("tk_header"));
    }

    #[test]
    fn test_extract_falls_back_to_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tk_bearer"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("tk_bearer"));
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }

    #[test]
    fn test_public_paths() {
        let config = AuthConfig::default();
        assert!(config.is_public_path("/health"));
        assert!(config.is_public_path("/process-queue"));
        assert!(!config.is_public_path("/update-tickers"));
    }

    #[test]
    fn test_require_user_id() {
        let operator = AuthUser {
            user_id: None,
            api_key: "tk_operator".to_string(),
            user_name: Some("operator".to_string()),
            max_subscriptions: 0,
        };
        assert!(operator.require_user_id().is_err());

        let user = AuthUser {
            user_id: Some(Uuid::new_v4()),
            api_key: "tk_user_key".to_string(),
            user_name: None,
            max_subscriptions: 10,
        };
        assert!(user.require_user_id().is_ok());
    }
}
