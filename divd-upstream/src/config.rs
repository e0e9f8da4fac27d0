//! Upstream Configuration

use std::env;

use crate::error::{FetchError, FetchResult};

/// Default provider endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.polygon.io";
/// Per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Budget service name for the dividend provider
pub const POLYGON_SERVICE: &str = "polygon";

/// Configuration for the dividend provider client.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Provider API key; absence is a fatal configuration error
    pub api_key: String,
    /// Provider base URL
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    /// Build a config with defaults around the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Load from environment variables.
    ///
    /// - `POLYGON_API_KEY`: provider key (required)
    /// - `POLYGON_BASE_URL`: endpoint override (optional)
    pub fn from_env() -> FetchResult<Self> {
        let api_key = env::var("POLYGON_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FetchError::Config("POLYGON_API_KEY is not set".to_string()))?;
        let base_url =
            env::var("POLYGON_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            api_key,
            base_url,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        })
    }

    /// Override the base URL (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UpstreamConfig::new("test-key");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout_secs, 10);
    }
}
