//! Upstream Fetch Errors

use thiserror::Error;

use divd_store::StoreError;

/// Errors surfaced by the upstream fetcher.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// The local budget (or the provider) refused the call
    #[error("Rate limited, retry in {wait_ms} ms")]
    RateLimited { wait_ms: u64 },

    /// Provider rejected the API key
    #[error("Upstream rejected credentials")]
    Unauthorized,

    /// Network failure or provider 5xx; retryable
    #[error("Transient upstream error: {0}")]
    Transient(String),

    /// Provider rejected the request shape
    #[error("Invalid upstream request: {0}")]
    Invalid(String),

    /// Missing or malformed configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

impl FetchError {
    /// Whether a retry may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. } | FetchError::Transient(_)
        )
    }
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        // Budget bookkeeping failures must not look like provider
        // rejections; treat them all as retryable.
        FetchError::Transient(err.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transient(err.to_string())
    }
}
