//! Application State

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use divd_jobs::{FastQueueSink, JobManager, Worker};
use divd_store::Store;
use divd_upstream::DividendsClient;

use crate::auth::AuthConfig;
use crate::rate_limit::KeyRateLimiter;

/// Application configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Service name reported by `/health`
    pub service_name: String,
    /// Service version
    pub version: String,
    /// Listen address
    pub listen_addr: String,
    /// Enable CORS
    pub enable_cors: bool,
    /// Ticker-count ceiling per update request
    pub max_tickers_per_request: usize,
    /// Requests above this many tickers answer immediately and continue
    /// in the background
    pub fast_mode_threshold: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            service_name: "divd-api".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            listen_addr: "0.0.0.0:3000".to_string(),
            enable_cors: true,
            max_tickers_per_request: 100,
            fast_mode_threshold: 20,
        }
    }
}

/// Shared state for all handlers.
pub struct AppState {
    pub config: ApiConfig,
    pub auth: AuthConfig,
    pub store: Arc<dyn Store>,
    pub manager: JobManager,
    pub client: Arc<dyn DividendsClient>,
    pub fast_queue: Arc<dyn FastQueueSink>,
    /// Worker driven inline by `POST /process-queue`
    pub worker: Arc<Worker>,
    pub limiter: KeyRateLimiter,
    pub started_at: DateTime<Utc>,
    request_counter: RwLock<u64>,
}

impl AppState {
    /// Assemble state from the service components.
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn DividendsClient>,
        fast_queue: Arc<dyn FastQueueSink>,
        worker: Arc<Worker>,
    ) -> Self {
        Self {
            config: ApiConfig::default(),
            auth: AuthConfig::default(),
            manager: JobManager::new(store.clone()),
            store,
            client,
            fast_queue,
            worker,
            limiter: KeyRateLimiter::default(),
            started_at: Utc::now(),
            request_counter: RwLock::new(0),
        }
    }

    /// Set the API configuration.
    pub fn with_config(mut self, config: ApiConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the authentication configuration.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Set the per-key rate limiter.
    pub fn with_limiter(mut self, limiter: KeyRateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Service uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    /// Increment and return the request counter.
    pub async fn increment_requests(&self) -> u64 {
        let mut counter = self.request_counter.write().await;
        *counter += 1;
        *counter
    }

    /// Requests handled so far.
    pub async fn request_count(&self) -> u64 {
        *self.request_counter.read().await
    }
}
