//! Divd API - HTTP Interface
//!
//! Public surface of the dividend ingestion service.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  divd-api                     │
//! │  CORS -> auth (API key) -> sliding-window     │
//! │  rate limit -> handlers                       │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────────┐  │
//! │  │ Handlers │ │   DTOs   │ │   AppState   │  │
//! │  └──────────┘ └──────────┘ └──────────────┘  │
//! └──────────────────────────────────────────────┘
//!        │               │              │
//!        ▼               ▼              ▼
//!   divd-jobs       divd-store     divd-upstream
//! ```
//!
//! # Endpoints
//!
//! ## Health & status
//! - `GET /health` - service health (public)
//! - `GET /stats` - service statistics
//!
//! ## Dividends
//! - `GET /dividends/{ticker}` - per-ticker history, JSON or CSV
//! - `GET /dividends/all` - cross-ticker history, JSON or CSV
//!
//! ## Ingestion
//! - `POST /update-tickers` - route symbols into the fast/bulk lanes
//! - `POST /process` - synchronous single-ticker refresh
//! - `POST /process-queue` - internal worker trigger (public path)
//!
//! ## Jobs
//! - `GET /jobs` - list jobs
//! - `GET /job-status/{jobId}` - progress and ETA
//! - `DELETE /jobs?jobId={id}` - cancel a pending job
//!
//! ## Subscriptions
//! - `GET|POST|DELETE /subscriptions`, `POST /subscriptions/bulk`
//! - `GET /my-dividends` - dividends across subscribed tickers

pub mod auth;
pub mod csv;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

// Re-export main types
pub use auth::{AuthConfig, AuthUser};
pub use dto::*;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use rate_limit::{KeyRateLimiter, RateCheck};
pub use routes::{build_app, create_router};
pub use state::{ApiConfig, AppState};

/// Start the API server on the configured listen address.
pub async fn start_server(state: AppState) -> Result<(), std::io::Error> {
    let addr = state.config.listen_addr.clone();
    let app = build_app(state);

    tracing::info!("starting divd API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
