//! API Routes

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::handlers::*;
use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;

/// Create the API router with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    let enable_cors = state.config.enable_cors;

    let mut router = Router::new()
        // Health and status
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        // Dividend reads
        .route("/dividends/all", get(all_dividends))
        .route("/dividends/:ticker", get(ticker_dividends))
        // Ingestion
        .route("/update-tickers", post(update_tickers))
        .route("/process", post(process_single))
        .route("/process-queue", post(process_queue))
        // Jobs
        .route("/jobs", get(list_jobs).delete(cancel_job))
        .route("/job-status/:job_id", get(job_status))
        // Subscriptions
        .route(
            "/subscriptions",
            get(list_subscriptions)
                .post(create_subscription)
                .delete(delete_subscription),
        )
        .route("/subscriptions/bulk", post(bulk_subscriptions))
        .route("/my-dividends", get(my_dividends))
        .with_state(state.clone());

    // Layer order: requests pass CORS, then auth, then the per-key
    // limiter, then reach handlers.
    router = router.layer(middleware::from_fn_with_state(
        state.clone(),
        rate_limit_middleware,
    ));
    router = router.layer(middleware::from_fn_with_state(state, auth_middleware));

    if enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.layer(TraceLayer::new_for_http())
}

/// Build the full application router.
pub fn build_app(state: AppState) -> Router {
    let state = Arc::new(state);

    let root_router = Router::new().route("/", get(|| async { "divd dividend service" }));

    root_router.merge(create_router(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use divd_jobs::{NullFastQueue, Worker, WorkerConfig};
    use divd_store::MemoryStore;
    use divd_upstream::{RateBudgetGate, ScriptedClient};
    use tower::util::ServiceExt;

    fn create_test_state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::new());
        let gate = RateBudgetGate::polygon(store.clone());
        let worker = Arc::new(Worker::new(
            store.clone(),
            client.clone(),
            gate,
            WorkerConfig::default(),
        ));
        AppState::new(store, client, Arc::new(NullFastQueue), worker)
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let app = build_app(create_test_state());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = build_app(create_test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_route_requires_key() {
        let app = build_app(create_test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/jobs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_options_passes_cors_preflight() {
        let app = build_app(create_test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/update-tickers")
                    .header("Origin", "https://example.test")
                    .header("Access-Control-Request-Method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
