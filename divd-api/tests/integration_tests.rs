//! End-to-end tests over the full router with an in-memory store and a
//! scripted upstream client.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tower::util::ServiceExt;

use divd_api::{build_app, ApiConfig, AppState, AuthConfig, KeyRateLimiter};
use divd_core::{ApiUser, Dividend, PlanType};
use divd_jobs::{FastQueueSink, ScriptedFastQueue, Worker, WorkerConfig};
use divd_store::{MemoryStore, Store};
use divd_upstream::{RateBudgetGate, ScriptedClient};

const USER_KEY: &str = "tk_integration_user";
const OPERATOR_KEY: &str = "tk_operator_static";

struct TestApp {
    app: axum::Router,
    store: Arc<MemoryStore>,
    client: Arc<ScriptedClient>,
    sink: Arc<ScriptedFastQueue>,
    user: ApiUser,
}

async fn build(sink: Arc<ScriptedFastQueue>, limit: u32) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let client = Arc::new(ScriptedClient::new());
    let gate = RateBudgetGate::polygon(store.clone());
    let worker = Arc::new(Worker::new(
        store.clone(),
        client.clone(),
        gate,
        WorkerConfig {
            worker_id: "worker-int".to_string(),
            batch_size: 5,
            item_budget_secs: 30,
            courtesy_delay_ms: 0,
        },
    ));

    let mut user = ApiUser::new(USER_KEY, PlanType::Free, Utc::now());
    user.max_subscriptions = 3;
    store.upsert_user(&user).await.unwrap();

    let sink_dyn: Arc<dyn FastQueueSink> = sink.clone();
    let state = AppState::new(store.clone(), client.clone(), sink_dyn, worker)
        .with_config(ApiConfig::default())
        .with_auth(AuthConfig {
            static_key: Some(OPERATOR_KEY.to_string()),
            ..Default::default()
        })
        .with_limiter(KeyRateLimiter::new(limit));

    TestApp {
        app: build_app(state),
        store,
        client,
        sink,
        user,
    }
}

async fn test_app() -> TestApp {
    // The default sink rejects, so fast-lane symbols fall back to the
    // standard job queue and are drained by /process-queue.
    build(Arc::new(ScriptedFastQueue::failing()), 100).await
}

fn authed(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-API-Key", USER_KEY);
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn sample_dividend(ticker: &str) -> Dividend {
    Dividend::new(
        ticker,
        NaiveDate::from_ymd_opt(2024, 2, 9).unwrap(),
        Decimal::new(24, 2),
        Utc::now(),
    )
}

// ==================== Auth ====================

#[tokio::test]
async fn test_missing_and_malformed_keys_are_rejected() {
    let t = test_app().await;

    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header("X-API-Key", "not-a-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header("X-API-Key", "tk_unknown_key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bearer_and_static_operator_key() {
    let t = test_app().await;

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header("Authorization", format!("Bearer {}", USER_KEY))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The operator key authenticates but has no user row, so the
    // subscription surface refuses it.
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header("X-API-Key", OPERATOR_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/subscriptions")
                .header("X-API-Key", OPERATOR_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ==================== Scenario: first-time ingest ====================

#[tokio::test]
async fn test_first_time_ingest_drains_to_dividends() {
    let t = test_app().await;

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "POST",
            "/update-tickers",
            Some(serde_json::json!({ "tickers": ["AAPL"] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;

    assert_eq!(body["routes"][0]["reason"], "new_ticker");
    assert_eq!(body["routes"][0]["lane"], "fast");
    assert_eq!(body["fast_count"], 1);
    // The failing sink forces the fallback path, so a job exists
    assert_eq!(body["fast_queue"]["fallback"], true);
    let job_id = body["job"]["id"].as_str().unwrap().to_string();

    // Drain the queue through the internal trigger
    t.client
        .push_response(Ok(vec![sample_dividend("AAPL")]))
        .await;
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/process-queue")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await;
    assert_eq!(report["processed"], 1);

    // Dividends are served and the ticker is stamped
    let response = t
        .app
        .clone()
        .oneshot(authed("GET", "/dividends/AAPL?lastUpdated=true", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
    assert!(body["last_updated"].is_string());

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "GET",
            &format!("/job-status/{}", job_id),
            None,
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["job"]["status"], "completed");
}

// ==================== Scenario: fresh ticker skips the provider ====================

#[tokio::test]
async fn test_fresh_ticker_routes_bulk_and_skips_fetch() {
    let t = test_app().await;
    t.store.upsert_ticker("MSFT").await.unwrap();
    t.store
        .touch_ticker_update("MSFT", Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "POST",
            "/update-tickers",
            Some(serde_json::json!({ "tickers": ["MSFT"] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["routes"][0]["reason"], "recent_existing");
    assert_eq!(body["routes"][0]["lane"], "bulk");
    assert_eq!(body["bulk_count"], 1);

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/process-queue")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let report = json_body(response).await;
    assert_eq!(report["skipped"], 1);
    assert!(t.client.calls().await.is_empty());
}

// ==================== Fast queue dispatch ====================

#[tokio::test]
async fn test_fast_queue_dispatch_bypasses_job_queue() {
    let t = build(Arc::new(ScriptedFastQueue::accepting()), 100).await;

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "POST",
            "/update-tickers",
            Some(serde_json::json!({ "tickers": ["NVDA"], "priority": 2, "force": true })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["fast_queue"]["dispatched"], true);
    assert!(body["job"].is_null());

    let batches = t.sink.batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].tickers, vec!["NVDA"]);
    assert!(batches[0].force);
}

// ==================== Validation ====================

#[tokio::test]
async fn test_update_tickers_validation() {
    let t = test_app().await;

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "POST",
            "/update-tickers",
            Some(serde_json::json!({ "tickers": [] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "POST",
            "/update-tickers",
            Some(serde_json::json!({ "tickers": ["123", "not a ticker"] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let over_limit: Vec<String> = (0..101).map(|i| format!("T{}", i)).collect();
    let response = t
        .app
        .clone()
        .oneshot(authed(
            "POST",
            "/update-tickers",
            Some(serde_json::json!({ "tickers": over_limit })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_fast_mode_returns_processing_id() {
    let t = test_app().await;
    let response = t
        .app
        .clone()
        .oneshot(authed(
            "POST",
            "/update-tickers",
            Some(serde_json::json!({ "tickers": ["AAPL"], "fast": true })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert!(body["processing_id"].is_string());
    assert!(body["job"].is_null());
}

// ==================== Scenario: cancel while pending ====================

#[tokio::test]
async fn test_cancel_pending_job() {
    let t = test_app().await;

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "POST",
            "/update-tickers",
            Some(serde_json::json!({ "tickers": ["X", "Y", "Z"] })),
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    let job_id = body["job"]["id"].as_str().unwrap().to_string();

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "DELETE",
            &format!("/jobs?jobId={}", job_id),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["error_message"], "Job cancelled by user");

    // Worker finds nothing to lease
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/process-queue")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let report = json_body(response).await;
    assert_eq!(report["leased"], 0);

    // Cancelling again conflicts as 400
    let response = t
        .app
        .clone()
        .oneshot(authed(
            "DELETE",
            &format!("/jobs?jobId={}", job_id),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ==================== Scenario: per-key quota ====================

#[tokio::test]
async fn test_per_key_sliding_window_quota() {
    let t = build(Arc::new(ScriptedFastQueue::failing()), 3).await;

    for i in 0..3 {
        let response = t
            .app
            .clone()
            .oneshot(authed("GET", "/jobs", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {}", i);
        assert!(response.headers().contains_key("X-RateLimit-Limit"));
        assert!(response.headers().contains_key("X-RateLimit-Remaining"));
    }

    let response = t
        .app
        .clone()
        .oneshot(authed("GET", "/jobs", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let reset: i64 = response
        .headers()
        .get("X-RateLimit-Reset")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let expected = (Utc::now() + chrono::Duration::hours(1)).timestamp();
    assert!((reset - expected).abs() < 5);
}

// ==================== Scenario: subscription cap ====================

#[tokio::test]
async fn test_subscription_cap_and_listing() {
    let t = test_app().await;

    for ticker in ["AAPL", "MSFT", "GOOG"] {
        let response = t
            .app
            .clone()
            .oneshot(authed(
                "POST",
                "/subscriptions",
                Some(serde_json::json!({ "ticker": ticker })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "subscribe {}", ticker);
    }

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "POST",
            "/subscriptions",
            Some(serde_json::json!({ "ticker": "AMZN" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Subscription limit reached, limit=3, current=3"));

    let response = t
        .app
        .clone()
        .oneshot(authed("GET", "/subscriptions", None))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["count"], 3);

    // Subscribing also triggered a backfill, visible as activity + jobs
    assert!(t.store.activity_count().await >= 3);
}

#[tokio::test]
async fn test_unsubscribe_and_bulk() {
    let t = test_app().await;

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "POST",
            "/subscriptions/bulk",
            Some(serde_json::json!({
                "action": "subscribe",
                "tickers": ["AAPL", "bad ticker", "MSFT"]
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["succeeded"], 2);
    assert_eq!(body["failed"], 1);

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "DELETE",
            "/subscriptions",
            Some(serde_json::json!({ "ticker": "AAPL" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .app
        .clone()
        .oneshot(authed(
            "DELETE",
            "/subscriptions",
            Some(serde_json::json!({ "ticker": "AAPL" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_my_dividends_joins_subscribed_tickers() {
    let t = test_app().await;
    t.store.upsert_ticker("AAPL").await.unwrap();
    t.store
        .upsert_dividends("AAPL", &[sample_dividend("AAPL")])
        .await
        .unwrap();
    t.store.upsert_user(&t.user).await.unwrap();
    t.store.subscribe(t.user.id, "AAPL", 1).await.unwrap();

    let response = t
        .app
        .clone()
        .oneshot(authed("GET", "/my-dividends", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["dividends"][0]["ticker"], "AAPL");
}

// ==================== Dividend reads & CSV ====================

#[tokio::test]
async fn test_dividends_csv_export() {
    let t = test_app().await;
    t.store.upsert_ticker("AAPL").await.unwrap();
    t.store
        .upsert_dividends("AAPL", &[sample_dividend("AAPL")])
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(authed("GET", "/dividends/AAPL?format=csv", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/csv"
    );
    assert_eq!(
        response.headers().get("content-disposition").unwrap(),
        "attachment; filename=\"AAPL_dividends.csv\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with(
        "Declaration Date,Record Date,Ex-Dividend Date,Pay Date,Amount,Currency,Frequency,Type"
    ));
    assert!(text.contains("2024-02-09"));
}

#[tokio::test]
async fn test_unknown_ticker_is_404_unless_fallback() {
    let t = test_app().await;

    let response = t
        .app
        .clone()
        .oneshot(authed("GET", "/dividends/ZZZZ", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = t
        .app
        .clone()
        .oneshot(authed("GET", "/dividends/ZZZZ?fallback=true", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["count"], 0);

    let response = t
        .app
        .clone()
        .oneshot(authed("GET", "/dividends/ZZZZ?checkOnly=true", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["has_data"], false);
}

#[tokio::test]
async fn test_all_dividends_csv_has_ticker_column() {
    let t = test_app().await;
    t.store.upsert_ticker("AAPL").await.unwrap();
    t.store
        .upsert_dividends("AAPL", &[sample_dividend("AAPL")])
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(authed("GET", "/dividends/all?format=csv", None))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("content-disposition").unwrap(),
        "attachment; filename=\"all_dividends.csv\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("Ticker,Declaration Date"));
}
