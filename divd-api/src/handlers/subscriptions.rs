//! Subscription Handlers
//!
//! Subscription changes append to the activity log, and new
//! subscriptions enqueue a fast-path backfill for their ticker through
//! the same pipeline as `update-tickers`.

use axum::{
    extract::{Extension, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use divd_core::{validate_symbol, SubscriptionActivity};
use divd_store::DividendFilter;

use crate::auth::AuthUser;
use crate::csv::{all_csv, csv_response};
use crate::dto::{
    BulkOutcomeDto, BulkSubscriptionRequest, BulkSubscriptionResponse, DividendsQuery,
    MyDividendsResponse, SubscribeRequest, SubscriptionDto, SubscriptionsResponse,
    UnsubscribeRequest,
};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ingest::run_ingest;
use crate::state::AppState;

/// Backfill priority for newly subscribed tickers
const BACKFILL_PRIORITY: i32 = 2;

async fn log_activity(
    state: &AppState,
    user_id: Uuid,
    ticker: &str,
    action: &str,
    detail: serde_json::Value,
) {
    let activity = SubscriptionActivity::new(user_id, ticker, action, detail, Utc::now());
    if let Err(err) = state.store.log_subscription_activity(&activity).await {
        tracing::warn!("failed to log subscription activity: {}", err);
    }
}

/// Enqueue a backfill for a freshly subscribed ticker. Failures are
/// logged; the subscription itself has already been committed.
async fn trigger_backfill(state: &AppState, symbol: &str) {
    if let Err(err) = run_ingest(state, vec![symbol.to_string()], BACKFILL_PRIORITY, false).await
    {
        tracing::warn!("backfill trigger failed for {}: {}", symbol, err);
    }
}

/// `GET /subscriptions`
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionsResponse>> {
    state.increment_requests().await;
    let user_id = user.require_user_id()?;
    let subscriptions = state.store.list_subscriptions(user_id).await?;
    Ok(Json(SubscriptionsResponse {
        count: subscriptions.len(),
        subscriptions: subscriptions.into_iter().map(Into::into).collect(),
    }))
}

/// `POST /subscriptions`
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<SubscribeRequest>,
) -> ApiResult<Json<SubscriptionDto>> {
    state.increment_requests().await;
    let user_id = user.require_user_id()?;
    let symbol = validate_symbol(&request.ticker)
        .map_err(|err| ApiError::validation(err.to_string()))?;
    let priority = request.priority.unwrap_or(1);

    let subscription = state.store.subscribe(user_id, &symbol, priority).await?;
    log_activity(
        &state,
        user_id,
        &symbol,
        "subscribe",
        serde_json::json!({ "priority": priority }),
    )
    .await;
    trigger_backfill(&state, &symbol).await;

    Ok(Json(subscription.into()))
}

/// `DELETE /subscriptions`
pub async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<UnsubscribeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.increment_requests().await;
    let user_id = user.require_user_id()?;
    let symbol = validate_symbol(&request.ticker)
        .map_err(|err| ApiError::validation(err.to_string()))?;

    state.store.unsubscribe(user_id, &symbol).await?;
    log_activity(&state, user_id, &symbol, "unsubscribe", serde_json::json!({})).await;

    Ok(Json(serde_json::json!({
        "ticker": symbol,
        "unsubscribed": true,
    })))
}

/// `POST /subscriptions/bulk`
pub async fn bulk_subscriptions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<BulkSubscriptionRequest>,
) -> ApiResult<Json<BulkSubscriptionResponse>> {
    state.increment_requests().await;
    let user_id = user.require_user_id()?;
    let subscribe = match request.action.as_str() {
        "subscribe" => true,
        "unsubscribe" => false,
        other => {
            return Err(ApiError::validation(format!(
                "unknown action '{}', expected subscribe or unsubscribe",
                other
            )));
        }
    };
    if request.tickers.is_empty() {
        return Err(ApiError::validation("tickers must be a non-empty array"));
    }
    let priority = request.priority.unwrap_or(1);

    let mut results = Vec::with_capacity(request.tickers.len());
    let mut subscribed = Vec::new();
    for raw in &request.tickers {
        let symbol = match validate_symbol(raw) {
            Ok(symbol) => symbol,
            Err(err) => {
                results.push(BulkOutcomeDto {
                    ticker: raw.clone(),
                    ok: false,
                    message: Some(err.to_string()),
                });
                continue;
            }
        };

        let outcome = if subscribe {
            state
                .store
                .subscribe(user_id, &symbol, priority)
                .await
                .map(|_| ())
        } else {
            state.store.unsubscribe(user_id, &symbol).await
        };

        match outcome {
            Ok(()) => {
                let action = if subscribe { "bulk_subscribe" } else { "bulk_unsubscribe" };
                log_activity(
                    &state,
                    user_id,
                    &symbol,
                    action,
                    serde_json::json!({ "priority": priority }),
                )
                .await;
                if subscribe {
                    subscribed.push(symbol.clone());
                }
                results.push(BulkOutcomeDto {
                    ticker: symbol,
                    ok: true,
                    message: None,
                });
            }
            Err(err) => results.push(BulkOutcomeDto {
                ticker: symbol,
                ok: false,
                message: Some(err.to_string()),
            }),
        }
    }

    for symbol in &subscribed {
        trigger_backfill(&state, symbol).await;
    }

    let succeeded = results.iter().filter(|r| r.ok).count() as u32;
    let failed = results.len() as u32 - succeeded;
    Ok(Json(BulkSubscriptionResponse {
        action: request.action,
        succeeded,
        failed,
        results,
    }))
}

/// `GET /my-dividends`
pub async fn my_dividends(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<DividendsQuery>,
) -> ApiResult<Response> {
    state.increment_requests().await;
    let user_id = user.require_user_id()?;

    let tickers: Vec<String> = state
        .store
        .list_subscriptions(user_id)
        .await?
        .into_iter()
        .map(|s| s.ticker_symbol)
        .collect();

    let rows = if tickers.is_empty() {
        Vec::new()
    } else {
        let filter = DividendFilter {
            start_date: query.start_date,
            end_date: query.end_date,
            limit: query.limit,
            offset: query.offset,
        };
        state.store.dividends_for_tickers(&tickers, &filter).await?
    };

    if query.format.as_deref() == Some("csv") {
        return Ok(csv_response("my_dividends.csv", all_csv(&rows)));
    }

    Ok(Json(MyDividendsResponse {
        tickers,
        count: rows.len(),
        dividends: rows.into_iter().map(Into::into).collect(),
    })
    .into_response())
}
