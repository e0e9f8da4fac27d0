//! Dividend Read Handlers

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use divd_core::validate_symbol;
use divd_store::DividendFilter;

use crate::csv::{all_csv, csv_response, ticker_csv};
use crate::dto::{
    AllDividendsResponse, CheckOnlyResponse, DividendsQuery, TickerDividendsResponse,
};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Default page size for `GET /dividends/all`
const ALL_DEFAULT_LIMIT: u32 = 1000;

fn to_filter(query: &DividendsQuery) -> DividendFilter {
    DividendFilter {
        start_date: query.start_date,
        end_date: query.end_date,
        limit: query.limit,
        offset: query.offset,
    }
}

fn wants_csv(query: &DividendsQuery) -> bool {
    query.format.as_deref() == Some("csv")
}

/// `GET /dividends/{ticker}`
pub async fn ticker_dividends(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Query(query): Query<DividendsQuery>,
) -> ApiResult<Response> {
    state.increment_requests().await;
    let symbol =
        validate_symbol(&ticker).map_err(|err| ApiError::validation(err.to_string()))?;

    let row = state.store.get_ticker(&symbol).await?;
    let filter = to_filter(&query);

    if query.check_only.unwrap_or(false) {
        let rows = state.store.dividends_for_ticker(&symbol, &filter).await?;
        return Ok(Json(CheckOnlyResponse {
            ticker: symbol,
            has_data: !rows.is_empty(),
            count: rows.len(),
            last_updated: row.and_then(|t| t.last_dividend_update),
        })
        .into_response());
    }

    let rows = state.store.dividends_for_ticker(&symbol, &filter).await?;
    if rows.is_empty() && !query.fallback.unwrap_or(false) {
        return Err(ApiError::not_found(format!(
            "no dividend data for {}",
            symbol
        )));
    }

    if wants_csv(&query) {
        let body = ticker_csv(&rows);
        return Ok(csv_response(&format!("{}_dividends.csv", symbol), body));
    }

    let message = if rows.is_empty() {
        Some("no local data yet; an ingestion request may still be in flight".to_string())
    } else {
        None
    };
    let last_updated = if query.last_updated.unwrap_or(false) {
        state
            .store
            .get_ticker(&symbol)
            .await?
            .and_then(|t| t.last_dividend_update)
    } else {
        None
    };

    Ok(Json(TickerDividendsResponse {
        ticker: symbol,
        count: rows.len(),
        dividends: rows.into_iter().map(Into::into).collect(),
        last_updated,
        message,
    })
    .into_response())
}

/// `GET /dividends/all`
pub async fn all_dividends(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DividendsQuery>,
) -> ApiResult<Response> {
    state.increment_requests().await;
    let mut filter = to_filter(&query);
    if filter.limit.is_none() {
        filter.limit = Some(ALL_DEFAULT_LIMIT);
    }

    let rows = state.store.dividends_all(&filter).await?;
    if wants_csv(&query) {
        return Ok(csv_response("all_dividends.csv", all_csv(&rows)));
    }
    Ok(Json(AllDividendsResponse {
        count: rows.len(),
        dividends: rows.into_iter().map(Into::into).collect(),
    })
    .into_response())
}
