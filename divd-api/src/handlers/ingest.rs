//! Ingestion Handlers
//!
//! `POST /update-tickers` is the main entry point: it validates and
//! filters symbols, consults the routing oracle per ticker, dispatches
//! first-time symbols to the fast queue (falling back to the standard
//! job on sink failure), and creates a standard refresh job for the
//! rest. Large or explicitly fast requests answer immediately and finish
//! in the background.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use divd_core::{
    filter_symbols, route_ticker, validate_symbol, Job, RouteDecision, RouteReason,
};
use divd_jobs::FastQueueBatch;
use divd_upstream::FetchKind;

use crate::dto::{
    FastQueueOutcomeDto, ProcessRequest, ProcessResponse, TickerRouteDto,
    UpdateTickersRequest, UpdateTickersResponse,
};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Result of the routing/dispatch pipeline.
pub(crate) struct IngestOutcome {
    pub routes: Vec<TickerRouteDto>,
    pub fast_queue: Option<FastQueueOutcomeDto>,
    pub job: Option<Job>,
    pub fast_count: u32,
    pub bulk_count: u32,
}

/// Route, upsert, and dispatch a set of validated symbols.
///
/// Shared by `update-tickers` and the subscription backfill trigger.
pub(crate) async fn run_ingest(
    state: &AppState,
    symbols: Vec<String>,
    priority: i32,
    force: bool,
) -> ApiResult<IngestOutcome> {
    let now = Utc::now();
    let mut routes = Vec::with_capacity(symbols.len());
    let mut fast_symbols = Vec::new();
    let mut bulk_symbols = Vec::new();

    // Routing reads the pre-upsert state so new symbols land in the fast
    // lane; the upsert follows below.
    for symbol in &symbols {
        let decision = match state.store.get_ticker(symbol).await {
            Ok(row) => route_ticker(row.as_ref(), now),
            Err(err) => {
                tracing::warn!("routing lookup failed for {}: {}", symbol, err);
                RouteDecision::fast(RouteReason::ErrorFallback)
            }
        };
        routes.push(TickerRouteDto::new(symbol.clone(), decision));
        if decision.is_fast() {
            fast_symbols.push(symbol.clone());
        } else {
            bulk_symbols.push(symbol.clone());
        }
    }

    for symbol in &symbols {
        state.store.upsert_ticker(symbol).await?;
    }

    let fast_count = fast_symbols.len() as u32;
    let bulk_count = bulk_symbols.len() as u32;

    let fast_queue = if fast_symbols.is_empty() {
        None
    } else if state.fast_queue.enabled() {
        // The fast lane always runs at elevated priority
        let batch = FastQueueBatch {
            tickers: fast_symbols.clone(),
            priority: priority.max(2),
            force,
        };
        match state.fast_queue.dispatch(&batch).await {
            Ok(()) => Some(FastQueueOutcomeDto {
                dispatched: true,
                tickers: fast_count,
                fallback: false,
            }),
            Err(err) => {
                tracing::warn!("fast queue dispatch failed, falling back: {}", err);
                bulk_symbols.extend(fast_symbols);
                Some(FastQueueOutcomeDto {
                    dispatched: false,
                    tickers: fast_count,
                    fallback: true,
                })
            }
        }
    } else {
        bulk_symbols.extend(fast_symbols);
        Some(FastQueueOutcomeDto {
            dispatched: false,
            tickers: fast_count,
            fallback: true,
        })
    };

    let job = if bulk_symbols.is_empty() {
        None
    } else {
        Some(
            state
                .manager
                .create_dividend_job(bulk_symbols, priority, force)
                .await?,
        )
    };

    Ok(IngestOutcome {
        routes,
        fast_queue,
        job,
        fast_count,
        bulk_count,
    })
}

/// `POST /update-tickers`
pub async fn update_tickers(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateTickersRequest>,
) -> ApiResult<(StatusCode, Json<UpdateTickersResponse>)> {
    state.increment_requests().await;

    if request.tickers.is_empty() {
        return Err(ApiError::validation("tickers must be a non-empty array"));
    }
    if request.tickers.len() > state.config.max_tickers_per_request {
        return Err(ApiError::validation(format!(
            "at most {} tickers per request",
            state.config.max_tickers_per_request
        )));
    }
    let symbols = filter_symbols(&request.tickers);
    if symbols.is_empty() {
        return Err(ApiError::validation(
            "no valid ticker symbols after filtering",
        ));
    }

    let priority = request.priority.unwrap_or(1);
    let force = request.force.unwrap_or(false);
    let fast_mode =
        request.fast.unwrap_or(false) || symbols.len() > state.config.fast_mode_threshold;

    if fast_mode {
        let processing_id = Uuid::new_v4();
        let background = state.clone();
        let count = symbols.len();
        tokio::spawn(async move {
            if let Err(err) = run_ingest(&background, symbols, priority, force).await {
                tracing::error!("background ingest {} failed: {}", processing_id, err);
            }
        });
        return Ok((
            StatusCode::ACCEPTED,
            Json(UpdateTickersResponse {
                message: format!("{} tickers accepted for background processing", count),
                processing_id: Some(processing_id),
                job: None,
                fast_queue: None,
                routes: Vec::new(),
                fast_count: 0,
                bulk_count: 0,
            }),
        ));
    }

    let outcome = run_ingest(&state, symbols, priority, force).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(UpdateTickersResponse {
            message: format!(
                "{} fast, {} bulk",
                outcome.fast_count, outcome.bulk_count
            ),
            processing_id: None,
            job: outcome.job.map(Into::into),
            fast_queue: outcome.fast_queue,
            routes: outcome.routes,
            fast_count: outcome.fast_count,
            bulk_count: outcome.bulk_count,
        }),
    ))
}

/// `POST /process` - synchronous single-ticker refresh.
pub async fn process_single(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProcessRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    state.increment_requests().await;

    let symbol = validate_symbol(&request.ticker)
        .map_err(|err| ApiError::validation(err.to_string()))?;
    let force = request.force.unwrap_or(false);
    let kind = match request.fetch_type.as_deref() {
        None | Some("historical") => FetchKind::Historical,
        Some("recent") => FetchKind::Recent,
        Some(other) => {
            return Err(ApiError::validation(format!(
                "unknown fetchType '{}', expected historical or recent",
                other
            )));
        }
    };

    let ticker = state.store.upsert_ticker(&symbol).await?;
    if !force && !ticker.needs_update(Utc::now()) {
        return Ok(Json(ProcessResponse {
            ticker: symbol,
            skipped: true,
            fetched: 0,
            inserted: 0,
            errors: 0,
            message: "no update needed".to_string(),
        }));
    }

    let records = state.client.fetch_dividends(&symbol, None, kind).await?;
    let summary = state.store.upsert_dividends(&symbol, &records).await?;
    state.store.touch_ticker_update(&symbol, Utc::now()).await?;

    Ok(Json(ProcessResponse {
        ticker: symbol,
        skipped: false,
        fetched: records.len(),
        inserted: summary.inserted,
        errors: summary.errors,
        message: format!("{} records upserted", summary.inserted),
    }))
}

/// `POST /process-queue` - internal trigger for one worker tick.
pub async fn process_queue(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<divd_jobs::TickReport>> {
    let report = state
        .worker
        .tick()
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(report))
}
