//! Health & Stats Handlers

use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::dto::{ComponentHealth, HealthResponse, StatsResponse};
use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /health`
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut components = Vec::new();

    match state.store.stats().await {
        Ok(_) => components.push(ComponentHealth {
            name: "store".to_string(),
            status: "healthy".to_string(),
            message: None,
        }),
        Err(err) => components.push(ComponentHealth {
            name: "store".to_string(),
            status: "unhealthy".to_string(),
            message: Some(err.to_string()),
        }),
    }

    let status = if components.iter().all(|c| c.status == "healthy") {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now(),
        service: state.config.service_name.clone(),
        version: state.config.version.clone(),
        components,
    })
}

/// `GET /stats`
pub async fn get_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatsResponse>> {
    let store = state.store.stats().await?;
    Ok(Json(StatsResponse {
        uptime_secs: state.uptime_secs(),
        requests_handled: state.request_count().await,
        store,
    }))
}
