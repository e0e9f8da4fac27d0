//! Job Handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use divd_core::{JobStatus, JobType};
use divd_store::{JobFilter, JobSort};

use crate::dto::{CancelJobQuery, JobDto, JobStatusResponse, JobsListResponse, JobsQuery};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Ceiling on job page size
const MAX_PAGE: u32 = 200;

fn parse_filter(query: &JobsQuery) -> ApiResult<JobFilter> {
    let status = match &query.status {
        None => None,
        Some(raw) => Some(
            JobStatus::parse(raw)
                .ok_or_else(|| ApiError::validation(format!("unknown status '{}'", raw)))?,
        ),
    };
    let job_type = match &query.job_type {
        None => None,
        Some(raw) => Some(
            JobType::parse(raw)
                .ok_or_else(|| ApiError::validation(format!("unknown job_type '{}'", raw)))?,
        ),
    };
    let sort = match query.sort.as_deref() {
        None | Some("created_at") => JobSort::CreatedAt,
        Some("priority") => JobSort::Priority,
        Some(other) => {
            return Err(ApiError::validation(format!(
                "unknown sort '{}', expected created_at or priority",
                other
            )));
        }
    };
    let descending = match query.order.as_deref() {
        None | Some("desc") => true,
        Some("asc") => false,
        Some(other) => {
            return Err(ApiError::validation(format!(
                "unknown order '{}', expected asc or desc",
                other
            )));
        }
    };
    Ok(JobFilter {
        status,
        job_type,
        sort,
        descending,
        limit: query.limit.unwrap_or(50).min(MAX_PAGE),
        offset: query.offset.unwrap_or(0),
    })
}

/// `GET /jobs`
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<JobsListResponse>> {
    state.increment_requests().await;
    let filter = parse_filter(&query)?;
    let jobs = state.manager.list(&filter).await?;
    Ok(Json(JobsListResponse {
        count: jobs.len(),
        jobs: jobs.into_iter().map(JobDto::from).collect(),
    }))
}

/// `GET /job-status/{jobId}`
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    state.increment_requests().await;
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|_| ApiError::validation("jobId must be a UUID"))?;
    let progress = state.manager.progress(job_id).await?;
    Ok(Json(JobStatusResponse {
        job: progress.job.into(),
        remaining: progress.remaining,
        processing: progress.processing,
        percent_complete: progress.percent_complete,
        eta: progress.eta,
    }))
}

/// `DELETE /jobs?jobId={id}`
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CancelJobQuery>,
) -> ApiResult<Json<JobDto>> {
    state.increment_requests().await;
    let job_id = query
        .job_id
        .ok_or_else(|| ApiError::validation("jobId query parameter is required"))?;
    let job = state.manager.cancel(job_id).await?;
    Ok(Json(job.into()))
}
