//! Divd Store - Store Gateway
//!
//! Strongly-typed access to the relational store for tickers, dividends,
//! jobs, queue items, rate budgets, call logs, API users, and
//! subscriptions.
//!
//! Two backends implement the [`Store`] trait:
//!
//! - [`MemoryStore`] - in-process maps, used by tests and development
//! - [`SqliteStore`] - sqlx-backed SQLite with WAL journaling
//!
//! All upserts are keyed by natural keys (`symbol`, `(ticker,
//! ex_dividend_date)`, `(user, ticker)`), so repeated ingestion converges
//! without coordination.

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use divd_core::{
    ApiUser, CallLog, Dividend, Job, JobStatus, JobType, NewJob, QueueItem, RateDecision,
    RateLimits, Subscription, SubscriptionActivity, Ticker,
};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use schema::DIVD_SCHEMA;
pub use sqlite::SqliteStore;

/// Result summary of a bulk dividend upsert.
///
/// Record-level validation failures are collected, not raised; the batch
/// as a whole either commits or fails.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UpsertSummary {
    pub inserted: u32,
    pub errors: u32,
    pub error_messages: Vec<String>,
}

/// Date-window and paging filter for dividend queries.
#[derive(Debug, Clone, Default)]
pub struct DividendFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Sortable job columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSort {
    CreatedAt,
    Priority,
}

/// Filter and ordering for job listings.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub sort: JobSort,
    pub descending: bool,
    pub limit: u32,
    pub offset: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            job_type: None,
            sort: JobSort::CreatedAt,
            descending: true,
            limit: 50,
            offset: 0,
        }
    }
}

/// Outcome of failing a queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled with backoff
    Retried {
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retry budget exhausted; the item was deleted
    Exhausted,
}

/// Queue accounting for one job.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueDepth {
    /// Items still present for the job
    pub remaining: u32,
    /// Subset currently holding a lease
    pub processing: u32,
}

/// Aggregate row counts for health/stats reporting.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StoreStats {
    pub tickers: u64,
    pub dividends: u64,
    pub jobs_pending: u64,
    pub jobs_processing: u64,
    pub queue_items: u64,
}

/// Store gateway interface.
///
/// Lease and rate-budget operations are atomic against concurrent callers
/// within one process; across processes the SQLite backend serializes on
/// its single write connection.
#[async_trait]
pub trait Store: Send + Sync {
    // ==================== Tickers ====================

    /// Idempotently create a ticker, activating it when new.
    async fn upsert_ticker(&self, symbol: &str) -> StoreResult<Ticker>;

    /// Fetch a ticker row.
    async fn get_ticker(&self, symbol: &str) -> StoreResult<Option<Ticker>>;

    /// Advance `last_dividend_update`; earlier timestamps are ignored.
    async fn touch_ticker_update(&self, symbol: &str, at: DateTime<Utc>) -> StoreResult<()>;

    // ==================== Dividends ====================

    /// Transactionally upsert a batch keyed by `(ticker, ex_dividend_date)`.
    ///
    /// Records failing validation are skipped and reported in the summary.
    async fn upsert_dividends(
        &self,
        ticker: &str,
        records: &[Dividend],
    ) -> StoreResult<UpsertSummary>;

    /// Dividends for one ticker, newest ex-date first.
    async fn dividends_for_ticker(
        &self,
        ticker: &str,
        filter: &DividendFilter,
    ) -> StoreResult<Vec<Dividend>>;

    /// Dividends across a set of tickers, newest ex-date first.
    async fn dividends_for_tickers(
        &self,
        tickers: &[String],
        filter: &DividendFilter,
    ) -> StoreResult<Vec<Dividend>>;

    /// All dividends, newest ex-date first.
    async fn dividends_all(&self, filter: &DividendFilter) -> StoreResult<Vec<Dividend>>;

    // ==================== Jobs ====================

    /// Create a pending job. `total` is set from the symbol count and the
    /// completion estimate from the upstream call spacing.
    async fn create_job(&self, new: NewJob) -> StoreResult<Job>;

    /// Fetch a job.
    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>>;

    /// List jobs by filter.
    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>>;

    /// Transition a pending job to processing, stamping `started_at`.
    /// No-op for jobs already processing; terminal jobs are untouched.
    async fn mark_job_processing(&self, id: Uuid) -> StoreResult<()>;

    /// Atomically add progress deltas. Terminal jobs ignore the update.
    async fn advance_job(&self, id: Uuid, d_processed: u32, d_failed: u32) -> StoreResult<Job>;

    /// If the job is processing and its queue is empty, transition it to
    /// `completed` (any success) or `failed` (only failures). Returns the
    /// new status when a transition happened.
    async fn finalize_job_if_drained(&self, id: Uuid) -> StoreResult<Option<JobStatus>>;

    /// Cancel a pending job and delete its queue items.
    ///
    /// Fails with `Conflict` when the job has left `pending`.
    async fn cancel_job(&self, id: Uuid) -> StoreResult<Job>;

    // ==================== Queue ====================

    /// Insert one queue item per symbol for the job.
    async fn enqueue(&self, job_id: Uuid, symbols: &[String], priority: i32) -> StoreResult<u32>;

    /// Atomically lease up to `limit` visible items for `worker_id`,
    /// ordered `priority DESC, scheduled_at ASC`.
    async fn lease_queue_items(&self, limit: u32, worker_id: &str) -> StoreResult<Vec<QueueItem>>;

    /// Delete a queue item after successful processing.
    async fn complete_item(&self, id: Uuid) -> StoreResult<()>;

    /// Record a failure: delete when retries are exhausted, otherwise
    /// reschedule with exponential backoff and clear the lease.
    async fn fail_item(&self, id: Uuid, error: &str) -> StoreResult<FailOutcome>;

    /// Queue accounting for one job.
    async fn queue_depth(&self, job_id: Uuid) -> StoreResult<QueueDepth>;

    // ==================== Rate budget & call logs ====================

    /// Atomic admission check against the service budget, reserving one
    /// call when under the limits.
    async fn check_and_reserve(
        &self,
        service: &str,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> StoreResult<RateDecision>;

    /// Read-only estimate of the wait before the next admissible call.
    async fn time_until_next_call(
        &self,
        service: &str,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Append a call-log row.
    async fn record_call(&self, log: &CallLog) -> StoreResult<()>;

    /// Call logs for a service since a timestamp, oldest first.
    async fn recent_calls(&self, service: &str, since: DateTime<Utc>) -> StoreResult<Vec<CallLog>>;

    // ==================== API users ====================

    /// Look up an active user by API key. Inactive users resolve to
    /// `None`, indistinguishable from unknown keys.
    async fn get_user_by_key(&self, api_key: &str) -> StoreResult<Option<ApiUser>>;

    /// Fetch a user by id.
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<ApiUser>>;

    /// Create or replace a user row (key collisions are `Conflict`).
    async fn upsert_user(&self, user: &ApiUser) -> StoreResult<()>;

    // ==================== Subscriptions ====================

    /// Create or update a `(user, ticker)` subscription, enforcing the
    /// user's `max_subscriptions` cap on creation.
    async fn subscribe(
        &self,
        user_id: Uuid,
        ticker: &str,
        priority: i32,
    ) -> StoreResult<Subscription>;

    /// Remove a subscription; `NotFound` when absent.
    async fn unsubscribe(&self, user_id: Uuid, ticker: &str) -> StoreResult<()>;

    /// All subscriptions for a user, most recent first.
    async fn list_subscriptions(&self, user_id: Uuid) -> StoreResult<Vec<Subscription>>;

    /// Append a subscription activity-log entry.
    async fn log_subscription_activity(
        &self,
        activity: &SubscriptionActivity,
    ) -> StoreResult<()>;

    // ==================== Stats ====================

    /// Aggregate counts for health/stats reporting.
    async fn stats(&self) -> StoreResult<StoreStats>;
}
