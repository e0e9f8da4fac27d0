//! In-Memory Store
//!
//! Map-backed implementation of the [`Store`] trait used by tests and
//! development. All operations take a single state lock, which makes the
//! lease and rate-budget read-modify-writes trivially atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use divd_core::{
    queue_backoff, ApiUser, CallLog, Dividend, Job, JobStatus, NewJob, QueueItem, RateBudget,
    RateDecision, RateLimits, Subscription, SubscriptionActivity, Ticker,
};

use crate::error::{StoreError, StoreResult};
use crate::{
    DividendFilter, FailOutcome, JobFilter, JobSort, QueueDepth, Store, StoreStats, UpsertSummary,
};

#[derive(Default)]
struct MemoryState {
    tickers: HashMap<String, Ticker>,
    dividends: HashMap<(String, NaiveDate), Dividend>,
    jobs: HashMap<Uuid, Job>,
    queue: HashMap<Uuid, QueueItem>,
    budgets: HashMap<String, RateBudget>,
    call_logs: Vec<CallLog>,
    users: HashMap<Uuid, ApiUser>,
    subscriptions: HashMap<(Uuid, String), Subscription>,
    activity: Vec<SubscriptionActivity>,
}

/// Map-backed store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the lease on a queue item, making it immediately visible.
    ///
    /// Operational/test helper standing in for lease-TTL expiry.
    pub async fn clear_lease(&self, id: Uuid) {
        let mut state = self.state.write().await;
        if let Some(item) = state.queue.get_mut(&id) {
            item.locked_at = None;
            item.locked_by = None;
        }
    }

    /// Pull a rescheduled item's dispatch time back to now, making it
    /// immediately visible. Stands in for waiting out a retry backoff.
    pub async fn make_due(&self, id: Uuid) {
        let mut state = self.state.write().await;
        if let Some(item) = state.queue.get_mut(&id) {
            item.scheduled_at = Utc::now();
        }
    }

    /// Number of subscription activity entries (test support).
    pub async fn activity_count(&self) -> usize {
        self.state.read().await.activity.len()
    }
}

fn apply_paging<T>(mut rows: Vec<T>, filter: &DividendFilter) -> Vec<T> {
    let offset = filter.offset.unwrap_or(0) as usize;
    if offset >= rows.len() {
        return Vec::new();
    }
    rows.drain(..offset);
    if let Some(limit) = filter.limit {
        rows.truncate(limit as usize);
    }
    rows
}

fn dividend_in_window(d: &Dividend, filter: &DividendFilter) -> bool {
    if let Some(start) = filter.start_date {
        if d.ex_dividend_date < start {
            return false;
        }
    }
    if let Some(end) = filter.end_date {
        if d.ex_dividend_date > end {
            return false;
        }
    }
    true
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_ticker(&self, symbol: &str) -> StoreResult<Ticker> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let ticker = state
            .tickers
            .entry(symbol.to_string())
            .or_insert_with(|| Ticker::new(symbol, now));
        ticker.is_active = true;
        Ok(ticker.clone())
    }

    async fn get_ticker(&self, symbol: &str) -> StoreResult<Option<Ticker>> {
        Ok(self.state.read().await.tickers.get(symbol).cloned())
    }

    async fn touch_ticker_update(&self, symbol: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let ticker = state
            .tickers
            .get_mut(symbol)
            .ok_or_else(|| StoreError::NotFound(format!("ticker {}", symbol)))?;
        if ticker.last_dividend_update.map_or(true, |prev| at > prev) {
            ticker.last_dividend_update = Some(at);
        }
        Ok(())
    }

    async fn upsert_dividends(
        &self,
        ticker: &str,
        records: &[Dividend],
    ) -> StoreResult<UpsertSummary> {
        let mut summary = UpsertSummary::default();
        let mut state = self.state.write().await;
        let now = Utc::now();
        for record in records {
            if let Err(err) = record.validate() {
                summary.errors += 1;
                summary.error_messages.push(err.to_string());
                continue;
            }
            let key = (ticker.to_string(), record.ex_dividend_date);
            let mut row = record.clone();
            row.ticker = ticker.to_string();
            row.updated_at = now;
            if let Some(existing) = state.dividends.get(&key) {
                row.created_at = existing.created_at;
            }
            state.dividends.insert(key, row);
            summary.inserted += 1;
        }
        Ok(summary)
    }

    async fn dividends_for_ticker(
        &self,
        ticker: &str,
        filter: &DividendFilter,
    ) -> StoreResult<Vec<Dividend>> {
        let state = self.state.read().await;
        let mut rows: Vec<Dividend> = state
            .dividends
            .values()
            .filter(|d| d.ticker == ticker && dividend_in_window(d, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.ex_dividend_date.cmp(&a.ex_dividend_date));
        Ok(apply_paging(rows, filter))
    }

    async fn dividends_for_tickers(
        &self,
        tickers: &[String],
        filter: &DividendFilter,
    ) -> StoreResult<Vec<Dividend>> {
        let state = self.state.read().await;
        let mut rows: Vec<Dividend> = state
            .dividends
            .values()
            .filter(|d| tickers.contains(&d.ticker) && dividend_in_window(d, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.ticker, b.ex_dividend_date).cmp(&(&b.ticker, a.ex_dividend_date))
        });
        Ok(apply_paging(rows, filter))
    }

    async fn dividends_all(&self, filter: &DividendFilter) -> StoreResult<Vec<Dividend>> {
        let state = self.state.read().await;
        let mut rows: Vec<Dividend> = state
            .dividends
            .values()
            .filter(|d| dividend_in_window(d, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.ticker, b.ex_dividend_date).cmp(&(&b.ticker, a.ex_dividend_date))
        });
        Ok(apply_paging(rows, filter))
    }

    async fn create_job(&self, new: NewJob) -> StoreResult<Job> {
        let job = Job::create(new, Utc::now());
        let mut state = self.state.write().await;
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let state = self.state.read().await;
        let mut rows: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| filter.job_type.map_or(true, |t| j.job_type == t))
            .cloned()
            .collect();
        match filter.sort {
            JobSort::CreatedAt => rows.sort_by_key(|j| j.created_at),
            JobSort::Priority => rows.sort_by_key(|j| j.priority),
        }
        if filter.descending {
            rows.reverse();
        }
        let offset = filter.offset as usize;
        let rows = if offset >= rows.len() {
            Vec::new()
        } else {
            rows.into_iter()
                .skip(offset)
                .take(filter.limit as usize)
                .collect()
        };
        Ok(rows)
    }

    async fn mark_job_processing(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn advance_job(&self, id: Uuid, d_processed: u32, d_failed: u32) -> StoreResult<Job> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
        if job.is_open() {
            job.processed += d_processed;
            job.failed += d_failed;
        }
        Ok(job.clone())
    }

    async fn finalize_job_if_drained(&self, id: Uuid) -> StoreResult<Option<JobStatus>> {
        let mut state = self.state.write().await;
        let drained = !state.queue.values().any(|item| item.job_id == id);
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
        if job.status != JobStatus::Processing || !drained {
            return Ok(None);
        }
        let status = if job.processed > 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        job.status = status;
        job.completed_at = Some(Utc::now());
        Ok(Some(status))
    }

    async fn cancel_job(&self, id: Uuid) -> StoreResult<Job> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
        if job.status != JobStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "job {} is {} and cannot be cancelled",
                id,
                job.status.as_str()
            )));
        }
        job.status = JobStatus::Cancelled;
        job.error_message = Some("Job cancelled by user".to_string());
        job.completed_at = Some(Utc::now());
        let cancelled = job.clone();
        state.queue.retain(|_, item| item.job_id != id);
        Ok(cancelled)
    }

    async fn enqueue(&self, job_id: Uuid, symbols: &[String], priority: i32) -> StoreResult<u32> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&job_id) {
            return Err(StoreError::NotFound(format!("job {}", job_id)));
        }
        let now = Utc::now();
        for symbol in symbols {
            let item = QueueItem::new(job_id, symbol.clone(), priority, now);
            state.queue.insert(item.id, item);
        }
        Ok(symbols.len() as u32)
    }

    async fn lease_queue_items(&self, limit: u32, worker_id: &str) -> StoreResult<Vec<QueueItem>> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut visible: Vec<Uuid> = state
            .queue
            .values()
            .filter(|item| item.is_visible(now))
            .map(|item| item.id)
            .collect();
        visible.sort_by(|a, b| {
            let ia = &state.queue[a];
            let ib = &state.queue[b];
            ib.priority
                .cmp(&ia.priority)
                .then(ia.scheduled_at.cmp(&ib.scheduled_at))
        });
        visible.truncate(limit as usize);

        let mut leased = Vec::with_capacity(visible.len());
        for id in visible {
            let item = state.queue.get_mut(&id).expect("visible item present");
            item.locked_at = Some(now);
            item.locked_by = Some(worker_id.to_string());
            leased.push(item.clone());
        }
        Ok(leased)
    }

    async fn complete_item(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.queue.remove(&id);
        Ok(())
    }

    async fn fail_item(&self, id: Uuid, error: &str) -> StoreResult<FailOutcome> {
        let mut state = self.state.write().await;
        let item = state
            .queue
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("queue item {}", id)))?;
        if item.retries_exhausted_by_next_failure() {
            state.queue.remove(&id);
            return Ok(FailOutcome::Exhausted);
        }
        item.retry_count += 1;
        item.error_message = Some(error.to_string());
        let backoff = queue_backoff(item.retry_count);
        item.scheduled_at = Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default();
        item.locked_at = None;
        item.locked_by = None;
        Ok(FailOutcome::Retried {
            retry_count: item.retry_count,
            next_attempt_at: item.scheduled_at,
        })
    }

    async fn queue_depth(&self, job_id: Uuid) -> StoreResult<QueueDepth> {
        let state = self.state.read().await;
        let mut depth = QueueDepth::default();
        for item in state.queue.values().filter(|i| i.job_id == job_id) {
            depth.remaining += 1;
            if item.locked_at.is_some() {
                depth.processing += 1;
            }
        }
        Ok(depth)
    }

    async fn check_and_reserve(
        &self,
        service: &str,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> StoreResult<RateDecision> {
        let mut state = self.state.write().await;
        let budget = state
            .budgets
            .entry(service.to_string())
            .or_insert_with(|| RateBudget::new(service, now));
        Ok(budget.check_and_reserve(limits, now))
    }

    async fn time_until_next_call(
        &self,
        service: &str,
        limits: &RateLimits,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .budgets
            .get(service)
            .map(|b| b.time_until_next_call(limits, now))
            .unwrap_or(0))
    }

    async fn record_call(&self, log: &CallLog) -> StoreResult<()> {
        self.state.write().await.call_logs.push(log.clone());
        Ok(())
    }

    async fn recent_calls(&self, service: &str, since: DateTime<Utc>) -> StoreResult<Vec<CallLog>> {
        let state = self.state.read().await;
        let mut rows: Vec<CallLog> = state
            .call_logs
            .iter()
            .filter(|log| log.service_name == service && log.created_at >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|log| log.created_at);
        Ok(rows)
    }

    async fn get_user_by_key(&self, api_key: &str) -> StoreResult<Option<ApiUser>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.api_key == api_key && u.is_active)
            .cloned())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<ApiUser>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn upsert_user(&self, user: &ApiUser) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let key_taken = state
            .users
            .values()
            .any(|u| u.api_key == user.api_key && u.id != user.id);
        if key_taken {
            return Err(StoreError::Conflict(format!(
                "API key already registered: {}",
                user.api_key
            )));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn subscribe(
        &self,
        user_id: Uuid,
        ticker: &str,
        priority: i32,
    ) -> StoreResult<Subscription> {
        let mut state = self.state.write().await;
        let max = state
            .users
            .get(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?
            .max_subscriptions;

        let key = (user_id, ticker.to_string());
        if let Some(existing) = state.subscriptions.get_mut(&key) {
            existing.priority = priority.clamp(1, 2);
            return Ok(existing.clone());
        }

        let current = state
            .subscriptions
            .keys()
            .filter(|(uid, _)| *uid == user_id)
            .count() as u32;
        if current >= max {
            return Err(StoreError::Conflict(format!(
                "Subscription limit reached, limit={}, current={}",
                max, current
            )));
        }

        let subscription = Subscription::new(user_id, ticker, priority, Utc::now());
        state.subscriptions.insert(key, subscription.clone());
        Ok(subscription)
    }

    async fn unsubscribe(&self, user_id: Uuid, ticker: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .subscriptions
            .remove(&(user_id, ticker.to_string()))
            .map(|_| ())
            .ok_or_else(|| {
                StoreError::NotFound(format!("subscription {} for user {}", ticker, user_id))
            })
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> StoreResult<Vec<Subscription>> {
        let state = self.state.read().await;
        let mut rows: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.subscribed_at.cmp(&a.subscribed_at));
        Ok(rows)
    }

    async fn log_subscription_activity(
        &self,
        activity: &SubscriptionActivity,
    ) -> StoreResult<()> {
        self.state.write().await.activity.push(activity.clone());
        Ok(())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let state = self.state.read().await;
        Ok(StoreStats {
            tickers: state.tickers.len() as u64,
            dividends: state.dividends.len() as u64,
            jobs_pending: state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .count() as u64,
            jobs_processing: state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Processing)
                .count() as u64,
            queue_items: state.queue.len() as u64,
        })
    }
}
