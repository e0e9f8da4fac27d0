//! Queue Worker
//!
//! One worker drains the job queue in small leased batches, fetching
//! dividend history under the upstream budget and committing results
//! through the store. Per-item failures are persisted on the item and in
//! the job counters; only batch-level store failures surface to the
//! caller.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use divd_core::{JobStatus, QueueItem, RateDecision};
use divd_store::Store;
use divd_upstream::{DividendsClient, FetchError, FetchKind, RateBudgetGate};

use crate::error::WorkerResult;

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity stamped on queue leases
    pub worker_id: String,
    /// Items leased per tick
    pub batch_size: u32,
    /// Soft per-item processing budget; exceeding it fails the item
    pub item_budget_secs: u64,
    /// Pause between items within a batch
    pub courtesy_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4().simple()),
            batch_size: 5,
            item_budget_secs: 30,
            courtesy_delay_ms: 1000,
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TickReport {
    /// Items leased this tick
    pub leased: u32,
    /// Items that fetched and committed new data
    pub processed: u32,
    /// Items that failed (rescheduled or exhausted)
    pub failed: u32,
    /// Items completed without a provider call (freshness check)
    pub skipped: u32,
    /// The tick stopped early on budget exhaustion
    pub rate_limited: bool,
    /// Suggested wait when rate limited
    pub wait_ms: Option<u64>,
}

enum ItemOutcome {
    Processed,
    Skipped,
    Failed,
    /// Stop the batch; the item keeps its lease
    RateLimited {
        wait_ms: u64,
    },
}

/// Queue worker.
pub struct Worker {
    store: Arc<dyn Store>,
    client: Arc<dyn DividendsClient>,
    gate: RateBudgetGate,
    config: WorkerConfig,
}

impl Worker {
    /// Create a worker.
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn DividendsClient>,
        gate: RateBudgetGate,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            client,
            gate,
            config,
        }
    }

    /// Worker identity.
    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    /// Run one tick: admission check, lease, process, finalize drained
    /// jobs.
    pub async fn tick(&self) -> WorkerResult<TickReport> {
        let mut report = TickReport::default();

        // Budget check up front: when the window is exhausted there is no
        // point leasing anything.
        match self.gate.check_and_reserve().await? {
            RateDecision::Admitted => {}
            RateDecision::RateLimited { wait_ms } => {
                tracing::debug!("tick skipped, budget exhausted for {} ms", wait_ms);
                report.rate_limited = true;
                report.wait_ms = Some(wait_ms);
                return Ok(report);
            }
        }

        let items = self
            .store
            .lease_queue_items(self.config.batch_size, &self.config.worker_id)
            .await?;
        report.leased = items.len() as u32;
        if items.is_empty() {
            return Ok(report);
        }

        let mut touched: HashSet<Uuid> = HashSet::new();
        for (index, item) in items.iter().enumerate() {
            if index > 0 && self.config.courtesy_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.courtesy_delay_ms)).await;
            }
            match self.process_item(item, &mut touched).await? {
                ItemOutcome::Processed => report.processed += 1,
                ItemOutcome::Skipped => report.skipped += 1,
                ItemOutcome::Failed => report.failed += 1,
                ItemOutcome::RateLimited { wait_ms } => {
                    // Remaining items keep their leases until the TTL or
                    // the next tick after expiry.
                    report.rate_limited = true;
                    report.wait_ms = Some(wait_ms);
                    break;
                }
            }
        }

        for job_id in touched {
            if let Some(status) = self.store.finalize_job_if_drained(job_id).await? {
                tracing::info!("job {} drained, now {}", job_id, status.as_str());
            }
        }

        Ok(report)
    }

    /// Process one leased item. Store errors on the item's own commit
    /// path fail the item rather than the batch.
    async fn process_item(
        &self,
        item: &QueueItem,
        touched: &mut HashSet<Uuid>,
    ) -> WorkerResult<ItemOutcome> {
        let job = match self.store.get_job(item.job_id).await? {
            Some(job) => job,
            None => {
                // Orphaned item; the owning job is gone.
                tracing::warn!("dropping orphaned queue item {}", item.id);
                self.store.complete_item(item.id).await?;
                return Ok(ItemOutcome::Skipped);
            }
        };

        if job.status.is_terminal() {
            // Cancelled or already finished: clear the item without
            // touching the counters.
            self.store.complete_item(item.id).await?;
            return Ok(ItemOutcome::Skipped);
        }
        touched.insert(job.id);

        if job.status == JobStatus::Pending {
            self.store.mark_job_processing(job.id).await?;
        }

        if !job.force {
            if let Some(ticker) = self.store.get_ticker(&item.ticker_symbol).await? {
                if !ticker.needs_update(Utc::now()) {
                    tracing::debug!("{} is fresh, skipping fetch", item.ticker_symbol);
                    self.store.complete_item(item.id).await?;
                    self.store.advance_job(job.id, 1, 0).await?;
                    return Ok(ItemOutcome::Skipped);
                }
            }
        }

        let fetch = tokio::time::timeout(
            Duration::from_secs(self.config.item_budget_secs),
            self.client
                .fetch_dividends(&item.ticker_symbol, None, FetchKind::Historical),
        )
        .await;

        match fetch {
            Err(_) => {
                self.fail(item, &job.id, "processing budget exceeded").await?;
                Ok(ItemOutcome::Failed)
            }
            Ok(Err(FetchError::RateLimited { wait_ms })) => {
                // Not a failure of this item; it keeps its lease and will
                // be retried once the window opens.
                Ok(ItemOutcome::RateLimited { wait_ms })
            }
            Ok(Err(err)) => {
                self.fail(item, &job.id, &err.to_string()).await?;
                Ok(ItemOutcome::Failed)
            }
            Ok(Ok(records)) => match self.commit(item, &records).await {
                Ok(()) => {
                    self.store.advance_job(job.id, 1, 0).await?;
                    Ok(ItemOutcome::Processed)
                }
                Err(err) => {
                    tracing::warn!("commit failed for {}: {}", item.ticker_symbol, err);
                    self.fail(item, &job.id, &err.to_string()).await?;
                    Ok(ItemOutcome::Failed)
                }
            },
        }
    }

    /// Persist fetched records and retire the item.
    async fn commit(
        &self,
        item: &QueueItem,
        records: &[divd_core::Dividend],
    ) -> Result<(), divd_store::StoreError> {
        let summary = self
            .store
            .upsert_dividends(&item.ticker_symbol, records)
            .await?;
        if summary.errors > 0 {
            tracing::warn!(
                "{}: {} records rejected during upsert",
                item.ticker_symbol,
                summary.errors
            );
        }
        self.store
            .touch_ticker_update(&item.ticker_symbol, Utc::now())
            .await?;
        self.store.complete_item(item.id).await?;
        tracing::info!(
            "{}: upserted {} dividend records",
            item.ticker_symbol,
            summary.inserted
        );
        Ok(())
    }

    async fn fail(&self, item: &QueueItem, job_id: &Uuid, error: &str) -> WorkerResult<()> {
        let outcome = self.store.fail_item(item.id, error).await?;
        // A rescheduled item is still pending work, so the job counter
        // only moves once the retry budget is spent. This keeps
        // processed + failed bounded by total.
        if outcome == divd_store::FailOutcome::Exhausted {
            self.store.advance_job(*job_id, 0, 1).await?;
        }
        tracing::warn!(
            "item {} ({}) failed: {} -> {:?}",
            item.id,
            item.ticker_symbol,
            error,
            outcome
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use divd_core::Dividend;
    use divd_store::{DividendFilter, MemoryStore};
    use divd_upstream::ScriptedClient;
    use rust_decimal::Decimal;

    struct Rig {
        store: Arc<MemoryStore>,
        client: Arc<ScriptedClient>,
        worker: Worker,
    }

    fn rig() -> Rig {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::new());
        let gate = RateBudgetGate::polygon(store.clone());
        let worker = Worker::new(
            store.clone(),
            client.clone(),
            gate,
            WorkerConfig {
                worker_id: "worker-test".to_string(),
                batch_size: 5,
                item_budget_secs: 30,
                courtesy_delay_ms: 0,
            },
        );
        Rig {
            store,
            client,
            worker,
        }
    }

    fn sample_dividend(ticker: &str) -> Dividend {
        Dividend::new(
            ticker,
            NaiveDate::from_ymd_opt(2024, 2, 9).unwrap(),
            Decimal::new(24, 2),
            Utc::now(),
        )
    }

    async fn seed_job(rig: &Rig, symbols: &[&str], force: bool) -> divd_core::Job {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        for symbol in &symbols {
            rig.store.upsert_ticker(symbol).await.unwrap();
        }
        let job = rig
            .store
            .create_job(divd_core::NewJob::dividend_update(symbols.clone(), 1, force))
            .await
            .unwrap();
        rig.store.enqueue(job.id, &symbols, 1).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_successful_item_commits_and_completes_job() {
        let rig = rig();
        let job = seed_job(&rig, &["AAPL"], false).await;
        rig.client
            .push_response(Ok(vec![sample_dividend("AAPL")]))
            .await;

        let report = rig.worker.tick().await.unwrap();
        assert_eq!(report.leased, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 0);

        let rows = rig
            .store
            .dividends_for_ticker("AAPL", &DividendFilter::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let ticker = rig.store.get_ticker("AAPL").await.unwrap().unwrap();
        assert!(ticker.last_dividend_update.is_some());

        let job = rig.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed, 1);
    }

    #[tokio::test]
    async fn test_fresh_ticker_is_skipped_without_provider_call() {
        let rig = rig();
        let job = seed_job(&rig, &["MSFT"], false).await;
        // Updated an hour ago: within the 24h freshness window
        rig.store
            .touch_ticker_update("MSFT", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();

        let report = rig.worker.tick().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 0);
        assert!(rig.client.calls().await.is_empty());

        // Skips count as processed in the job accounting
        let job = rig.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed, 1);
    }

    #[tokio::test]
    async fn test_force_overrides_freshness() {
        let rig = rig();
        seed_job(&rig, &["MSFT"], true).await;
        rig.store
            .touch_ticker_update("MSFT", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        rig.client
            .push_response(Ok(vec![sample_dividend("MSFT")]))
            .await;

        let report = rig.worker.tick().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(rig.client.calls().await, vec!["MSFT"]);
    }

    #[tokio::test]
    async fn test_rate_limit_stops_batch_and_keeps_leases() {
        let rig = rig();
        let job = seed_job(&rig, &["A", "B", "C", "D", "E"], true).await;
        rig.client.push_response(Ok(vec![sample_dividend("A")])).await;
        rig.client
            .push_response(Err(FetchError::RateLimited { wait_ms: 1000 }))
            .await;

        let report = rig.worker.tick().await.unwrap();
        assert_eq!(report.leased, 5);
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 0);
        assert!(report.rate_limited);

        // Item #1 completed; #2-#5 remain, all still leased
        let depth = rig.store.queue_depth(job.id).await.unwrap();
        assert_eq!(depth.remaining, 4);
        assert_eq!(depth.processing, 4);

        let job_row = rig.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job_row.processed, 1);
        assert_eq!(job_row.failed, 0);

        // Only items #1 and #2 reached the client
        assert_eq!(rig.client.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_caps_attempts() {
        let rig = rig();
        let job = seed_job(&rig, &["A"], true).await;
        let item_id = {
            let leased = rig.store.lease_queue_items(1, "probe").await.unwrap();
            let id = leased[0].id;
            rig.store.clear_lease(id).await;
            id
        };

        // max_retries = 3: attempts at retry counts 0,1,2,3, then deletion
        for attempt in 0..4 {
            rig.client
                .push_response(Err(FetchError::Transient("upstream 500".into())))
                .await;
            let report = rig.worker.tick().await.unwrap();
            assert_eq!(report.failed, 1, "attempt {}", attempt);
            rig.store.make_due(item_id).await;
        }

        // Item deleted; a further tick leases nothing and the job failed
        let report = rig.worker.tick().await.unwrap();
        assert_eq!(report.leased, 0);
        assert_eq!(rig.client.calls().await.len(), 4);

        let job = rig.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed, 1);
        assert_eq!(job.processed, 0);
    }

    #[tokio::test]
    async fn test_cancelled_job_items_are_ignored() {
        let rig = rig();
        let job = seed_job(&rig, &["X", "Y", "Z"], false).await;
        rig.store.cancel_job(job.id).await.unwrap();

        let report = rig.worker.tick().await.unwrap();
        assert_eq!(report.leased, 0);
        assert!(rig.client.calls().await.is_empty());

        let job = rig.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.processed, 0);
    }

    #[tokio::test]
    async fn test_tick_respects_budget_gate() {
        let rig = rig();
        seed_job(&rig, &["A"], true).await;
        // Exhaust the 5/minute budget
        let gate = RateBudgetGate::polygon(rig.store.clone());
        for _ in 0..5 {
            gate.check_and_reserve().await.unwrap();
        }

        let report = rig.worker.tick().await.unwrap();
        assert!(report.rate_limited);
        assert_eq!(report.leased, 0);
        assert!(rig.client.calls().await.is_empty());
    }
}
