//! Job Manager
//!
//! Creation, cancellation, and progress reporting for ingestion jobs.
//! The state machine itself lives in the store (`mark_job_processing`,
//! `advance_job`, `finalize_job_if_drained`); this layer composes those
//! operations and renders progress for the API.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use divd_core::{Job, NewJob, CALL_SPACING_SECS};
use divd_store::{JobFilter, QueueDepth, Store, StoreError, StoreResult};

/// Progress snapshot for one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub job: Job,
    /// Queue items still present
    pub remaining: u32,
    /// Subset currently leased by workers
    pub processing: u32,
    pub percent_complete: u32,
    /// Human-readable estimate from `remaining x 12s`
    pub eta: String,
}

/// Render a wait in seconds as `"Ns"` / `"Nm Ss"`.
pub fn format_eta(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// Job orchestration facade over the store.
#[derive(Clone)]
pub struct JobManager {
    store: Arc<dyn Store>,
}

impl JobManager {
    /// Create a manager.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a dividend-update job and enqueue one item per symbol.
    pub async fn create_dividend_job(
        &self,
        symbols: Vec<String>,
        priority: i32,
        force: bool,
    ) -> StoreResult<Job> {
        if symbols.is_empty() {
            return Err(StoreError::Invalid(
                "cannot create a job with no tickers".to_string(),
            ));
        }
        let job = self
            .store
            .create_job(NewJob::dividend_update(symbols.clone(), priority, force))
            .await?;
        self.store.enqueue(job.id, &symbols, priority).await?;
        tracing::info!(
            "created job {} ({} tickers, priority {}, force {})",
            job.id,
            job.total,
            priority,
            force
        );
        Ok(job)
    }

    /// Fetch a job.
    pub async fn get(&self, id: Uuid) -> StoreResult<Option<Job>> {
        self.store.get_job(id).await
    }

    /// List jobs by filter.
    pub async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        self.store.list_jobs(filter).await
    }

    /// Cancel a pending job; conflicts once it has left `pending`.
    pub async fn cancel(&self, id: Uuid) -> StoreResult<Job> {
        let job = self.store.cancel_job(id).await?;
        tracing::info!("cancelled job {}", id);
        Ok(job)
    }

    /// Progress snapshot with queue accounting and an ETA.
    pub async fn progress(&self, id: Uuid) -> StoreResult<JobProgress> {
        let job = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
        let QueueDepth {
            remaining,
            processing,
        } = self.store.queue_depth(id).await?;
        let percent_complete = job.percent_complete();
        let eta = format_eta(remaining as u64 * CALL_SPACING_SECS);
        Ok(JobProgress {
            job,
            remaining,
            processing,
            percent_complete,
            eta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use divd_core::JobStatus;
    use divd_store::MemoryStore;

    fn manager() -> (Arc<MemoryStore>, JobManager) {
        let store = Arc::new(MemoryStore::new());
        let manager = JobManager::new(store.clone());
        (store, manager)
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(0), "0s");
        assert_eq!(format_eta(45), "45s");
        assert_eq!(format_eta(60), "1m 0s");
        assert_eq!(format_eta(156), "2m 36s");
    }

    #[tokio::test]
    async fn test_create_enqueues_one_item_per_symbol() {
        let (store, manager) = manager();
        let job = manager
            .create_dividend_job(vec!["AAPL".into(), "MSFT".into()], 1, false)
            .await
            .unwrap();
        assert_eq!(job.total, 2);
        assert_eq!(store.queue_depth(job.id).await.unwrap().remaining, 2);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_symbol_list() {
        let (_store, manager) = manager();
        assert!(matches!(
            manager.create_dividend_job(vec![], 1, false).await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_progress_reports_queue_and_eta() {
        let (store, manager) = manager();
        let job = manager
            .create_dividend_job(vec!["A".into(), "B".into(), "C".into()], 1, false)
            .await
            .unwrap();

        let progress = manager.progress(job.id).await.unwrap();
        assert_eq!(progress.remaining, 3);
        assert_eq!(progress.processing, 0);
        assert_eq!(progress.percent_complete, 0);
        assert_eq!(progress.eta, "36s");

        // Lease one item and finish another
        let leased = store.lease_queue_items(1, "w").await.unwrap();
        store.complete_item(leased[0].id).await.unwrap();
        store.advance_job(job.id, 1, 0).await.unwrap();

        let progress = manager.progress(job.id).await.unwrap();
        assert_eq!(progress.remaining, 2);
        assert_eq!(progress.percent_complete, 33);
    }

    #[tokio::test]
    async fn test_cancel_conflicts_after_processing_starts() {
        let (store, manager) = manager();
        let job = manager
            .create_dividend_job(vec!["A".into()], 1, false)
            .await
            .unwrap();
        store.mark_job_processing(job.id).await.unwrap();
        assert!(matches!(
            manager.cancel(job.id).await,
            Err(StoreError::Conflict(_))
        ));
        let job = manager.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
    }
}
