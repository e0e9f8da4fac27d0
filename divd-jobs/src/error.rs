//! Job Processing Errors

use thiserror::Error;

use divd_store::StoreError;
use divd_upstream::FetchError;

/// Batch-level worker errors.
///
/// Per-item failures never surface here; they are persisted on the queue
/// item and reflected in the job counters.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Store failure outside item processing (lease, finalize)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Budget gate failure
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Fast-queue dispatch errors.
#[derive(Error, Debug, Clone)]
pub enum FastQueueError {
    /// No sink is configured for this deployment
    #[error("Fast queue sink is not configured")]
    Unconfigured,

    /// The sink rejected or never received the batch
    #[error("Fast queue dispatch failed: {0}")]
    Dispatch(String),
}
