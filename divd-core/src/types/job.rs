//! Ingestion Jobs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CALL_SPACING_SECS;

/// Job category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Refresh dividend history for a set of tickers
    DividendUpdate,
    /// Synchronize the tracked ticker universe
    TickerSync,
    /// Prune stale rows
    DataCleanup,
}

impl JobType {
    /// Stable string form used in storage and the API
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DividendUpdate => "dividend_update",
            JobType::TickerSync => "ticker_sync",
            JobType::DataCleanup => "data_cleanup",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dividend_update" => Some(JobType::DividendUpdate),
            "ticker_sync" => Some(JobType::TickerSync),
            "data_cleanup" => Some(JobType::DataCleanup),
            _ => None,
        }
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, no item processed yet
    Pending,
    /// At least one item has been picked up
    Processing,
    /// Queue drained with at least one success
    Completed,
    /// Queue drained with only failures
    Failed,
    /// Cancelled while still pending
    Cancelled,
}

impl JobStatus {
    /// Stable string form used in storage and the API
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Parameters for creating a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub ticker_symbols: Vec<String>,
    pub priority: i32,
    /// Refresh even when the freshness check says no update is needed
    pub force: bool,
    pub metadata: serde_json::Value,
}

impl NewJob {
    /// Create a dividend-update job
    pub fn dividend_update(ticker_symbols: Vec<String>, priority: i32, force: bool) -> Self {
        Self {
            job_type: JobType::DividendUpdate,
            ticker_symbols,
            priority,
            force,
            metadata: serde_json::json!({}),
        }
    }
}

/// A batch of per-ticker work with aggregate progress accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub ticker_symbols: Vec<String>,
    /// Number of queue items created for this job
    pub total: u32,
    /// Items that completed (including freshness skips)
    pub processed: u32,
    /// Items that exhausted their retries
    pub failed: u32,
    pub priority: i32,
    pub force: bool,
    pub created_at: DateTime<Utc>,
    /// Set on the first transition out of `pending`
    pub started_at: Option<DateTime<Utc>>,
    /// Set when a terminal state is reached
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub error_message: Option<String>,
}

impl Job {
    /// Build a pending job from creation parameters.
    pub fn create(new: NewJob, now: DateTime<Utc>) -> Self {
        let total = new.ticker_symbols.len() as u32;
        let estimated_completion =
            now + Duration::seconds((total as i64) * CALL_SPACING_SECS as i64);
        Self {
            id: Uuid::new_v4(),
            job_type: new.job_type,
            status: JobStatus::Pending,
            ticker_symbols: new.ticker_symbols,
            total,
            processed: 0,
            failed: 0,
            priority: new.priority,
            force: new.force,
            created_at: now,
            started_at: None,
            completed_at: None,
            estimated_completion: Some(estimated_completion),
            metadata: new.metadata,
            error_message: None,
        }
    }

    /// Percentage of items accounted for, 0-100.
    pub fn percent_complete(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        ((self.processed + self.failed) * 100 / self.total).min(100)
    }

    /// Whether the job can still accept progress updates.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}
