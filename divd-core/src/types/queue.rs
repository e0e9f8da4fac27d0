//! Queue Items

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default retry budget per item
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Lease TTL after which another worker may re-lease an item
pub const LEASE_TTL_MINUTES: i64 = 5;

/// One unit of per-ticker work owned by a job.
///
/// Items are deleted on success; on failure they are either deleted
/// (retries exhausted) or rescheduled with backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub job_id: Uuid,
    pub ticker_symbol: String,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Earliest dispatch time
    pub scheduled_at: DateTime<Utc>,
    /// Lease stamp; cleared on reschedule
    pub locked_at: Option<DateTime<Utc>>,
    /// Worker holding the lease
    pub locked_by: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    /// Create a dispatchable item for a job.
    pub fn new(
        job_id: Uuid,
        ticker_symbol: impl Into<String>,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            ticker_symbol: ticker_symbol.into(),
            priority,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            scheduled_at: now,
            locked_at: None,
            locked_by: None,
            error_message: None,
            created_at: now,
        }
    }

    /// Whether the item is visible to `lease_queue_items` at `now`.
    ///
    /// Visible means due, and either unlocked or holding an expired lease.
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        if self.scheduled_at > now {
            return false;
        }
        match self.locked_at {
            None => true,
            Some(locked) => now - locked > Duration::minutes(LEASE_TTL_MINUTES),
        }
    }

    /// Whether one more failure would exhaust the retry budget.
    pub fn retries_exhausted_by_next_failure(&self) -> bool {
        self.retry_count + 1 > self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_item_is_visible() {
        let now = Utc::now();
        let item = QueueItem::new(Uuid::new_v4(), "AAPL", 1, now);
        assert!(item.is_visible(now));
    }

    #[test]
    fn test_future_item_is_hidden() {
        let now = Utc::now();
        let mut item = QueueItem::new(Uuid::new_v4(), "AAPL", 1, now);
        item.scheduled_at = now + Duration::minutes(2);
        assert!(!item.is_visible(now));
    }

    #[test]
    fn test_lease_hides_until_ttl() {
        let now = Utc::now();
        let mut item = QueueItem::new(Uuid::new_v4(), "AAPL", 1, now);
        item.locked_at = Some(now - Duration::minutes(1));
        item.locked_by = Some("worker-1".to_string());
        assert!(!item.is_visible(now));

        item.locked_at = Some(now - Duration::minutes(LEASE_TTL_MINUTES + 1));
        assert!(item.is_visible(now));
    }

    #[test]
    fn test_retry_budget_accounting() {
        let now = Utc::now();
        let mut item = QueueItem::new(Uuid::new_v4(), "AAPL", 1, now);
        assert!(!item.retries_exhausted_by_next_failure());
        item.retry_count = DEFAULT_MAX_RETRIES;
        assert!(item.retries_exhausted_by_next_failure());
    }
}
