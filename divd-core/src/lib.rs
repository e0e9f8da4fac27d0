//! Divd Core - Domain Model
//!
//! Shared domain types for the dividend ingestion service:
//!
//! - Tickers, dividend records, and their natural-key semantics
//! - Ingestion jobs and their queue items
//! - API users and subscriptions
//! - Rate budgets and upstream call logs
//! - The routing oracle that picks the ingestion lane for a ticker
//!
//! This crate is deliberately free of I/O. Storage, HTTP, and scheduling
//! live in the `divd-store`, `divd-upstream`, `divd-jobs`, and `divd-api`
//! crates, all of which consume these types.

pub mod error;
pub mod retry;
pub mod routing;
pub mod types;
pub mod validate;

// Re-export main types
pub use error::{CoreError, CoreResult};
pub use retry::queue_backoff;
pub use routing::{route_ticker, RouteDecision, RouteLane, RouteReason};
pub use types::call_log::CallLog;
pub use types::dividend::Dividend;
pub use types::job::{Job, JobStatus, JobType, NewJob};
pub use types::queue::QueueItem;
pub use types::rate::{RateBudget, RateDecision, RateLimits};
pub use types::subscription::{Subscription, SubscriptionActivity};
pub use types::ticker::Ticker;
pub use types::user::{ApiUser, PlanType};
pub use validate::{filter_symbols, normalize_symbol, validate_api_key, validate_symbol};

/// Seconds of upstream spacing implied by the 5 calls/minute budget.
///
/// Used both for inter-page sleeps on bulk scans and for job ETA
/// estimates (`remaining x 12s`).
pub const CALL_SPACING_SECS: u64 = 12;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_spacing_matches_minute_budget() {
        assert_eq!(CALL_SPACING_SECS, 60 / 5);
    }
}
