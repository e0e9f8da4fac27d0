//! Routing Oracle
//!
//! Decides which ingestion lane a ticker takes: immediate historical
//! backfill on the fast queue, or deferred refresh on the standard job
//! queue. The decision is a pure function of the ticker row and `now`,
//! consulted *before* the ticker upsert so a newly submitted symbol still
//! routes as new.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ticker::Ticker;

/// Ingestion lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteLane {
    /// Immediate historical backfill
    FastQueue,
    /// Standard job queue refresh
    Bulk,
}

/// Why a lane was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    NewTicker,
    RecentlyCreated,
    NoDividendData,
    RecentExisting,
    StaleExisting,
    /// Store lookup failed; fall back to the conservative lane
    ErrorFallback,
}

impl RouteReason {
    /// Stable string form for API payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteReason::NewTicker => "new_ticker",
            RouteReason::RecentlyCreated => "recently_created",
            RouteReason::NoDividendData => "no_dividend_data",
            RouteReason::RecentExisting => "recent_existing",
            RouteReason::StaleExisting => "stale_existing",
            RouteReason::ErrorFallback => "error_fallback",
        }
    }
}

/// A lane with its justification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub lane: RouteLane,
    pub reason: RouteReason,
}

impl RouteDecision {
    pub fn fast(reason: RouteReason) -> Self {
        Self {
            lane: RouteLane::FastQueue,
            reason,
        }
    }

    pub fn bulk(reason: RouteReason) -> Self {
        Self {
            lane: RouteLane::Bulk,
            reason,
        }
    }

    pub fn is_fast(&self) -> bool {
        self.lane == RouteLane::FastQueue
    }
}

/// Route a ticker given its current row (if any).
///
/// Callers that hit a store error looking the row up should use
/// [`RouteDecision::fast`] with [`RouteReason::ErrorFallback`].
pub fn route_ticker(ticker: Option<&Ticker>, now: DateTime<Utc>) -> RouteDecision {
    match ticker {
        None => RouteDecision::fast(RouteReason::NewTicker),
        Some(t) => match t.last_dividend_update {
            None => {
                if t.recently_created(now) {
                    RouteDecision::fast(RouteReason::RecentlyCreated)
                } else {
                    RouteDecision::fast(RouteReason::NoDividendData)
                }
            }
            Some(_) => {
                if t.needs_update(now) {
                    RouteDecision::bulk(RouteReason::StaleExisting)
                } else {
                    RouteDecision::bulk(RouteReason::RecentExisting)
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_missing_ticker_routes_fast() {
        let decision = route_ticker(None, Utc::now());
        assert_eq!(decision.lane, RouteLane::FastQueue);
        assert_eq!(decision.reason, RouteReason::NewTicker);
    }

    #[test]
    fn test_recently_created_without_data_routes_fast() {
        let now = Utc::now();
        let ticker = Ticker::new("AAPL", now - Duration::minutes(30));
        let decision = route_ticker(Some(&ticker), now);
        assert_eq!(decision.reason, RouteReason::RecentlyCreated);
        assert!(decision.is_fast());
    }

    #[test]
    fn test_old_ticker_without_data_routes_fast() {
        let now = Utc::now();
        let ticker = Ticker::new("AAPL", now - Duration::hours(2));
        let decision = route_ticker(Some(&ticker), now);
        assert_eq!(decision.reason, RouteReason::NoDividendData);
        assert!(decision.is_fast());
    }

    #[test]
    fn test_fresh_ticker_routes_bulk() {
        let now = Utc::now();
        let mut ticker = Ticker::new("MSFT", now - Duration::days(10));
        ticker.last_dividend_update = Some(now - Duration::hours(1));
        let decision = route_ticker(Some(&ticker), now);
        assert_eq!(decision.lane, RouteLane::Bulk);
        assert_eq!(decision.reason, RouteReason::RecentExisting);
    }

    #[test]
    fn test_stale_ticker_routes_bulk() {
        let now = Utc::now();
        let mut ticker = Ticker::new("MSFT", now - Duration::days(10));
        ticker.last_dividend_update = Some(now - Duration::hours(48));
        let decision = route_ticker(Some(&ticker), now);
        assert_eq!(decision.lane, RouteLane::Bulk);
        assert_eq!(decision.reason, RouteReason::StaleExisting);
    }

    #[test]
    fn test_routing_is_deterministic() {
        let now = Utc::now();
        let mut ticker = Ticker::new("MSFT", now - Duration::days(10));
        ticker.last_dividend_update = Some(now - Duration::hours(48));
        let first = route_ticker(Some(&ticker), now);
        for _ in 0..10 {
            assert_eq!(route_ticker(Some(&ticker), now), first);
        }
    }
}
