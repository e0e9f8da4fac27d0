//! Rate Budget Gate
//!
//! Admission front-end over the store-held budget counters. Call logging
//! goes through here too, so bookkeeping failures never affect admission
//! decisions.

use std::sync::Arc;

use chrono::Utc;

use divd_core::{CallLog, RateDecision, RateLimits};
use divd_store::Store;

use crate::config::POLYGON_SERVICE;
use crate::error::FetchResult;

/// Admission control for one named upstream service.
#[derive(Clone)]
pub struct RateBudgetGate {
    store: Arc<dyn Store>,
    service: String,
    limits: RateLimits,
}

impl RateBudgetGate {
    /// Gate for an arbitrary service.
    pub fn new(store: Arc<dyn Store>, service: impl Into<String>, limits: RateLimits) -> Self {
        Self {
            store,
            service: service.into(),
            limits,
        }
    }

    /// Gate for the dividend provider (5 calls/minute).
    pub fn polygon(store: Arc<dyn Store>) -> Self {
        Self::new(store, POLYGON_SERVICE, RateLimits::polygon())
    }

    /// Service name this gate guards.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Reserve one call if the budget allows it.
    pub async fn check_and_reserve(&self) -> FetchResult<RateDecision> {
        Ok(self
            .store
            .check_and_reserve(&self.service, &self.limits, Utc::now())
            .await?)
    }

    /// Estimated wait before the next admissible call. Store failures
    /// report zero rather than blocking the caller.
    pub async fn time_until_next_call(&self) -> u64 {
        match self
            .store
            .time_until_next_call(&self.service, &self.limits, Utc::now())
            .await
        {
            Ok(wait_ms) => wait_ms,
            Err(err) => {
                tracing::warn!("budget estimate failed for {}: {}", self.service, err);
                0
            }
        }
    }

    /// Append a call log. Never fails: logging problems are reported at
    /// `warn` and swallowed so they cannot mask the call outcome.
    pub async fn record_call(&self, log: CallLog) {
        if let Err(err) = self.store.record_call(&log).await {
            tracing::warn!(
                "failed to record call log for {} {}: {}",
                log.service_name,
                log.endpoint,
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use divd_store::MemoryStore;

    #[tokio::test]
    async fn test_gate_enforces_minute_budget() {
        let store = Arc::new(MemoryStore::new());
        let gate = RateBudgetGate::polygon(store);

        for _ in 0..5 {
            assert!(gate.check_and_reserve().await.unwrap().is_admitted());
        }
        let decision = gate.check_and_reserve().await.unwrap();
        assert!(!decision.is_admitted());
        assert!(gate.time_until_next_call().await > 0);
    }

    #[tokio::test]
    async fn test_record_call_is_infallible() {
        let store = Arc::new(MemoryStore::new());
        let gate = RateBudgetGate::polygon(store.clone());
        gate.record_call(CallLog::new(
            POLYGON_SERVICE,
            "/v3/reference/dividends",
            200,
            120,
            Utc::now(),
        ))
        .await;
        let since = Utc::now() - chrono::Duration::minutes(1);
        assert_eq!(
            store.recent_calls(POLYGON_SERVICE, since).await.unwrap().len(),
            1
        );
    }
}
