//! Upstream Call Logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only record of one upstream call attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLog {
    pub id: Uuid,
    pub service_name: String,
    pub endpoint: String,
    pub ticker_symbol: Option<String>,
    /// HTTP status, or 0 when the request never completed
    pub response_status: u16,
    pub response_time_ms: u64,
    /// Remaining quota as reported by the provider, when present
    pub rate_limit_remaining: Option<i64>,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CallLog {
    /// Create a log entry for one attempt.
    pub fn new(
        service_name: impl Into<String>,
        endpoint: impl Into<String>,
        response_status: u16,
        response_time_ms: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            ticker_symbol: None,
            response_status,
            response_time_ms,
            rate_limit_remaining: None,
            error_message: None,
            metadata: serde_json::json!({}),
            created_at: now,
        }
    }

    /// Attach the ticker the call was made for.
    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker_symbol = Some(ticker.into());
        self
    }

    /// Attach an error message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Attach the provider-reported remaining quota.
    pub fn with_remaining(mut self, remaining: i64) -> Self {
        self.rate_limit_remaining = Some(remaining);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let log = CallLog::new("polygon", "/v3/reference/dividends", 200, 145, Utc::now())
            .with_ticker("AAPL")
            .with_remaining(4);
        assert_eq!(log.service_name, "polygon");
        assert_eq!(log.ticker_symbol.as_deref(), Some("AAPL"));
        assert_eq!(log.rate_limit_remaining, Some(4));
        assert!(log.error_message.is_none());
    }
}
