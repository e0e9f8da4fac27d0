//! API Data Transfer Objects

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use divd_core::{Dividend, Job, RouteDecision, RouteLane, Subscription};

// ==================== Health & stats ====================

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub version: String,
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_secs: u64,
    pub requests_handled: u64,
    pub store: divd_store::StoreStats,
}

// ==================== Dividends ====================

#[derive(Debug, Clone, Serialize)]
pub struct DividendDto {
    pub ticker: String,
    pub ex_dividend_date: NaiveDate,
    pub declaration_date: Option<NaiveDate>,
    pub record_date: Option<NaiveDate>,
    pub pay_date: Option<NaiveDate>,
    pub amount: Decimal,
    pub currency: String,
    pub frequency: i32,
    #[serde(rename = "type")]
    pub dividend_type: String,
}

impl From<Dividend> for DividendDto {
    fn from(d: Dividend) -> Self {
        Self {
            ticker: d.ticker,
            ex_dividend_date: d.ex_dividend_date,
            declaration_date: d.declaration_date,
            record_date: d.record_date,
            pay_date: d.pay_date,
            amount: d.amount,
            currency: d.currency,
            frequency: d.frequency,
            dividend_type: d.dividend_type,
        }
    }
}

/// Query parameters for the dividend read endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendsQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub format: Option<String>,
    pub check_only: Option<bool>,
    pub last_updated: Option<bool>,
    pub fallback: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TickerDividendsResponse {
    pub ticker: String,
    pub count: usize,
    pub dividends: Vec<DividendDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckOnlyResponse {
    pub ticker: String,
    pub has_data: bool,
    pub count: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct AllDividendsResponse {
    pub count: usize,
    pub dividends: Vec<DividendDto>,
}

// ==================== Ingestion ====================

#[derive(Debug, Deserialize)]
pub struct UpdateTickersRequest {
    pub tickers: Vec<String>,
    pub priority: Option<i32>,
    pub force: Option<bool>,
    pub fast: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickerRouteDto {
    pub ticker: String,
    pub lane: String,
    pub reason: String,
}

impl TickerRouteDto {
    pub fn new(ticker: impl Into<String>, decision: RouteDecision) -> Self {
        Self {
            ticker: ticker.into(),
            lane: match decision.lane {
                RouteLane::FastQueue => "fast".to_string(),
                RouteLane::Bulk => "bulk".to_string(),
            },
            reason: decision.reason.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FastQueueOutcomeDto {
    /// The batch reached the fast-queue sink
    pub dispatched: bool,
    pub tickers: u32,
    /// The batch fell back to the standard job queue
    pub fallback: bool,
}

#[derive(Debug, Serialize)]
pub struct UpdateTickersResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fast_queue: Option<FastQueueOutcomeDto>,
    pub routes: Vec<TickerRouteDto>,
    pub fast_count: u32,
    pub bulk_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub ticker: String,
    pub force: Option<bool>,
    #[serde(rename = "fetchType")]
    pub fetch_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub ticker: String,
    pub skipped: bool,
    pub fetched: usize,
    pub inserted: u32,
    pub errors: u32,
    pub message: String,
}

// ==================== Jobs ====================

#[derive(Debug, Clone, Serialize)]
pub struct JobDto {
    pub id: Uuid,
    pub job_type: String,
    pub status: String,
    pub ticker_symbols: Vec<String>,
    pub total: u32,
    pub processed: u32,
    pub failed: u32,
    pub priority: i32,
    pub force: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<Job> for JobDto {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.as_str().to_string(),
            status: job.status.as_str().to_string(),
            ticker_symbols: job.ticker_symbols,
            total: job.total,
            processed: job.processed,
            failed: job.failed,
            priority: job.priority,
            force: job.force,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            estimated_completion: job.estimated_completion,
            error_message: job.error_message,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct JobsQuery {
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobsListResponse {
    pub count: usize,
    pub jobs: Vec<JobDto>,
}

#[derive(Debug, Deserialize)]
pub struct CancelJobQuery {
    #[serde(rename = "jobId")]
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job: JobDto,
    pub remaining: u32,
    pub processing: u32,
    pub percent_complete: u32,
    pub eta: String,
}

// ==================== Subscriptions ====================

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionDto {
    pub ticker: String,
    pub priority: i32,
    pub subscribed_at: DateTime<Utc>,
    pub notification_enabled: bool,
    pub auto_update_enabled: bool,
    pub last_dividend_check: Option<DateTime<Utc>>,
}

impl From<Subscription> for SubscriptionDto {
    fn from(s: Subscription) -> Self {
        Self {
            ticker: s.ticker_symbol,
            priority: s.priority,
            subscribed_at: s.subscribed_at,
            notification_enabled: s.notification_enabled,
            auto_update_enabled: s.auto_update_enabled,
            last_dividend_check: s.last_dividend_check,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub count: usize,
    pub subscriptions: Vec<SubscriptionDto>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub ticker: String,
    pub priority: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub ticker: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkSubscriptionRequest {
    pub action: String,
    pub tickers: Vec<String>,
    pub priority: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct BulkOutcomeDto {
    pub ticker: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkSubscriptionResponse {
    pub action: String,
    pub succeeded: u32,
    pub failed: u32,
    pub results: Vec<BulkOutcomeDto>,
}

#[derive(Debug, Serialize)]
pub struct MyDividendsResponse {
    pub tickers: Vec<String>,
    pub count: usize,
    pub dividends: Vec<DividendDto>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use divd_core::{NewJob, RouteReason};

    #[test]
    fn test_job_dto_from_job() {
        let job = Job::create(
            NewJob::dividend_update(vec!["AAPL".into()], 2, true),
            Utc::now(),
        );
        let dto = JobDto::from(job.clone());
        assert_eq!(dto.id, job.id);
        assert_eq!(dto.job_type, "dividend_update");
        assert_eq!(dto.status, "pending");
        assert!(dto.force);
    }

    #[test]
    fn test_route_dto_strings() {
        let dto = TickerRouteDto::new("AAPL", RouteDecision::fast(RouteReason::NewTicker));
        assert_eq!(dto.lane, "fast");
        assert_eq!(dto.reason, "new_ticker");
    }

    #[test]
    fn test_dividend_dto_renames_type() {
        let dividend = Dividend::new(
            "AAPL",
            NaiveDate::from_ymd_opt(2024, 2, 9).unwrap(),
            Decimal::new(24, 2),
            Utc::now(),
        );
        let json = serde_json::to_value(DividendDto::from(dividend)).unwrap();
        assert_eq!(json["type"], "Cash");
        assert!(json.get("dividend_type").is_none());
    }
}
