//! Dividend Provider Client
//!
//! Wraps the provider's `/v3/reference/dividends` resource behind the
//! [`DividendsClient`] trait. Every outbound call is admitted through the
//! [`RateBudgetGate`] first and logged afterwards, whatever the outcome.

use std::collections::VecDeque;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;

use divd_core::types::dividend::{
    DEFAULT_CURRENCY, DEFAULT_DATA_SOURCE, DEFAULT_FREQUENCY, DEFAULT_TYPE,
};
use divd_core::{CoreError, Dividend, CALL_SPACING_SECS};

use crate::budget::RateBudgetGate;
use crate::config::UpstreamConfig;
use crate::error::{FetchError, FetchResult};

/// Provider resource path for dividend listings.
pub const DIVIDENDS_PATH: &str = "/v3/reference/dividends";

/// Sleep applied before retrying a page the provider answered 429 to.
const PROVIDER_BACKOFF_SECS: u64 = 60;

/// Inclusive date window for a fetch.
pub type DateRange = (NaiveDate, NaiveDate);

/// Which slice of history a fetch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Full backfill: two years back through six months forward
    Historical,
    /// Incremental refresh: a couple of days back through three months
    /// forward
    Recent,
}

impl FetchKind {
    /// Default date window for this kind, anchored at `today`.
    pub fn default_range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            FetchKind::Historical => (
                today - Months::new(24),
                today + Months::new(6),
            ),
            FetchKind::Recent => (
                today - Days::new(2),
                today + Months::new(3),
            ),
        }
    }
}

// ==================== Wire model ====================

#[derive(Debug, Deserialize)]
struct WireDividendsResponse {
    results: Option<Vec<WireDividend>>,
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDividend {
    id: Option<String>,
    cash_amount: Option<serde_json::Number>,
    currency: Option<String>,
    declaration_date: Option<String>,
    ex_dividend_date: Option<String>,
    record_date: Option<String>,
    pay_date: Option<String>,
    frequency: Option<i64>,
    dividend_type: Option<String>,
    ticker: Option<String>,
}

fn parse_wire_date(field: &str, value: &Option<String>) -> Result<Option<NaiveDate>, CoreError> {
    match value {
        None => Ok(None),
        Some(raw) => NaiveDate::from_str(raw)
            .map(Some)
            .map_err(|e| CoreError::parse(field, e.to_string())),
    }
}

/// Project one wire record into the internal model.
///
/// Records without an ex-dividend date or with a non-positive amount are
/// rejected individually; the rest of the batch is unaffected.
fn wire_to_dividend(
    fallback_ticker: &str,
    wire: &WireDividend,
    now: DateTime<Utc>,
) -> Result<Dividend, CoreError> {
    let ex_dividend_date = parse_wire_date("ex_dividend_date", &wire.ex_dividend_date)?
        .ok_or_else(|| CoreError::InvalidDividend("missing ex_dividend_date".to_string()))?;

    let amount_raw = wire
        .cash_amount
        .as_ref()
        .ok_or_else(|| CoreError::InvalidDividend("missing cash_amount".to_string()))?;
    let amount = Decimal::from_str(&amount_raw.to_string())
        .map_err(|e| CoreError::parse("cash_amount", e.to_string()))?;
    if amount <= Decimal::ZERO {
        return Err(CoreError::InvalidDividend(format!(
            "non-positive cash_amount {}",
            amount
        )));
    }

    let ticker = wire
        .ticker
        .clone()
        .unwrap_or_else(|| fallback_ticker.to_string());

    Ok(Dividend {
        ticker,
        ex_dividend_date,
        declaration_date: parse_wire_date("declaration_date", &wire.declaration_date)?,
        record_date: parse_wire_date("record_date", &wire.record_date)?,
        pay_date: parse_wire_date("pay_date", &wire.pay_date)?,
        amount,
        currency: wire
            .currency
            .clone()
            .filter(|c| !c.is_empty())
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        frequency: wire.frequency.map(|f| f as i32).unwrap_or(DEFAULT_FREQUENCY),
        dividend_type: wire
            .dividend_type
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TYPE.to_string()),
        polygon_id: wire.id.clone(),
        data_source: DEFAULT_DATA_SOURCE.to_string(),
        created_at: now,
        updated_at: now,
    })
}

fn transform_page(fallback_ticker: &str, page: &[WireDividend]) -> Vec<Dividend> {
    let now = Utc::now();
    let mut records = Vec::with_capacity(page.len());
    for wire in page {
        match wire_to_dividend(fallback_ticker, wire, now) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!("dropping upstream record for {}: {}", fallback_ticker, err);
            }
        }
    }
    records
}

// ==================== Client trait ====================

/// Access to the upstream dividend provider.
#[async_trait]
pub trait DividendsClient: Send + Sync {
    /// Fetch dividends for one ticker. `range` overrides the kind's
    /// default window.
    async fn fetch_dividends(
        &self,
        ticker: &str,
        range: Option<DateRange>,
        kind: FetchKind,
    ) -> FetchResult<Vec<Dividend>>;

    /// Ascending scan of recent records across all tickers, paced to the
    /// provider budget.
    async fn fetch_bulk_recent(
        &self,
        days_back: u32,
        page_size: u32,
    ) -> FetchResult<Vec<Dividend>>;
}

// ==================== HTTP implementation ====================

/// reqwest-backed provider client.
pub struct PolygonClient {
    http: reqwest::Client,
    config: UpstreamConfig,
    gate: RateBudgetGate,
}

impl PolygonClient {
    /// Build a client; fails when the HTTP client cannot be constructed.
    pub fn new(config: UpstreamConfig, gate: RateBudgetGate) -> FetchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;
        Ok(Self { http, config, gate })
    }

    /// Reserve a budget slot, failing fast when the budget is exhausted.
    async fn admit(&self) -> FetchResult<()> {
        match self.gate.check_and_reserve().await? {
            divd_core::RateDecision::Admitted => Ok(()),
            divd_core::RateDecision::RateLimited { wait_ms } => {
                Err(FetchError::RateLimited { wait_ms })
            }
        }
    }

    /// Issue one GET, translate the status, and log the attempt.
    async fn get_page(
        &self,
        url: &str,
        ticker: Option<&str>,
    ) -> FetchResult<WireDividendsResponse> {
        let started = Instant::now();
        let response = self.http.get(url).send().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut log = divd_core::CallLog::new(
            self.gate.service(),
            DIVIDENDS_PATH,
            0,
            elapsed_ms,
            Utc::now(),
        );
        if let Some(ticker) = ticker {
            log = log.with_ticker(ticker);
        }

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.gate.record_call(log.with_error(err.to_string())).await;
                return Err(FetchError::Transient(err.to_string()));
            }
        };

        let status = response.status();
        log.response_status = status.as_u16();
        if let Some(remaining) = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
        {
            log = log.with_remaining(remaining);
        }

        if status.is_success() {
            match response.json::<WireDividendsResponse>().await {
                Ok(page) => {
                    self.gate.record_call(log).await;
                    Ok(page)
                }
                Err(err) => {
                    self.gate.record_call(log.with_error(err.to_string())).await;
                    Err(FetchError::Invalid(format!("malformed response: {}", err)))
                }
            }
        } else {
            let err = match status.as_u16() {
                429 => FetchError::RateLimited {
                    wait_ms: PROVIDER_BACKOFF_SECS * 1000,
                },
                403 => FetchError::Unauthorized,
                code if (500..600).contains(&code) => {
                    FetchError::Transient(format!("upstream {}", code))
                }
                code => FetchError::Invalid(format!("upstream {}", code)),
            };
            self.gate.record_call(log.with_error(err.to_string())).await;
            Err(err)
        }
    }

    fn dividends_url(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}{}?ticker={}&ex_dividend_date.gte={}&ex_dividend_date.lte={}&limit=1000&apiKey={}",
            self.config.base_url, DIVIDENDS_PATH, ticker, start, end, self.config.api_key
        )
    }

    fn bulk_url(&self, start: NaiveDate, end: NaiveDate, page_size: u32) -> String {
        format!(
            "{}{}?ex_dividend_date.gte={}&ex_dividend_date.lte={}&order=asc&sort=ex_dividend_date&limit={}&apiKey={}",
            self.config.base_url, DIVIDENDS_PATH, start, end, page_size, self.config.api_key
        )
    }

    fn with_api_key(&self, next_url: &str) -> String {
        if next_url.contains("apiKey=") {
            next_url.to_string()
        } else {
            format!("{}&apiKey={}", next_url, self.config.api_key)
        }
    }
}

#[async_trait]
impl DividendsClient for PolygonClient {
    async fn fetch_dividends(
        &self,
        ticker: &str,
        range: Option<DateRange>,
        kind: FetchKind,
    ) -> FetchResult<Vec<Dividend>> {
        self.admit().await?;
        let (start, end) = range.unwrap_or_else(|| kind.default_range(Utc::now().date_naive()));
        let page = self.get_page(&self.dividends_url(ticker, start, end), Some(ticker)).await?;
        let results = page.results.unwrap_or_default();
        tracing::debug!(
            "fetched {} upstream records for {} ({:?})",
            results.len(),
            ticker,
            kind
        );
        Ok(transform_page(ticker, &results))
    }

    async fn fetch_bulk_recent(
        &self,
        days_back: u32,
        page_size: u32,
    ) -> FetchResult<Vec<Dividend>> {
        let today = Utc::now().date_naive();
        let start = today - Days::new(days_back as u64);
        let end = today + Months::new(3);

        let mut url = self.bulk_url(start, end, page_size);
        let mut all = Vec::new();
        let mut page_index = 0u32;

        loop {
            // Respect the budget: wait out the window instead of failing a
            // long scan part-way through.
            loop {
                match self.gate.check_and_reserve().await? {
                    divd_core::RateDecision::Admitted => break,
                    divd_core::RateDecision::RateLimited { wait_ms } => {
                        tracing::debug!("bulk scan waiting {} ms for budget", wait_ms);
                        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    }
                }
            }

            let page = match self.get_page(&url, None).await {
                Ok(page) => page,
                Err(FetchError::RateLimited { .. }) => {
                    // Provider-side 429: sleep the full window, retry the
                    // same page.
                    tracing::warn!(
                        "provider 429 on bulk page {}, sleeping {}s",
                        page_index,
                        PROVIDER_BACKOFF_SECS
                    );
                    tokio::time::sleep(Duration::from_secs(PROVIDER_BACKOFF_SECS)).await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let results = page.results.unwrap_or_default();
            // Bulk records must name their ticker; there is no fallback.
            all.extend(
                transform_page("", &results)
                    .into_iter()
                    .filter(|d| !d.ticker.is_empty()),
            );
            page_index += 1;

            match page.next_url {
                Some(next) => {
                    url = self.with_api_key(&next);
                    tokio::time::sleep(Duration::from_secs(CALL_SPACING_SECS)).await;
                }
                None => break,
            }
        }

        tracing::info!(
            "bulk recent scan finished: {} records over {} pages",
            all.len(),
            page_index
        );
        Ok(all)
    }
}

// ==================== Scripted implementation ====================

/// Canned-response client for tests and development.
///
/// Responses are served in push order; an empty script yields empty
/// result sets.
#[derive(Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<FetchResult<Vec<Dividend>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    /// Create an empty scripted client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response.
    pub async fn push_response(&self, response: FetchResult<Vec<Dividend>>) {
        self.responses.lock().await.push_back(response);
    }

    /// Tickers fetched so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl DividendsClient for ScriptedClient {
    async fn fetch_dividends(
        &self,
        ticker: &str,
        _range: Option<DateRange>,
        _kind: FetchKind,
    ) -> FetchResult<Vec<Dividend>> {
        self.calls.lock().await.push(ticker.to_string());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_bulk_recent(
        &self,
        _days_back: u32,
        _page_size: u32,
    ) -> FetchResult<Vec<Dividend>> {
        self.calls.lock().await.push("<bulk>".to_string());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
