//! Dividend Entity

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Default currency applied when the provider omits one
pub const DEFAULT_CURRENCY: &str = "USD";
/// Default payout frequency (quarterly)
pub const DEFAULT_FREQUENCY: i32 = 4;
/// Default distribution type
pub const DEFAULT_TYPE: &str = "Cash";
/// Default data source tag
pub const DEFAULT_DATA_SOURCE: &str = "polygon";

/// One distribution event for a ticker.
///
/// The natural key is `(ticker, ex_dividend_date)`; upserts replace field
/// values on conflict so repeated ingestion converges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dividend {
    /// Owning ticker symbol
    pub ticker: String,
    /// Eligibility date (natural-key component)
    pub ex_dividend_date: NaiveDate,
    /// Board declaration date
    pub declaration_date: Option<NaiveDate>,
    /// Shareholder record date
    pub record_date: Option<NaiveDate>,
    /// Payment date
    pub pay_date: Option<NaiveDate>,
    /// Distribution amount per share; strictly positive
    pub amount: Decimal,
    /// ISO-4217 currency code
    pub currency: String,
    /// Payouts per year
    pub frequency: i32,
    /// Distribution type, e.g. `Cash`
    pub dividend_type: String,
    /// Provider-side identifier; carried unbounded
    pub polygon_id: Option<String>,
    /// Origin of the record
    pub data_source: String,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Dividend {
    /// Create a record with defaults for the optional provider fields.
    pub fn new(
        ticker: impl Into<String>,
        ex_dividend_date: NaiveDate,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            ex_dividend_date,
            declaration_date: None,
            record_date: None,
            pay_date: None,
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            frequency: DEFAULT_FREQUENCY,
            dividend_type: DEFAULT_TYPE.to_string(),
            polygon_id: None,
            data_source: DEFAULT_DATA_SOURCE.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the record-level invariants.
    ///
    /// The ex-dividend date is enforced structurally by the type; the
    /// amount must be strictly positive.
    pub fn validate(&self) -> CoreResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(CoreError::InvalidDividend(format!(
                "{} {}: amount must be positive, got {}",
                self.ticker, self.ex_dividend_date, self.amount
            )));
        }
        Ok(())
    }
}
