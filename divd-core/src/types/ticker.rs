//! Ticker Entity

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A tracked equity symbol.
///
/// Symbols are globally shared: subscriptions and jobs reference them by
/// value, and the symbol itself is the natural key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    /// Uppercased symbol (natural key)
    pub symbol: String,
    /// Whether the ticker is actively tracked
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful dividend refresh; advances monotonically
    pub last_dividend_update: Option<DateTime<Utc>>,
    /// Refresh cadence in hours
    pub update_frequency_hours: i64,
}

/// Default refresh cadence
pub const DEFAULT_UPDATE_FREQUENCY_HOURS: i64 = 24;

impl Ticker {
    /// Create a fresh active ticker
    pub fn new(symbol: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            is_active: true,
            created_at: now,
            last_dividend_update: None,
            update_frequency_hours: DEFAULT_UPDATE_FREQUENCY_HOURS,
        }
    }

    /// Whether the ticker is due for a refresh.
    ///
    /// A ticker with no recorded update is always due. Otherwise it is due
    /// once `update_frequency_hours` have elapsed since the last update.
    pub fn needs_update(&self, now: DateTime<Utc>) -> bool {
        match self.last_dividend_update {
            None => true,
            Some(last) => now - last >= Duration::hours(self.update_frequency_hours),
        }
    }

    /// Whether the ticker row was created within the last hour.
    pub fn recently_created(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at < Duration::hours(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ticker_needs_update() {
        let now = Utc::now();
        let ticker = Ticker::new("AAPL", now);
        assert!(ticker.is_active);
        assert!(ticker.needs_update(now));
        assert!(ticker.recently_created(now));
    }

    #[test]
    fn test_fresh_ticker_does_not_need_update() {
        let now = Utc::now();
        let mut ticker = Ticker::new("AAPL", now - Duration::days(30));
        ticker.last_dividend_update = Some(now - Duration::hours(1));
        assert!(!ticker.needs_update(now));
        assert!(!ticker.recently_created(now));
    }

    #[test]
    fn test_stale_ticker_needs_update() {
        let now = Utc::now();
        let mut ticker = Ticker::new("AAPL", now - Duration::days(30));
        ticker.last_dividend_update = Some(now - Duration::hours(25));
        assert!(ticker.needs_update(now));
    }
}
