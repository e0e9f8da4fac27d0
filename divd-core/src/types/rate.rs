//! Rate Budgets
//!
//! Rolling per-service call counters backing admission control for the
//! upstream provider. The counters live in the store; the reset arithmetic
//! lives here so both backends share one implementation.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Per-service limits. Only the minute limit is enforced by default;
/// hour/day counters are maintained for observability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_hour: Option<u32>,
    pub per_day: Option<u32>,
}

impl RateLimits {
    /// The upstream dividend provider budget: 5 calls/minute.
    pub fn polygon() -> Self {
        Self {
            per_minute: 5,
            per_hour: None,
            per_day: None,
        }
    }
}

/// Admission decision from `check_and_reserve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The call was reserved against the budget
    Admitted,
    /// Budget exhausted; retry after `wait_ms`
    RateLimited { wait_ms: u64 },
}

impl RateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, RateDecision::Admitted)
    }
}

/// Persisted rolling counters for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateBudget {
    pub service_name: String,
    pub minute_count: u32,
    pub hour_count: u32,
    pub day_count: u32,
    pub reset_minute: DateTime<Utc>,
    pub reset_hour: DateTime<Utc>,
    pub reset_day: DateTime<Utc>,
    pub last_call_time: Option<DateTime<Utc>>,
}

/// Truncate to the start of the minute.
pub fn truncate_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), t.hour(), t.minute(), 0)
        .single()
        .expect("valid truncated timestamp")
}

/// Truncate to the start of the hour.
pub fn truncate_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), t.hour(), 0, 0)
        .single()
        .expect("valid truncated timestamp")
}

/// Truncate to the start of the day.
pub fn truncate_day(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
        .single()
        .expect("valid truncated timestamp")
}

impl RateBudget {
    /// Zeroed budget anchored at `now`.
    pub fn new(service_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            service_name: service_name.into(),
            minute_count: 0,
            hour_count: 0,
            day_count: 0,
            reset_minute: truncate_minute(now),
            reset_hour: truncate_hour(now),
            reset_day: truncate_day(now),
            last_call_time: None,
        }
    }

    /// Reset any counter whose boundary has been crossed.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        let minute = truncate_minute(now);
        if self.reset_minute < minute {
            self.minute_count = 0;
            self.reset_minute = minute;
        }
        let hour = truncate_hour(now);
        if self.reset_hour < hour {
            self.hour_count = 0;
            self.reset_hour = hour;
        }
        let day = truncate_day(now);
        if self.reset_day < day {
            self.day_count = 0;
            self.reset_day = day;
        }
    }

    /// Roll, then either reserve one call or report the wait until the
    /// next applicable boundary.
    pub fn check_and_reserve(&mut self, limits: &RateLimits, now: DateTime<Utc>) -> RateDecision {
        self.roll(now);

        if self.minute_count >= limits.per_minute {
            let next = self.reset_minute + Duration::minutes(1);
            return RateDecision::RateLimited {
                wait_ms: wait_millis(now, next),
            };
        }
        if let Some(per_hour) = limits.per_hour {
            if self.hour_count >= per_hour {
                let next = self.reset_hour + Duration::hours(1);
                return RateDecision::RateLimited {
                    wait_ms: wait_millis(now, next),
                };
            }
        }
        if let Some(per_day) = limits.per_day {
            if self.day_count >= per_day {
                let next = self.reset_day + Duration::days(1);
                return RateDecision::RateLimited {
                    wait_ms: wait_millis(now, next),
                };
            }
        }

        self.minute_count += 1;
        self.hour_count += 1;
        self.day_count += 1;
        self.last_call_time = Some(now);
        RateDecision::Admitted
    }

    /// Read-only estimate of the wait before the next admissible call.
    pub fn time_until_next_call(&self, limits: &RateLimits, now: DateTime<Utc>) -> u64 {
        let mut probe = self.clone();
        probe.roll(now);
        if probe.minute_count < limits.per_minute {
            return 0;
        }
        wait_millis(now, probe.reset_minute + Duration::minutes(1))
    }
}

fn wait_millis(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    (until - now).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, h, m, s).unwrap()
    }

    #[test]
    fn test_reserve_up_to_minute_limit() {
        let limits = RateLimits::polygon();
        let now = at(10, 0, 30);
        let mut budget = RateBudget::new("polygon", now);

        for _ in 0..5 {
            assert_eq!(budget.check_and_reserve(&limits, now), RateDecision::Admitted);
        }
        match budget.check_and_reserve(&limits, now) {
            RateDecision::RateLimited { wait_ms } => assert_eq!(wait_ms, 30_000),
            other => panic!("expected rate limited, got {:?}", other),
        }
    }

    #[test]
    fn test_minute_boundary_resets_counter() {
        let limits = RateLimits::polygon();
        let now = at(10, 0, 30);
        let mut budget = RateBudget::new("polygon", now);

        for _ in 0..5 {
            budget.check_and_reserve(&limits, now);
        }

        // Crossing into the next minute admits again and counts the call
        let later = at(10, 1, 2);
        assert_eq!(
            budget.check_and_reserve(&limits, later),
            RateDecision::Admitted
        );
        assert_eq!(budget.minute_count, 1);
        assert_eq!(budget.reset_minute, truncate_minute(later));
        // Hour counter keeps accumulating across minute boundaries
        assert_eq!(budget.hour_count, 6);
    }

    #[test]
    fn test_hour_limit_enforced_when_configured() {
        let limits = RateLimits {
            per_minute: 100,
            per_hour: Some(2),
            per_day: None,
        };
        let now = at(10, 0, 0);
        let mut budget = RateBudget::new("polygon", now);
        assert!(budget.check_and_reserve(&limits, now).is_admitted());
        assert!(budget.check_and_reserve(&limits, now).is_admitted());
        assert!(!budget.check_and_reserve(&limits, now).is_admitted());
    }

    #[test]
    fn test_time_until_next_call_is_read_only() {
        let limits = RateLimits::polygon();
        let now = at(10, 0, 0);
        let mut budget = RateBudget::new("polygon", now);
        assert_eq!(budget.time_until_next_call(&limits, now), 0);

        for _ in 0..5 {
            budget.check_and_reserve(&limits, now);
        }
        assert_eq!(budget.time_until_next_call(&limits, now), 60_000);
        // The probe must not mutate counters
        assert_eq!(budget.minute_count, 5);
    }
}
