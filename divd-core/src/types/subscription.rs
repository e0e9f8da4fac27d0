//! User Subscriptions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One user-to-ticker subscription. At most one row per `(user, ticker)`
/// pair; creating past the user's cap is rejected by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: Uuid,
    pub ticker_symbol: String,
    /// 1 = standard, 2 = elevated
    pub priority: i32,
    pub subscribed_at: DateTime<Utc>,
    pub notification_enabled: bool,
    pub auto_update_enabled: bool,
    pub last_dividend_check: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Create a subscription with default toggles.
    pub fn new(
        user_id: Uuid,
        ticker_symbol: impl Into<String>,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            ticker_symbol: ticker_symbol.into(),
            priority: priority.clamp(1, 2),
            subscribed_at: now,
            notification_enabled: true,
            auto_update_enabled: true,
            last_dividend_check: None,
        }
    }
}

/// Append-only audit entry for subscription mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionActivity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ticker_symbol: String,
    /// `subscribe`, `unsubscribe`, `bulk_subscribe`, ...
    pub action: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionActivity {
    /// Create an activity entry.
    pub fn new(
        user_id: Uuid,
        ticker_symbol: impl Into<String>,
        action: impl Into<String>,
        detail: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            ticker_symbol: ticker_symbol.into(),
            action: action.into(),
            detail,
            created_at: now,
        }
    }
}
