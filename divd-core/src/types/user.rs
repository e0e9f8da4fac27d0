//! API Users

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Free,
    Basic,
    Premium,
}

impl PlanType {
    /// Stable string form used in storage and the API
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Basic => "basic",
            PlanType::Premium => "premium",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanType::Free),
            "basic" => Some(PlanType::Basic),
            "premium" => Some(PlanType::Premium),
            _ => None,
        }
    }

    /// Default subscription cap per tier
    pub fn default_max_subscriptions(&self) -> u32 {
        match self {
            PlanType::Free => 10,
            PlanType::Basic => 50,
            PlanType::Premium => 500,
        }
    }
}

/// An authenticated client of the public API.
///
/// The API key is globally unique; inactive users are invisible to the
/// authenticator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUser {
    pub id: Uuid,
    pub api_key: String,
    pub user_name: Option<String>,
    pub plan_type: PlanType,
    pub max_subscriptions: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApiUser {
    /// Create an active user on the given plan with the plan-default cap.
    pub fn new(api_key: impl Into<String>, plan_type: PlanType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_key: api_key.into(),
            user_name: None,
            plan_type,
            max_subscriptions: plan_type.default_max_subscriptions(),
            is_active: true,
            created_at: now,
        }
    }

    /// Attach a display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_round_trip() {
        for plan in [PlanType::Free, PlanType::Basic, PlanType::Premium] {
            assert_eq!(PlanType::parse(plan.as_str()), Some(plan));
        }
        assert_eq!(PlanType::parse("enterprise"), None);
    }

    #[test]
    fn test_new_user_gets_plan_cap() {
        let user = ApiUser::new("tk_test_user", PlanType::Free, Utc::now());
        assert_eq!(user.max_subscriptions, 10);
        assert!(user.is_active);
    }
}
