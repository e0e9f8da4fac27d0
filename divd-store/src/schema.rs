//! Logical Schema
//!
//! Applied on startup by the SQLite backend. Every statement is
//! `IF NOT EXISTS` so initialization is idempotent.

/// Full schema for the dividend service.
pub const DIVD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tickers (
    symbol TEXT PRIMARY KEY,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    last_dividend_update TEXT,
    update_frequency_hours INTEGER NOT NULL DEFAULT 24
);

CREATE TABLE IF NOT EXISTS dividends (
    ticker TEXT NOT NULL,
    ex_dividend_date TEXT NOT NULL,
    declaration_date TEXT,
    record_date TEXT,
    pay_date TEXT,
    amount TEXT NOT NULL,
    currency TEXT NOT NULL DEFAULT 'USD',
    frequency INTEGER NOT NULL DEFAULT 4,
    dividend_type TEXT NOT NULL DEFAULT 'Cash',
    polygon_id TEXT,
    data_source TEXT NOT NULL DEFAULT 'polygon',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (ticker, ex_dividend_date),
    FOREIGN KEY (ticker) REFERENCES tickers(symbol)
);

CREATE INDEX IF NOT EXISTS idx_dividends_ex_date ON dividends(ex_dividend_date);

CREATE TABLE IF NOT EXISTS api_jobs (
    id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    ticker_symbols TEXT NOT NULL,
    total INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 1,
    force_refresh INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    estimated_completion TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_api_jobs_status ON api_jobs(status);
CREATE INDEX IF NOT EXISTS idx_api_jobs_created_at ON api_jobs(created_at);

CREATE TABLE IF NOT EXISTS job_queue (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    ticker_symbol TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 1,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    scheduled_at TEXT NOT NULL,
    locked_at TEXT,
    locked_by TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (job_id) REFERENCES api_jobs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_job_queue_dispatch
    ON job_queue(priority DESC, scheduled_at ASC);
CREATE INDEX IF NOT EXISTS idx_job_queue_job_id ON job_queue(job_id);

CREATE TABLE IF NOT EXISTS rate_limits (
    service_name TEXT PRIMARY KEY,
    minute_count INTEGER NOT NULL DEFAULT 0,
    hour_count INTEGER NOT NULL DEFAULT 0,
    day_count INTEGER NOT NULL DEFAULT 0,
    reset_minute TEXT NOT NULL,
    reset_hour TEXT NOT NULL,
    reset_day TEXT NOT NULL,
    last_call_time TEXT
);

CREATE TABLE IF NOT EXISTS api_call_logs (
    id TEXT PRIMARY KEY,
    service_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    ticker_symbol TEXT,
    response_status INTEGER NOT NULL,
    response_time_ms INTEGER NOT NULL,
    rate_limit_remaining INTEGER,
    error_message TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_call_logs_service
    ON api_call_logs(service_name, created_at);

CREATE TABLE IF NOT EXISTS api_users (
    id TEXT PRIMARY KEY,
    api_key TEXT NOT NULL UNIQUE,
    user_name TEXT,
    plan_type TEXT NOT NULL DEFAULT 'free',
    max_subscriptions INTEGER NOT NULL DEFAULT 10,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_users_key ON api_users(api_key);

CREATE TABLE IF NOT EXISTS user_subscriptions (
    user_id TEXT NOT NULL,
    ticker_symbol TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 1,
    subscribed_at TEXT NOT NULL,
    notification_enabled INTEGER NOT NULL DEFAULT 1,
    auto_update_enabled INTEGER NOT NULL DEFAULT 1,
    last_dividend_check TEXT,
    PRIMARY KEY (user_id, ticker_symbol),
    FOREIGN KEY (user_id) REFERENCES api_users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS subscription_activity (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    ticker_symbol TEXT NOT NULL,
    action TEXT NOT NULL,
    detail TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subscription_activity_user
    ON subscription_activity(user_id, created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_covers_all_tables() {
        for table in [
            "tickers",
            "dividends",
            "api_jobs",
            "job_queue",
            "rate_limits",
            "api_call_logs",
            "api_users",
            "user_subscriptions",
            "subscription_activity",
        ] {
            assert!(
                DIVD_SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)),
                "schema missing table {}",
                table
            );
        }
    }
}
