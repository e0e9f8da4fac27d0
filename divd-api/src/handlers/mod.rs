//! HTTP Handlers

pub mod dividends;
pub mod health;
pub mod ingest;
pub mod jobs;
pub mod subscriptions;

pub use dividends::{all_dividends, ticker_dividends};
pub use health::{health_check, get_stats};
pub use ingest::{process_queue, process_single, update_tickers};
pub use jobs::{cancel_job, job_status, list_jobs};
pub use subscriptions::{
    bulk_subscriptions, create_subscription, delete_subscription, list_subscriptions,
    my_dividends,
};
