//! Divd Upstream - Dividend Provider Client
//!
//! Rate-limited access to the upstream market-data provider:
//!
//! - [`RateBudgetGate`] - admission control over the store-held budget
//!   counters (5 calls/minute for the dividend provider)
//! - [`DividendsClient`] - the fetch interface consumed by the worker
//! - [`PolygonClient`] - the HTTP implementation
//! - [`ScriptedClient`] - canned responses for tests and development
//!
//! Every provider call is admitted through the gate before any network
//! traffic and recorded in the call log afterwards, success or failure.

pub mod budget;
pub mod client;
pub mod config;
pub mod error;

pub use budget::RateBudgetGate;
pub use client::{
    DateRange, DividendsClient, FetchKind, PolygonClient, ScriptedClient, DIVIDENDS_PATH,
};
pub use config::{UpstreamConfig, POLYGON_SERVICE};
pub use error::{FetchError, FetchResult};
