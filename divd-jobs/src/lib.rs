//! Divd Jobs - Job Manager & Worker Pool
//!
//! Asynchronous processing for the ingestion pipeline:
//!
//! - [`JobManager`] - job creation, cancellation, and progress reports
//! - [`Worker`] - leases queue items, fetches under the upstream budget,
//!   and commits results through the store
//! - [`BackgroundRunner`] - drives a worker on an interval with a
//!   stop/pause/resume handle
//! - [`FastQueueSink`] - the fast-path lane for first-time backfills
//!
//! Job state machine:
//!
//! ```text
//!   pending ---(first item leased)---> processing
//!   pending ---(cancel)-------------> cancelled
//!   processing -(drained, any ok)---> completed
//!   processing -(drained, none ok)--> failed
//! ```

pub mod error;
pub mod fast;
pub mod manager;
pub mod runner;
pub mod worker;

pub use error::{FastQueueError, WorkerError, WorkerResult};
pub use fast::{FastQueueBatch, FastQueueSink, HttpFastQueue, NullFastQueue, ScriptedFastQueue};
pub use manager::{format_eta, JobManager, JobProgress};
pub use runner::{BackgroundRunner, RunnerConfig, RunnerHandle, RunnerStatus};
pub use worker::{TickReport, Worker, WorkerConfig};
