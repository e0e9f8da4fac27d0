//! divd - dividend ingestion service
//!
//! Wires the store, the upstream client, the worker pool, and the HTTP
//! API into one process. Configuration comes from flags or environment:
//!
//! - `DATABASE_URL` - SQLite location (default `sqlite:divd.db`)
//! - `POLYGON_API_KEY` - upstream provider key (required)
//! - `TICKER_API_KEY` - optional static operator API key
//! - `FAST_QUEUE_URL` - optional fast-queue sink endpoint
//! - `DIVD_BIND_ADDR` - listen address (default `0.0.0.0:3000`)

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use divd_api::{start_server, ApiConfig, AppState, AuthConfig};
use divd_jobs::{
    BackgroundRunner, FastQueueSink, HttpFastQueue, NullFastQueue, RunnerConfig, Worker,
    WorkerConfig,
};
use divd_store::{SqliteStore, Store};
use divd_upstream::{DividendsClient, PolygonClient, RateBudgetGate, UpstreamConfig};

#[derive(Parser, Debug)]
#[command(name = "divd-server", about = "Dividend history ingestion service")]
struct Args {
    /// Listen address
    #[arg(long, env = "DIVD_BIND_ADDR", default_value = "0.0.0.0:3000")]
    bind: String,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:divd.db")]
    database_url: String,

    /// Fast-queue sink endpoint; omitted means fast-lane symbols fall
    /// back to the standard job queue
    #[arg(long, env = "FAST_QUEUE_URL")]
    fast_queue_url: Option<String>,

    /// Seconds between background worker ticks
    #[arg(long, default_value_t = 15)]
    tick_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Missing provider credentials are fatal at startup, not at the
    // first fetch.
    let upstream_config = UpstreamConfig::from_env()?;

    let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(&args.database_url).await?);
    tracing::info!("store ready at {}", args.database_url);

    let gate = RateBudgetGate::polygon(store.clone());
    let client: Arc<dyn DividendsClient> =
        Arc::new(PolygonClient::new(upstream_config, gate.clone())?);

    let fast_queue: Arc<dyn FastQueueSink> = match &args.fast_queue_url {
        Some(url) => {
            tracing::info!("fast queue sink: {}", url);
            Arc::new(HttpFastQueue::new(url.clone())?)
        }
        None => {
            tracing::info!("no fast queue sink configured, using job-queue fallback");
            Arc::new(NullFastQueue)
        }
    };

    let worker = Arc::new(Worker::new(
        store.clone(),
        client.clone(),
        gate,
        WorkerConfig::default(),
    ));

    let runner = BackgroundRunner::new(
        worker.clone(),
        RunnerConfig {
            tick_interval_secs: args.tick_interval_secs,
            ..Default::default()
        },
    )
    .start();

    let state = AppState::new(store, client, fast_queue, worker)
        .with_auth(AuthConfig::from_env())
        .with_config(ApiConfig {
            listen_addr: args.bind.clone(),
            ..Default::default()
        });

    tokio::select! {
        result = start_server(state) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    runner.stop().await;
    Ok(())
}
