//! Fast Queue Sink
//!
//! The fast path carries symbols that need an immediate historical
//! backfill. One sink abstraction covers the deployment options: an HTTP
//! queue endpoint in production, nothing in single-process deployments
//! (the ingestion handler then falls back to the standard job queue), and
//! a scripted sink in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::FastQueueError;

/// One fast-path dispatch: a batch of symbols with shared settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FastQueueBatch {
    pub tickers: Vec<String>,
    pub priority: i32,
    pub force: bool,
}

/// Destination for fast-path batches.
#[async_trait]
pub trait FastQueueSink: Send + Sync {
    /// Whether dispatching can succeed at all. Handlers skip the fast
    /// lane entirely when this is false.
    fn enabled(&self) -> bool {
        true
    }

    /// Deliver one batch.
    async fn dispatch(&self, batch: &FastQueueBatch) -> Result<(), FastQueueError>;
}

/// HTTP sink posting batches to a queue endpoint.
pub struct HttpFastQueue {
    http: reqwest::Client,
    url: String,
}

impl HttpFastQueue {
    /// Build a sink for the given endpoint.
    pub fn new(url: impl Into<String>) -> Result<Self, FastQueueError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| FastQueueError::Dispatch(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FastQueueSink for HttpFastQueue {
    async fn dispatch(&self, batch: &FastQueueBatch) -> Result<(), FastQueueError> {
        let response = self
            .http
            .post(&self.url)
            .json(batch)
            .send()
            .await
            .map_err(|e| FastQueueError::Dispatch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FastQueueError::Dispatch(format!(
                "queue endpoint answered {}",
                response.status()
            )));
        }
        tracing::debug!(
            "dispatched {} tickers to fast queue",
            batch.tickers.len()
        );
        Ok(())
    }
}

/// Absent sink for deployments without a fast-queue endpoint.
#[derive(Default)]
pub struct NullFastQueue;

#[async_trait]
impl FastQueueSink for NullFastQueue {
    fn enabled(&self) -> bool {
        false
    }

    async fn dispatch(&self, _batch: &FastQueueBatch) -> Result<(), FastQueueError> {
        Err(FastQueueError::Unconfigured)
    }
}

/// Recording sink for tests; optionally fails every dispatch.
#[derive(Default)]
pub struct ScriptedFastQueue {
    batches: Mutex<Vec<FastQueueBatch>>,
    fail: bool,
}

impl ScriptedFastQueue {
    /// Sink that accepts and records every batch.
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Sink that rejects every batch.
    pub fn failing() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Batches received so far.
    pub async fn batches(&self) -> Vec<FastQueueBatch> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl FastQueueSink for ScriptedFastQueue {
    async fn dispatch(&self, batch: &FastQueueBatch) -> Result<(), FastQueueError> {
        if self.fail {
            return Err(FastQueueError::Dispatch("scripted failure".to_string()));
        }
        self.batches.lock().await.push(batch.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_sink_is_disabled() {
        let sink = NullFastQueue;
        assert!(!sink.enabled());
        assert!(matches!(
            sink.dispatch(&FastQueueBatch {
                tickers: vec!["AAPL".into()],
                priority: 2,
                force: false,
            })
            .await,
            Err(FastQueueError::Unconfigured)
        ));
    }

    #[tokio::test]
    async fn test_scripted_sink_records_batches() {
        let sink = ScriptedFastQueue::accepting();
        let batch = FastQueueBatch {
            tickers: vec!["AAPL".into(), "MSFT".into()],
            priority: 2,
            force: true,
        };
        sink.dispatch(&batch).await.unwrap();
        assert_eq!(sink.batches().await, vec![batch]);

        let failing = ScriptedFastQueue::failing();
        assert!(failing
            .dispatch(&FastQueueBatch {
                tickers: vec!["AAPL".into()],
                priority: 1,
                force: false,
            })
            .await
            .is_err());
    }
}
