//! Background Runner
//!
//! Drives the worker on an interval. The loop owns its own pause state
//! and publishes what it has done after every tick; the handle is a
//! command channel plus a read-only view of that status. Dropping the
//! handle shuts the loop down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::worker::{TickReport, Worker};

/// Runner tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Seconds between worker ticks
    pub tick_interval_secs: u64,
    /// Cap on the extra sleep taken after a rate-limited tick
    pub max_backoff_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 15,
            max_backoff_secs: 60,
        }
    }
}

/// Control messages accepted by the loop.
enum RunnerCommand {
    Pause,
    Resume,
    Shutdown,
}

/// What the loop has done so far, published after every state change.
#[derive(Debug, Clone, Default)]
pub struct RunnerStatus {
    /// Ticks are currently being skipped
    pub paused: bool,
    /// Completed worker ticks
    pub ticks: u64,
    /// Outcome of the most recent tick
    pub last_report: Option<TickReport>,
}

/// Background worker loop.
pub struct BackgroundRunner {
    worker: Arc<Worker>,
    config: RunnerConfig,
}

impl BackgroundRunner {
    /// Create a runner.
    pub fn new(worker: Arc<Worker>, config: RunnerConfig) -> Self {
        Self { worker, config }
    }

    /// Spawn the loop and return its handle.
    pub fn start(self) -> RunnerHandle {
        let (command_tx, mut command_rx) = mpsc::channel::<RunnerCommand>(4);
        let (status_tx, status_rx) = watch::channel(RunnerStatus::default());

        let worker = self.worker;
        let config = self.config;

        tokio::spawn(async move {
            let mut timer = interval(Duration::from_secs(config.tick_interval_secs));
            let mut status = RunnerStatus::default();
            info!(
                "background runner started (worker {}, interval {}s)",
                worker.id(),
                config.tick_interval_secs
            );

            loop {
                tokio::select! {
                    command = command_rx.recv() => {
                        match command {
                            // A dropped handle counts as shutdown
                            None | Some(RunnerCommand::Shutdown) => {
                                info!("background runner shutting down");
                                break;
                            }
                            Some(RunnerCommand::Pause) => {
                                status.paused = true;
                                let _ = status_tx.send(status.clone());
                            }
                            Some(RunnerCommand::Resume) => {
                                status.paused = false;
                                let _ = status_tx.send(status.clone());
                            }
                        }
                    }
                    _ = timer.tick() => {
                        if status.paused {
                            continue;
                        }
                        match worker.tick().await {
                            Ok(report) => {
                                if report.leased > 0 {
                                    debug!(
                                        "tick: leased={} processed={} skipped={} failed={}",
                                        report.leased,
                                        report.processed,
                                        report.skipped,
                                        report.failed
                                    );
                                }
                                let backoff = report.rate_limited.then(|| {
                                    report
                                        .wait_ms
                                        .unwrap_or(config.max_backoff_secs * 1000)
                                        .min(config.max_backoff_secs * 1000)
                                });
                                status.ticks += 1;
                                status.last_report = Some(report);
                                let _ = status_tx.send(status.clone());
                                if let Some(wait_ms) = backoff {
                                    debug!("rate limited, backing off {} ms", wait_ms);
                                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                                }
                            }
                            Err(err) => {
                                error!("worker tick failed: {}", err);
                            }
                        }
                    }
                }
            }

            info!("background runner stopped");
        });

        RunnerHandle {
            commands: command_tx,
            status: status_rx,
        }
    }
}

/// Control handle for a running loop.
pub struct RunnerHandle {
    commands: mpsc::Sender<RunnerCommand>,
    status: watch::Receiver<RunnerStatus>,
}

impl RunnerHandle {
    /// Stop the loop permanently.
    pub async fn stop(self) {
        let _ = self.commands.send(RunnerCommand::Shutdown).await;
    }

    /// Skip ticks until resumed.
    pub async fn pause(&self) {
        let _ = self.commands.send(RunnerCommand::Pause).await;
    }

    /// Resume ticking.
    pub async fn resume(&self) {
        let _ = self.commands.send(RunnerCommand::Resume).await;
    }

    /// Latest published status.
    pub fn status(&self) -> RunnerStatus {
        self.status.borrow().clone()
    }

    /// Wait until the loop has published a status matching `predicate`.
    pub async fn wait_for(&mut self, predicate: impl Fn(&RunnerStatus) -> bool) {
        let _ = self.status.wait_for(|status| predicate(status)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use divd_store::{DividendFilter, MemoryStore, Store};
    use divd_upstream::{RateBudgetGate, ScriptedClient};
    use rust_decimal::Decimal;

    use crate::worker::WorkerConfig;

    struct Rig {
        store: Arc<MemoryStore>,
        client: Arc<ScriptedClient>,
        worker: Arc<Worker>,
    }

    fn rig() -> Rig {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::new());
        let gate = RateBudgetGate::polygon(store.clone());
        let worker = Arc::new(Worker::new(
            store.clone(),
            client.clone(),
            gate,
            WorkerConfig {
                worker_id: "worker-runner".to_string(),
                batch_size: 5,
                item_budget_secs: 30,
                courtesy_delay_ms: 0,
            },
        ));
        Rig {
            store,
            client,
            worker,
        }
    }

    fn fast_config() -> RunnerConfig {
        RunnerConfig {
            tick_interval_secs: 1,
            max_backoff_secs: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_drains_queue() {
        let rig = rig();
        rig.store.upsert_ticker("AAPL").await.unwrap();
        let job = rig
            .store
            .create_job(divd_core::NewJob::dividend_update(
                vec!["AAPL".into()],
                1,
                false,
            ))
            .await
            .unwrap();
        rig.store
            .enqueue(job.id, &["AAPL".to_string()], 1)
            .await
            .unwrap();
        rig.client
            .push_response(Ok(vec![divd_core::Dividend::new(
                "AAPL",
                NaiveDate::from_ymd_opt(2024, 2, 9).unwrap(),
                Decimal::new(24, 2),
                Utc::now(),
            )]))
            .await;

        let mut handle = BackgroundRunner::new(rig.worker.clone(), fast_config()).start();
        handle
            .wait_for(|status| {
                status
                    .last_report
                    .as_ref()
                    .is_some_and(|report| report.processed > 0)
            })
            .await;

        let rows = rig
            .store
            .dividends_for_ticker("AAPL", &DividendFilter::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(handle.status().ticks >= 1);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_commands() {
        let rig = rig();
        let mut handle = BackgroundRunner::new(rig.worker.clone(), fast_config()).start();

        handle.pause().await;
        handle.wait_for(|status| status.paused).await;
        let ticks_when_paused = handle.status().ticks;

        // No tick lands while paused
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.status().ticks, ticks_when_paused);

        handle.resume().await;
        handle.wait_for(|status| !status.paused).await;
        handle
            .wait_for(|status| status.ticks > ticks_when_paused)
            .await;
        handle.stop().await;
    }
}
