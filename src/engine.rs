//! Load engine: spawns the simulated clients, enforces the run duration and
//! hands the final snapshot to the summary hook.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{self, Duration, Instant};
use tracing::{error, info};

use crate::data_source::FixtureDataset;
use crate::metrics::{MetricsAggregator, RunInfo, Snapshot};
use crate::worker::{run_worker, IterationBody, StopSignal, WorkerConfig};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("At least one simulated client is required")]
    NoClients,
}

/// Shape of the load: how many clients, for how long, how fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub clients: usize,
    pub duration: Duration,
    pub pacing: Duration,
}

/// End-of-run callback, invoked exactly once after every client completed.
pub trait SummaryHook {
    type Output;

    fn handle_summary(&self, snapshot: &Snapshot) -> Self::Output;
}

impl<F, T> SummaryHook for F
where
    F: Fn(&Snapshot) -> T,
{
    type Output = T;

    fn handle_summary(&self, snapshot: &Snapshot) -> T {
        self(snapshot)
    }
}

/// Owns the metrics and the stop signal for the lifetime of one run.
pub struct LoadEngine {
    config: EngineConfig,
    dataset: FixtureDataset,
    metrics: Arc<MetricsAggregator>,
    stop: StopSignal,
}

impl LoadEngine {
    pub fn new(config: EngineConfig, dataset: FixtureDataset, sample_limit: usize) -> Self {
        Self {
            config,
            dataset,
            metrics: Arc::new(MetricsAggregator::new(sample_limit)),
            stop: StopSignal::new(),
        }
    }

    /// Handle for stopping the run early (e.g. on Ctrl-C).
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run every client to completion, snapshot the metrics and pass the
    /// snapshot to `hook`, returning whatever the hook returns.
    pub async fn run<B, H>(self, body: Arc<B>, hook: &H) -> Result<H::Output, EngineError>
    where
        B: IterationBody,
        H: SummaryHook,
    {
        if self.config.clients == 0 {
            return Err(EngineError::NoClients);
        }

        let started_at = Utc::now();
        let deadline = Instant::now() + self.config.duration;

        info!(
            clients = self.config.clients,
            duration_ms = self.config.duration.as_millis() as u64,
            pacing_ms = self.config.pacing.as_millis() as u64,
            records = self.dataset.len(),
            "Load test starting"
        );

        let timer = {
            let stop = self.stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = time::sleep_until(deadline) => {
                        info!("Test duration elapsed, no new iterations will start");
                        stop.raise();
                    }
                    _ = stop.raised() => {}
                }
            })
        };

        let mut handles = Vec::with_capacity(self.config.clients);
        for client_index in 1..=self.config.clients {
            let body = Arc::clone(&body);
            let dataset = self.dataset.clone();
            let metrics = Arc::clone(&self.metrics);
            let stop = self.stop.clone();
            let worker_config = WorkerConfig {
                client_index,
                pacing: self.config.pacing,
                deadline,
            };

            handles.push(tokio::spawn(async move {
                let record = dataset.record_for_client(client_index);
                run_worker(body.as_ref(), worker_config, record, &metrics, &stop).await
            }));
        }

        // Barrier: the snapshot must observe every client's writes.
        let mut total_iterations = 0;
        for handle in handles {
            match handle.await {
                Ok(client) => total_iterations += client.iterations,
                Err(e) => error!(error = %e, "Client task failed"),
            }
        }

        self.stop.raise();
        if let Err(e) = timer.await {
            error!(error = %e, "Duration timer task failed");
        }

        let snapshot = self.metrics.snapshot(RunInfo {
            clients: self.config.clients,
            duration: self.config.duration,
            pacing: self.config.pacing,
            started_at,
            finished_at: Utc::now(),
        });

        info!(
            iterations = total_iterations,
            elapsed_ms = snapshot.run.elapsed().as_millis() as u64,
            "All clients completed"
        );

        Ok(hook.handle_summary(&snapshot))
    }
}
