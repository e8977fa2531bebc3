use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info};

use crate::data_source::Record;
use crate::metrics::{MetricsAggregator, ITERATIONS_METRIC};

/// Lifecycle of a simulated client. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Running,
    Completed,
}

/// One simulated user of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedClient {
    /// 1-based ordinal.
    pub index: usize,
    pub state: ClientState,
    pub iterations: u64,
}

impl SimulatedClient {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: ClientState::Idle,
            iterations: 0,
        }
    }
}

/// The test body executed once per iteration.
///
/// Implementations must absorb every failure into metric updates; nothing
/// is returned to the calling client loop.
#[async_trait]
pub trait IterationBody: Send + Sync + 'static {
    async fn run(&self, client_index: usize, record: &Record, metrics: &MetricsAggregator);
}

/// Advisory "stop starting new iterations" flag shared by all clients.
///
/// Raising it never interrupts an in-flight iteration; it only cuts short
/// pacing sleeps and prevents the next iteration from starting.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been raised.
    pub async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so wait_for cannot fail here.
        let _ = rx.wait_for(|raised| *raised).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for one client task.
pub struct WorkerConfig {
    pub client_index: usize,
    pub pacing: Duration,
    pub deadline: Instant,
}

/// Runs one simulated client until the deadline passes or the stop signal is raised.
///
/// Each pass executes one iteration and then sleeps for the pacing interval.
/// The deadline is only checked between iterations, so an iteration that
/// straddles it is allowed to finish.
pub async fn run_worker<B: IterationBody + ?Sized>(
    body: &B,
    config: WorkerConfig,
    record: &Record,
    metrics: &MetricsAggregator,
    stop: &StopSignal,
) -> SimulatedClient {
    let mut client = SimulatedClient::new(config.client_index);
    client.state = ClientState::Running;

    debug!(
        client = client.index,
        pacing_ms = config.pacing.as_millis() as u64,
        "Client starting"
    );

    loop {
        if stop.is_raised() || Instant::now() >= config.deadline {
            break;
        }

        body.run(client.index, record, metrics).await;
        metrics.record_count(ITERATIONS_METRIC, None);
        client.iterations += 1;

        if config.pacing.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        // Never sleep past the deadline; the loop head decides whether to go on.
        let wake_at = (Instant::now() + config.pacing).min(config.deadline);
        tokio::select! {
            _ = time::sleep_until(wake_at) => {}
            _ = stop.raised() => {}
        }
    }

    client.state = ClientState::Completed;
    info!(
        client = client.index,
        iterations = client.iterations,
        "Client completed"
    );
    client
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingBody {
        calls: AtomicU64,
    }

    #[async_trait]
    impl IterationBody for CountingBody {
        async fn run(&self, _client_index: usize, _record: &Record, metrics: &MetricsAggregator) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            metrics.record_check("ok", true);
        }
    }

    fn counting_body() -> CountingBody {
        CountingBody {
            calls: AtomicU64::new(0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_deadline_with_pacing() {
        let body = counting_body();
        let metrics = MetricsAggregator::default();
        let stop = StopSignal::new();
        let config = WorkerConfig {
            client_index: 1,
            pacing: Duration::from_secs(1),
            deadline: Instant::now() + Duration::from_secs(3),
        };

        let client = run_worker(&body, config, &Record::new(), &metrics, &stop).await;

        assert_eq!(client.state, ClientState::Completed);
        assert_eq!(client.iterations, 3);
        assert_eq!(body.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn raised_signal_prevents_any_iteration() {
        let body = counting_body();
        let metrics = MetricsAggregator::default();
        let stop = StopSignal::new();
        stop.raise();

        let config = WorkerConfig {
            client_index: 2,
            pacing: Duration::from_secs(1),
            deadline: Instant::now() + Duration::from_secs(60),
        };
        let client = run_worker(&body, config, &Record::new(), &metrics, &stop).await;

        assert_eq!(client.iterations, 0);
        assert_eq!(client.state, ClientState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn raising_signal_cuts_pacing_sleep() {
        let body = Arc::new(counting_body());
        let metrics = Arc::new(MetricsAggregator::default());
        let stop = StopSignal::new();

        let handle = {
            let (body, metrics, stop) = (Arc::clone(&body), Arc::clone(&metrics), stop.clone());
            tokio::spawn(async move {
                let config = WorkerConfig {
                    client_index: 1,
                    pacing: Duration::from_secs(3600),
                    deadline: Instant::now() + Duration::from_secs(7200),
                };
                run_worker(body.as_ref(), config, &Record::new(), &metrics, &stop).await
            })
        };

        time::sleep(Duration::from_secs(5)).await;
        let raised_at = Instant::now();
        stop.raise();
        let client = handle.await.unwrap();

        assert_eq!(client.iterations, 1);
        assert!(raised_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn new_client_is_idle() {
        let client = SimulatedClient::new(4);
        assert_eq!(client.state, ClientState::Idle);
        assert_eq!(client.iterations, 0);
    }
}
