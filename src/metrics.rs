//! Run-wide metrics aggregation.
//!
//! The [`MetricsAggregator`] is the only shared-mutable state of a run. Every
//! simulated client writes into it concurrently; once all clients have
//! finished, [`MetricsAggregator::snapshot`] produces an immutable
//! [`Snapshot`] that the threshold evaluator and the report renderer read.
//!
//! Three metric kinds are supported:
//! - rate metrics: pass/fail counts (checks, `http_req_failed`)
//! - counter metrics: a count plus a bounded, deduplicated list of tag samples
//! - trend metrics: duration histograms (see [`crate::percentiles`])

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::percentiles::{PercentileTracker, TrendStats};

/// Aggregate rate metric fed by every named check.
pub const CHECKS_METRIC: &str = "checks";
/// Counter of GraphQL error responses, tagged with the first error message.
pub const GQL_ERRORS_METRIC: &str = "gql_errors";
/// Rate of failed HTTP requests: a transport error or a status outside
/// 200..=399 counts as a pass, so `rate` is the failure fraction.
pub const HTTP_REQ_FAILED_METRIC: &str = "http_req_failed";
/// Counter of HTTP requests attempted.
pub const HTTP_REQS_METRIC: &str = "http_reqs";
/// Trend of HTTP request durations.
pub const HTTP_REQ_DURATION_METRIC: &str = "http_req_duration";
/// Counter of completed iterations.
pub const ITERATIONS_METRIC: &str = "iterations";

/// Default cap on distinct samples kept per counter metric.
pub const DEFAULT_SAMPLE_LIMIT: usize = 10;

#[derive(Default)]
struct RateCell {
    passes: AtomicU64,
    fails: AtomicU64,
}

#[derive(Default)]
struct CounterCell {
    count: AtomicU64,
    samples: Mutex<Vec<String>>,
}

/// Concurrency-safe store of all metrics for one run.
pub struct MetricsAggregator {
    sample_limit: usize,
    rates: RwLock<HashMap<String, Arc<RateCell>>>,
    counters: RwLock<HashMap<String, Arc<CounterCell>>>,
    trends: RwLock<HashMap<String, Arc<PercentileTracker>>>,
}

impl MetricsAggregator {
    /// Create an aggregator keeping at most `sample_limit` distinct samples per counter.
    pub fn new(sample_limit: usize) -> Self {
        Self {
            sample_limit,
            rates: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
            trends: RwLock::new(HashMap::new()),
        }
    }

    pub fn sample_limit(&self) -> usize {
        self.sample_limit
    }

    /// Record one check outcome against the named rate metric.
    pub fn record_check(&self, name: &str, passed: bool) {
        let cell = get_or_create(&self.rates, name);
        if passed {
            cell.passes.fetch_add(1, Ordering::Relaxed);
        } else {
            cell.fails.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Increment the named counter, optionally keeping `tag` as a sample.
    ///
    /// A tag is kept only if it is not already present and fewer than
    /// `sample_limit` samples are held. Duplicates only bump the count.
    pub fn record_count(&self, name: &str, tag: Option<&str>) {
        let cell = get_or_create(&self.counters, name);
        cell.count.fetch_add(1, Ordering::Relaxed);

        let Some(tag) = tag else {
            return;
        };

        let mut samples = cell.samples.lock().unwrap_or_else(PoisonError::into_inner);
        if samples.len() < self.sample_limit && !samples.iter().any(|s| s == tag) {
            samples.push(tag.to_string());
            debug!(metric = name, sample = tag, "Stored counter sample");
        }
    }

    /// Record one observed duration against the named trend metric.
    pub fn record_duration(&self, name: &str, duration: Duration) {
        get_or_create(&self.trends, name).record(duration);
    }

    /// Copy every metric into an immutable snapshot.
    ///
    /// Must only be called once all writers have finished; the engine
    /// guarantees this by joining every client before calling it.
    pub fn snapshot(&self, run: RunInfo) -> Snapshot {
        let rates = read_map(&self.rates)
            .iter()
            .map(|(name, cell)| {
                (
                    name.clone(),
                    RateSnapshot {
                        passes: cell.passes.load(Ordering::Acquire),
                        fails: cell.fails.load(Ordering::Acquire),
                    },
                )
            })
            .collect();

        let counters = read_map(&self.counters)
            .iter()
            .map(|(name, cell)| {
                let samples = cell
                    .samples
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                (
                    name.clone(),
                    CounterSnapshot {
                        count: cell.count.load(Ordering::Acquire),
                        samples,
                    },
                )
            })
            .collect();

        let trends = read_map(&self.trends)
            .iter()
            .filter_map(|(name, tracker)| tracker.stats().map(|stats| (name.clone(), stats)))
            .collect();

        Snapshot {
            run,
            rates,
            counters,
            trends,
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_LIMIT)
    }
}

fn read_map<T>(
    map: &RwLock<HashMap<String, Arc<T>>>,
) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
    map.read().unwrap_or_else(PoisonError::into_inner)
}

/// Fetch a metric cell, creating it on first use.
fn get_or_create<T: Default>(map: &RwLock<HashMap<String, Arc<T>>>, name: &str) -> Arc<T> {
    if let Some(cell) = read_map(map).get(name) {
        return Arc::clone(cell);
    }

    let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(map.entry(name.to_string()).or_default())
}

/// Pass/fail totals of a rate metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateSnapshot {
    pub passes: u64,
    pub fails: u64,
}

impl RateSnapshot {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    /// Fraction of passes, or None when nothing was recorded.
    pub fn rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.passes as f64 / total as f64),
        }
    }

    /// Fraction of fails, or None when nothing was recorded.
    pub fn fail_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.fails as f64 / total as f64),
        }
    }
}

/// Count and kept samples of a counter metric.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub count: u64,
    /// Distinct tags in first-seen order.
    pub samples: Vec<String>,
}

/// Run metadata carried alongside the metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub clients: usize,
    pub duration: Duration,
    pub pacing: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunInfo {
    /// Wall-clock time between start and finish.
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Immutable point-in-time copy of all metrics of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub run: RunInfo,
    pub rates: BTreeMap<String, RateSnapshot>,
    pub counters: BTreeMap<String, CounterSnapshot>,
    pub trends: BTreeMap<String, TrendStats>,
}

impl Snapshot {
    pub fn rate(&self, name: &str) -> Option<&RateSnapshot> {
        self.rates.get(name)
    }

    pub fn counter(&self, name: &str) -> Option<&CounterSnapshot> {
        self.counters.get(name)
    }

    pub fn trend(&self, name: &str) -> Option<&TrendStats> {
        self.trends.get(name)
    }
}
