//! Latency trend tracking using HDR Histogram.
//!
//! Trend metrics (such as `http_req_duration`) keep every observation in an
//! HdrHistogram so that the end-of-run summary and the threshold evaluator
//! can ask for arbitrary percentiles without storing raw samples.

use hdrhistogram::Histogram;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Highest trackable value: 60 seconds, in microseconds.
const MAX_TRACKABLE_US: u64 = 60_000_000;

fn us_to_ms(us: u64) -> f64 {
    us as f64 / 1000.0
}

/// Frozen copy of a trend metric. All accessors return milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendStats {
    histogram: Histogram<u64>,
}

impl TrendStats {
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn avg(&self) -> f64 {
        self.histogram.mean() / 1000.0
    }

    pub fn min(&self) -> f64 {
        us_to_ms(self.histogram.min())
    }

    pub fn med(&self) -> f64 {
        self.percentile(50.0)
    }

    pub fn max(&self) -> f64 {
        us_to_ms(self.histogram.max())
    }

    /// Value at a percentile between 0 and 100.
    pub fn percentile(&self, pct: f64) -> f64 {
        let quantile = (pct / 100.0).clamp(0.0, 1.0);
        us_to_ms(self.histogram.value_at_quantile(quantile))
    }
}

/// Thread-safe duration histogram.
///
/// Observations are stored in microseconds, from 1µs to 60s with 3
/// significant digits; out-of-range values are clamped.
pub struct PercentileTracker {
    histogram: Mutex<Histogram<u64>>,
}

impl PercentileTracker {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3)
            .expect("Failed to create histogram");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    /// Record one observed duration.
    pub fn record(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(MAX_TRACKABLE_US);
        let clamped = micros.clamp(1, MAX_TRACKABLE_US);

        let mut hist = self.histogram.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = hist.record(clamped) {
            warn!(
                latency_us = micros,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    /// Frozen statistics, or None if nothing has been recorded.
    pub fn stats(&self) -> Option<TrendStats> {
        let hist = self.histogram.lock().unwrap_or_else(PoisonError::into_inner);

        if hist.is_empty() {
            return None;
        }

        Some(TrendStats {
            histogram: hist.clone(),
        })
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new()
    }
}
