//! Run-wide pass/fail criteria evaluated against the final snapshot.
//!
//! A threshold names a metric and an expression such as `fail_rate<0.01`
//! or `p(95)<800`. Supported aggregations:
//!
//! | aggregation | applies to | value |
//! |-------------|------------|-------|
//! | `rate` | rate | passes / total |
//! | `fail_rate` | rate | fails / total |
//! | `count` | counter, trend | number of observations |
//! | `avg`, `min`, `med`, `max`, `p(N)` | trend | milliseconds |
//!
//! Evaluation is fail-closed: a missing metric, an aggregation that does not
//! apply to the metric, or a rate with no observations fails the threshold.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

use crate::metrics::Snapshot;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdParseError {
    #[error("Invalid threshold expression '{expr}' for metric '{metric}'")]
    InvalidExpression { metric: String, expr: String },

    #[error("Invalid threshold entry '{0}'. Expected 'metric:expression'")]
    InvalidEntry(String),

    #[error("Percentile {0} is out of range (0-100)")]
    PercentileOutOfRange(f64),
}

fn expression_regex() -> &'static Regex {
    static EXPRESSION: OnceLock<Regex> = OnceLock::new();
    EXPRESSION.get_or_init(|| {
        Regex::new(
            r"^\s*(rate|fail_rate|count|avg|min|med|max|p\(\s*(\d+(?:\.\d+)?)\s*\))\s*(<=|>=|==|!=|<|>)\s*(-?\d+(?:\.\d+)?)\s*$",
        )
        .expect("threshold pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    FailRate,
    Count,
    Avg,
    Min,
    Med,
    Max,
    Percentile(f64),
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::FailRate => f.write_str("fail_rate"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "<" => Comparator::Lt,
            "<=" => Comparator::Le,
            ">" => Comparator::Gt,
            ">=" => Comparator::Ge,
            "==" => Comparator::Eq,
            "!=" => Comparator::Ne,
            _ => return None,
        })
    }

    pub fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparator::Lt => observed < limit,
            Comparator::Le => observed <= limit,
            Comparator::Gt => observed > limit,
            Comparator::Ge => observed >= limit,
            Comparator::Eq => observed == limit,
            Comparator::Ne => observed != limit,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        })
    }
}

/// One pass/fail criterion over one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub aggregation: Aggregation,
    pub comparator: Comparator,
    pub limit: f64,
}

impl Threshold {
    pub fn parse(metric: &str, expr: &str) -> Result<Self, ThresholdParseError> {
        let invalid = || ThresholdParseError::InvalidExpression {
            metric: metric.to_string(),
            expr: expr.to_string(),
        };

        let metric = metric.trim();
        if metric.is_empty() {
            return Err(invalid());
        }

        let caps = expression_regex().captures(expr).ok_or_else(invalid)?;

        let aggregation = match &caps[1] {
            "rate" => Aggregation::Rate,
            "fail_rate" => Aggregation::FailRate,
            "count" => Aggregation::Count,
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "med" => Aggregation::Med,
            "max" => Aggregation::Max,
            _ => {
                let pct: f64 = caps[2].parse().map_err(|_| invalid())?;
                if !(0.0..=100.0).contains(&pct) {
                    return Err(ThresholdParseError::PercentileOutOfRange(pct));
                }
                Aggregation::Percentile(pct)
            }
        };
        let comparator = Comparator::parse(&caps[3]).ok_or_else(invalid)?;
        let limit: f64 = caps[4].parse().map_err(|_| invalid())?;

        Ok(Self {
            metric: metric.to_string(),
            aggregation,
            comparator,
            limit,
        })
    }

    /// The metric's value for this threshold's aggregation, if it applies.
    pub fn observe(&self, snapshot: &Snapshot) -> Option<f64> {
        let name = self.metric.as_str();
        match self.aggregation {
            Aggregation::Rate => snapshot.rate(name)?.rate(),
            Aggregation::FailRate => snapshot.rate(name)?.fail_rate(),
            Aggregation::Count => snapshot
                .counter(name)
                .map(|c| c.count as f64)
                .or_else(|| snapshot.trend(name).map(|t| t.count() as f64)),
            Aggregation::Avg => snapshot.trend(name).map(|t| t.avg()),
            Aggregation::Min => snapshot.trend(name).map(|t| t.min()),
            Aggregation::Med => snapshot.trend(name).map(|t| t.med()),
            Aggregation::Max => snapshot.trend(name).map(|t| t.max()),
            Aggregation::Percentile(p) => snapshot.trend(name).map(|t| t.percentile(p)),
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}{}{}",
            self.metric, self.aggregation, self.comparator, self.limit
        )
    }
}

/// Parses `metric:expr` entries separated by `;`.
///
/// The expression never contains a colon, so the last colon of each entry
/// separates it from the metric name.
pub fn parse_threshold_list(s: &str) -> Result<Vec<Threshold>, ThresholdParseError> {
    s.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (metric, expr) = entry
                .rsplit_once(':')
                .ok_or_else(|| ThresholdParseError::InvalidEntry(entry.to_string()))?;
            Threshold::parse(metric, expr)
        })
        .collect()
}

/// Thresholds applied when none are configured.
pub fn default_thresholds() -> Vec<Threshold> {
    vec![
        Threshold {
            metric: crate::metrics::CHECKS_METRIC.to_string(),
            aggregation: Aggregation::FailRate,
            comparator: Comparator::Lt,
            limit: 0.01,
        },
        Threshold {
            metric: crate::metrics::HTTP_REQ_DURATION_METRIC.to_string(),
            aggregation: Aggregation::Percentile(95.0),
            comparator: Comparator::Lt,
            limit: 800.0,
        },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub threshold: Threshold,
    /// None when the metric is missing or the aggregation does not apply.
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdReport {
    pub passed: bool,
    pub results: Vec<ThresholdResult>,
}

impl ThresholdReport {
    /// Plain-text block listing every threshold and its outcome.
    pub fn render_text(&self) -> String {
        let mut out = String::from("  thresholds:\n");
        if self.results.is_empty() {
            out.push_str("    (none)\n");
        }
        for result in &self.results {
            let observed = result
                .observed
                .map(|v| format!("{:.4}", v))
                .unwrap_or_else(|| "missing".to_string());
            out.push_str(&format!(
                "    {} {} (observed {})\n",
                if result.passed { "✓" } else { "✗" },
                result.threshold,
                observed
            ));
        }
        out.push_str(&format!(
            "  result: {}\n",
            if self.passed { "PASSED" } else { "FAILED" }
        ));
        out
    }
}

/// Evaluate every threshold, in order, against the snapshot.
pub fn evaluate(snapshot: &Snapshot, thresholds: &[Threshold]) -> ThresholdReport {
    let results: Vec<ThresholdResult> = thresholds
        .iter()
        .map(|threshold| {
            let observed = threshold.observe(snapshot);
            let passed = observed
                .map(|value| threshold.comparator.holds(value, threshold.limit))
                .unwrap_or(false);
            ThresholdResult {
                threshold: threshold.clone(),
                observed,
                passed,
            }
        })
        .collect();

    ThresholdReport {
        passed: results.iter().all(|r| r.passed),
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsAggregator, RunInfo};
    use chrono::Utc;
    use std::time::Duration;

    fn snapshot(build: impl FnOnce(&MetricsAggregator)) -> Snapshot {
        let metrics = MetricsAggregator::default();
        build(&metrics);
        let now = Utc::now();
        metrics.snapshot(RunInfo {
            clients: 1,
            duration: Duration::from_secs(1),
            pacing: Duration::from_secs(1),
            started_at: now,
            finished_at: now,
        })
    }

    #[test]
    fn parses_expressions() {
        let t = Threshold::parse("checks", "fail_rate<0.01").unwrap();
        assert_eq!(t.aggregation, Aggregation::FailRate);
        assert_eq!(t.comparator, Comparator::Lt);
        assert_eq!(t.limit, 0.01);

        let t = Threshold::parse("http_req_duration", " p(99.9) <= 1500 ").unwrap();
        assert_eq!(t.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(t.comparator, Comparator::Le);
    }

    #[test]
    fn rejects_bad_expressions() {
        assert!(Threshold::parse("checks", "rate<<1").is_err());
        assert!(Threshold::parse("checks", "median<1").is_err());
        assert!(Threshold::parse("", "rate<1").is_err());
        assert_eq!(
            Threshold::parse("d", "p(150)<1").unwrap_err(),
            ThresholdParseError::PercentileOutOfRange(150.0)
        );
    }

    #[test]
    fn parses_lists_with_colons_in_names() {
        let list = parse_threshold_list("checks:fail_rate<0.01; svc:login:count>=1 ;").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].metric, "svc:login");
        assert_eq!(list[1].aggregation, Aggregation::Count);

        assert!(matches!(
            parse_threshold_list("checks").unwrap_err(),
            ThresholdParseError::InvalidEntry(_)
        ));
    }

    #[test]
    fn failure_rate_below_one_percent() {
        let snap = snapshot(|m| {
            for _ in 0..3 {
                m.record_check("no GraphQL errors", false);
            }
        });
        let thresholds = parse_threshold_list("no GraphQL errors:fail_rate<0.01").unwrap();

        let report = evaluate(&snap, &thresholds);
        assert!(!report.passed);
        assert_eq!(report.results[0].observed, Some(1.0));
    }

    #[test]
    fn passing_thresholds() {
        let snap = snapshot(|m| {
            for _ in 0..200 {
                m.record_check("checks", true);
                m.record_duration("http_req_duration", Duration::from_millis(20));
            }
            m.record_count("gql_errors", Some("E1"));
        });
        let thresholds =
            parse_threshold_list("checks:rate>0.99;http_req_duration:p(95)<800;gql_errors:count<5")
                .unwrap();

        let report = evaluate(&snap, &thresholds);
        assert!(report.passed, "{:?}", report);
        assert!(report.results.iter().all(|r| r.observed.is_some()));
    }

    #[test]
    fn missing_metric_fails_closed() {
        let snap = snapshot(|_| {});
        let report = evaluate(&snap, &default_thresholds());
        assert!(!report.passed);
        assert!(report.results.iter().all(|r| r.observed.is_none() && !r.passed));
    }

    #[test]
    fn wrong_kind_fails_closed() {
        let snap = snapshot(|m| m.record_check("checks", true));
        let report = evaluate(&snap, &parse_threshold_list("checks:p(95)<1").unwrap());
        assert!(!report.passed);
    }

    #[test]
    fn empty_threshold_list_passes() {
        let report = evaluate(&snapshot(|_| {}), &[]);
        assert!(report.passed);
        assert!(report.render_text().contains("(none)"));
    }

    #[test]
    fn renders_outcomes() {
        let snap = snapshot(|m| m.record_check("checks", true));
        let report = evaluate(&snap, &parse_threshold_list("checks:fail_rate<0.01").unwrap());
        let text = report.render_text();
        assert!(text.contains("✓ checks: fail_rate<0.01 (observed 0.0000)"), "{}", text);
        assert!(text.contains("result: PASSED"));
    }
}
