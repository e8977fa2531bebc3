//! End-of-run report rendering: a plain-text summary for stdout and a
//! self-contained HTML page.
//!
//! Rendering is a pure function of the [`Snapshot`], so rendering the same
//! snapshot twice yields byte-identical output.

use chrono::SecondsFormat;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::metrics::{
    CounterSnapshot, RateSnapshot, Snapshot, CHECKS_METRIC, GQL_ERRORS_METRIC,
    HTTP_REQ_FAILED_METRIC,
};
use crate::percentiles::TrendStats;
use crate::utils::format_duration;

const CHART_JS_CDN: &str = "https://cdn.jsdelivr.net/npm/chart.js";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to create report directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write report '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Rendered report artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub text: String,
    pub html: String,
    pub filename: String,
}

impl Report {
    /// Write the HTML document into `dir`, returning the full path.
    pub fn write_html(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(dir).map_err(|source| ReportError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(&self.filename);
        fs::write(&path, &self.html).map_err(|source| ReportError::Write {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), bytes = self.html.len(), "HTML report written");
        Ok(path)
    }
}

pub fn render(snapshot: &Snapshot) -> Report {
    let text = render_text(snapshot);
    let html = render_html(snapshot, &text);
    Report {
        text,
        html,
        filename: report_filename(snapshot),
    }
}

/// `summary-<finish time>.html`, with `:` and `.` made filesystem-safe.
pub fn report_filename(snapshot: &Snapshot) -> String {
    let stamp = snapshot
        .run
        .finished_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("summary-{}.html", stamp)
}

enum MetricRef<'a> {
    Rate(&'a RateSnapshot),
    Counter(&'a CounterSnapshot),
    Trend(&'a TrendStats),
}

/// Every metric of the snapshot, sorted by name.
fn sorted_metrics(snapshot: &Snapshot) -> Vec<(&str, MetricRef<'_>)> {
    let mut metrics: Vec<(&str, MetricRef<'_>)> = snapshot
        .rates
        .iter()
        .map(|(name, rate)| (name.as_str(), MetricRef::Rate(rate)))
        .chain(
            snapshot
                .counters
                .iter()
                .map(|(name, counter)| (name.as_str(), MetricRef::Counter(counter))),
        )
        .chain(
            snapshot
                .trends
                .iter()
                .map(|(name, trend)| (name.as_str(), MetricRef::Trend(trend))),
        )
        .collect();
    metrics.sort_by(|a, b| a.0.cmp(b.0));
    metrics
}

fn percent(rate: &RateSnapshot) -> String {
    format!("{:.2}%", rate.rate().unwrap_or(0.0) * 100.0)
}

fn render_text(snapshot: &Snapshot) -> String {
    let run = &snapshot.run;
    let mut out = String::new();

    let _ = writeln!(out, "  execution: local");
    let _ = writeln!(out, "     clients......: {}", run.clients);
    let _ = writeln!(out, "     duration.....: {}", format_duration(run.duration));
    let _ = writeln!(out, "     pacing.......: {}", format_duration(run.pacing));
    let _ = writeln!(
        out,
        "     started......: {}",
        run.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    let _ = writeln!(
        out,
        "     finished.....: {}",
        run.finished_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    out.push('\n');

    let metrics = sorted_metrics(snapshot);
    let width = metrics
        .iter()
        .map(|(name, _)| name.chars().count())
        .max()
        .unwrap_or(0)
        + 3;
    let elapsed_secs = run.elapsed().as_secs_f64();

    for (name, metric) in metrics {
        let dots = ".".repeat(width - name.chars().count());
        let value = match metric {
            MetricRef::Rate(rate) => {
                format!("{} ✓ {} ✗ {}", percent(rate), rate.passes, rate.fails)
            }
            MetricRef::Counter(counter) => {
                let per_sec = if elapsed_secs > 0.0 {
                    counter.count as f64 / elapsed_secs
                } else {
                    0.0
                };
                format!("{} {:.2}/s", counter.count, per_sec)
            }
            MetricRef::Trend(trend) => format!(
                "avg={:.2}ms min={:.2}ms med={:.2}ms max={:.2}ms p(90)={:.2}ms p(95)={:.2}ms p(99)={:.2}ms",
                trend.avg(),
                trend.min(),
                trend.med(),
                trend.max(),
                trend.percentile(90.0),
                trend.percentile(95.0),
                trend.percentile(99.0)
            ),
        };
        let _ = writeln!(out, "     {}{}: {}", name, dots, value);

        if let MetricRef::Counter(counter) = metric {
            for sample in &counter.samples {
                let _ = writeln!(out, "       - {}", sample);
            }
        }
    }

    out
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn render_html(snapshot: &Snapshot, text: &str) -> String {
    // Named checks only. The `checks` aggregate would double every count and
    // `http_req_failed` counts failures as passes.
    let checks: Vec<(&String, &RateSnapshot)> = snapshot
        .rates
        .iter()
        .filter(|(name, _)| !matches!(name.as_str(), CHECKS_METRIC | HTTP_REQ_FAILED_METRIC))
        .collect();
    let pass_total: u64 = checks.iter().map(|(_, r)| r.passes).sum();
    let fail_total: u64 = checks.iter().map(|(_, r)| r.fails).sum();

    let mut rows = String::new();
    for (name, rate) in &checks {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td class=\"pass\">{}</td><td class=\"fail\">{}</td><td>{}</td></tr>",
            html_escape(name),
            rate.passes,
            rate.fails,
            percent(rate)
        );
    }

    let error_panel = match snapshot.counter(GQL_ERRORS_METRIC) {
        Some(counter) if !counter.samples.is_empty() => {
            let items: String = counter
                .samples
                .iter()
                .map(|sample| format!("<li>{}</li>", html_escape(sample)))
                .collect();
            format!(
                "<h2>GraphQL Error Samples</h2><div class=\"errors\"><ul>{}</ul></div>",
                items
            )
        }
        _ => String::new(),
    };

    format!(
        r#"<!DOCTYPE html><html lang="en"><head><meta charset="utf-8">
<title>GraphQL Load Test Summary</title>
<script src="{cdn}"></script>
<style>
 body{{font-family:Arial,serif;margin:2rem;color:#222}}
 h1{{color:#0076d7}}
 .chart{{width:300px;margin:auto}}
 .scroll{{max-height:300px;overflow-y:auto;border:1px solid #ddd;border-radius:6px}}
 table{{width:100%;border-collapse:collapse}}
 th,td{{padding:8px 12px;border-bottom:1px solid #eee;text-align:left}}
 th{{background:#f5f5f5;position:sticky;top:0}}
 .pass{{color:#090;font-weight:bold}}.fail{{color:#c00;font-weight:bold}}
 .errors{{background:#fff7f7;padding:1rem;border:1px solid #f3c2c2;border-radius:6px}}
</style></head><body>
<h1>GraphQL Load Test Summary</h1>

<h2>High-level Metrics</h2>
<pre>{text}</pre>

<h2>Checks – Pass vs Fail</h2>
<div class="chart"><canvas id="pie"></canvas></div>

<h2>Detailed Checks</h2>
<div class="scroll">
<table>
<thead><tr><th>Check</th><th>Passes</th><th>Fails</th><th>Pass Rate</th></tr></thead>
<tbody>
{rows}
</tbody>
</table>
</div>

{error_panel}

<script>
new Chart(document.getElementById('pie'),{{
  type:'pie',
  data:{{labels:['Pass','Fail'],datasets:[{{data:[{pass_total},{fail_total}]}}]}},
  options:{{plugins:{{legend:{{position:'bottom'}}}}}}
}});
</script>
</body></html>
"#,
        cdn = CHART_JS_CDN,
        text = html_escape(text),
        rows = rows,
        error_panel = error_panel,
        pass_total = pass_total,
        fail_total = fail_total,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{NO_GRAPHQL_ERRORS, STATUS_IS_200};
    use crate::metrics::{MetricsAggregator, RunInfo, HTTP_REQ_DURATION_METRIC, HTTP_REQS_METRIC};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn run_info() -> RunInfo {
        RunInfo {
            clients: 2,
            duration: Duration::from_secs(10),
            pacing: Duration::from_secs(1),
            started_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap()
                + chrono::Duration::milliseconds(123),
        }
    }

    /// 10 status checks (10 pass), 10 error checks (7 pass, 3 fail) and 10
    /// requests, none failed.
    fn reference_snapshot() -> Snapshot {
        let metrics = MetricsAggregator::default();
        for i in 0..10 {
            metrics.record_check(STATUS_IS_200, true);
            metrics.record_check(CHECKS_METRIC, true);
            let ok = i >= 3;
            metrics.record_check(NO_GRAPHQL_ERRORS, ok);
            metrics.record_check(CHECKS_METRIC, ok);
            metrics.record_check(HTTP_REQ_FAILED_METRIC, false);
            metrics.record_count(HTTP_REQS_METRIC, None);
            metrics.record_duration(HTTP_REQ_DURATION_METRIC, Duration::from_millis(40 + i));
        }
        metrics.record_count(GQL_ERRORS_METRIC, Some("Customer <not> found"));
        metrics.record_count(GQL_ERRORS_METRIC, Some("E2"));
        metrics.record_count(GQL_ERRORS_METRIC, Some("E2"));
        metrics.snapshot(run_info())
    }

    #[test]
    fn pie_totals_exclude_checks_aggregate() {
        let report = render(&reference_snapshot());
        assert!(report.html.contains("data:[17,3]"), "{}", report.html);
        assert!(!report.html.contains("data:[34,6]"));
    }

    #[test]
    fn table_lists_named_checks_only() {
        let report = render(&reference_snapshot());
        assert!(report.html.contains(
            "<tr><td>no GraphQL errors</td><td class=\"pass\">7</td><td class=\"fail\">3</td><td>70.00%</td></tr>"
        ));
        assert!(report.html.contains("<td>status is 200</td>"));
        assert!(!report.html.contains("<td>checks</td>"));
        assert!(!report.html.contains("<td>http_req_failed</td>"));
    }

    #[test]
    fn error_samples_are_escaped() {
        let report = render(&reference_snapshot());
        assert!(report
            .html
            .contains("<ul><li>Customer &lt;not&gt; found</li><li>E2</li></ul>"));
        assert!(!report.html.contains("<not>"));
    }

    #[test]
    fn no_error_panel_without_samples() {
        let metrics = MetricsAggregator::default();
        metrics.record_check(STATUS_IS_200, true);
        let report = render(&metrics.snapshot(run_info()));
        assert!(!report.html.contains("GraphQL Error Samples"));
        assert!(report.html.contains(CHART_JS_CDN));
    }

    #[test]
    fn rendering_is_idempotent() {
        let snapshot = reference_snapshot();
        assert_eq!(render(&snapshot), render(&snapshot));
    }

    #[test]
    fn filename_uses_finish_time() {
        let report = render(&reference_snapshot());
        assert_eq!(report.filename, "summary-2024-05-01T12-00-10-123Z.html");
    }

    #[test]
    fn text_is_sorted_with_dot_leaders() {
        let text = render(&reference_snapshot()).text;
        assert!(text.contains("     clients......: 2"));
        let leader = format!("     checks{}: 85.00% ✓ 17 ✗ 3", ".".repeat(14));
        assert!(text.contains(&leader), "{}", text);
        assert!(text.contains(": 0.00% ✓ 0 ✗ 10"), "{}", text);
        assert!(text.contains("       - Customer <not> found"));

        let order: Vec<usize> = [
            "checks.",
            "gql_errors.",
            "http_req_duration.",
            "http_req_failed.",
            "http_reqs.",
            "no GraphQL errors.",
            "status is 200.",
        ]
        .iter()
        .map(|name| text.find(name).unwrap())
        .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{}", text);
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn writes_html_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let report = render(&reference_snapshot());
        let path = report.write_html(&dir.path().join("reports")).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), report.html);
    }
}
