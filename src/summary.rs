//! End-of-run summary hook: renders the report, prints it, writes the HTML
//! artifact and evaluates the thresholds.

use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::engine::SummaryHook;
use crate::metrics::Snapshot;
use crate::report::{self, Report};
use crate::thresholds::{self, Threshold, ThresholdReport};

/// Result of the summary step.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: Report,
    pub thresholds: ThresholdReport,
    /// Where the HTML report was written, if it was.
    pub html_path: Option<PathBuf>,
    pub html_failed: bool,
}

impl RunOutcome {
    /// True when every threshold passed and no report write failed.
    pub fn success(&self) -> bool {
        self.thresholds.passed && !self.html_failed
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }
}

/// Summary hook used by the binary.
pub struct ConsoleSummary {
    thresholds: Vec<Threshold>,
    html_dir: Option<PathBuf>,
}

impl ConsoleSummary {
    /// `html_dir` of None disables the HTML artifact.
    pub fn new(thresholds: Vec<Threshold>, html_dir: Option<PathBuf>) -> Self {
        Self {
            thresholds,
            html_dir,
        }
    }

    /// Render and evaluate without touching stdout.
    pub fn summarize(&self, snapshot: &Snapshot) -> RunOutcome {
        let report = report::render(snapshot);
        let threshold_report = thresholds::evaluate(snapshot, &self.thresholds);

        for result in threshold_report.results.iter().filter(|r| !r.passed) {
            warn!(
                threshold = %result.threshold,
                observed = ?result.observed,
                "Threshold failed"
            );
        }

        let mut html_path = None;
        let mut html_failed = false;
        if let Some(dir) = &self.html_dir {
            match report.write_html(dir) {
                Ok(path) => html_path = Some(path),
                Err(e) => {
                    error!(error = %e, "Failed to write HTML report");
                    html_failed = true;
                }
            }
        }

        RunOutcome {
            report,
            thresholds: threshold_report,
            html_path,
            html_failed,
        }
    }
}

impl SummaryHook for ConsoleSummary {
    type Output = RunOutcome;

    fn handle_summary(&self, snapshot: &Snapshot) -> RunOutcome {
        let outcome = self.summarize(snapshot);

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let printed = writeln!(out, "\n{}", outcome.report.text)
            .and_then(|_| writeln!(out, "{}", outcome.thresholds.render_text()))
            .and_then(|_| out.flush());
        if let Err(e) = printed {
            error!(error = %e, "Failed to print summary");
        }

        info!(
            passed = outcome.thresholds.passed,
            html_report = ?outcome.html_path,
            "Summary complete"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsAggregator, RunInfo, CHECKS_METRIC};
    use crate::thresholds::parse_threshold_list;
    use chrono::Utc;
    use std::time::Duration;

    fn snapshot(passed: bool) -> Snapshot {
        let metrics = MetricsAggregator::default();
        for _ in 0..4 {
            metrics.record_check(CHECKS_METRIC, passed);
        }
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
    fn writes_html_and_passes() {
        let dir = tempfile::tempdir().unwrap();
        let hook = ConsoleSummary::new(
            parse_threshold_list("checks:fail_rate<0.01").unwrap(),
            Some(dir.path().to_path_buf()),
        );

        let outcome = hook.summarize(&snapshot(true));
        assert!(outcome.success());
        assert_eq!(outcome.exit_code(), 0);
        let path = outcome.html_path.unwrap();
        assert!(path.ends_with(&outcome.report.filename));
        assert!(path.exists());
    }

    #[test]
    fn failing_threshold_fails_run() {
        let hook = ConsoleSummary::new(parse_threshold_list("checks:fail_rate<0.01").unwrap(), None);
        let outcome = hook.summarize(&snapshot(false));
        assert!(!outcome.success());
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.html_path.is_none());
    }

    #[test]
    fn unwritable_report_dir_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let hook = ConsoleSummary::new(Vec::new(), Some(blocker));
        let outcome = hook.summarize(&snapshot(true));
        assert!(outcome.thresholds.passed);
        assert!(outcome.html_failed);
        assert!(!outcome.success());
    }
}
