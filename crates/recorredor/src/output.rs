//! Output formatting and progress reporting

use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use recorrido::{FailureArtifact, Outcome, ResultSink, SuiteReport, TestResult};
use std::sync::Arc;

/// Progress bar fed by the scheduler as results arrive
#[derive(Debug)]
pub struct ProgressSink {
    bar: ProgressBar,
}

impl ProgressSink {
    /// Bar over `total` tests
    #[must_use]
    pub fn new(total: u64, message: &str) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_message(message.to_string());
        Self { bar }
    }

    /// Bar that never draws
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Tests recorded so far
    #[must_use]
    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ResultSink for ProgressSink {
    fn record_result(&self, result: &TestResult) {
        self.bar.set_message(result.test_id.clone());
        self.bar.inc(1);
    }

    fn finish(&self, _report: &SuiteReport) {
        self.bar.finish_and_clear();
    }
}

/// Forwards every record to each inner sink in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl FanoutSink {
    /// Empty fan-out
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ResultSink for FanoutSink {
    fn record_result(&self, result: &TestResult) {
        for sink in &self.sinks {
            sink.record_result(result);
        }
    }

    fn record_artifact(&self, artifact: &FailureArtifact) {
        for sink in &self.sinks {
            sink.record_artifact(artifact);
        }
    }

    fn finish(&self, report: &SuiteReport) {
        for sink in &self.sinks {
            sink.finish(report);
        }
    }
}

/// Writes per-test lines and the suite summary to stderr
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            use_color,
            quiet,
        }
    }

    /// Progress sink for a run of `total` tests
    #[must_use]
    pub fn progress(&self, total: usize, suite: &str) -> ProgressSink {
        if self.quiet || !self.term.is_term() {
            return ProgressSink::hidden();
        }
        ProgressSink::new(total as u64, suite)
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }
        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };
        let _ = self.term.write_line(&styled);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("ℹ").blue().bold().to_string()
        } else {
            "INFO".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print one test line; failures always print
    pub fn test_result(&self, result: &TestResult) {
        let line = format_result(result, self.use_color);
        if result.outcome.is_pass() {
            if !self.quiet {
                let _ = self.term.write_line(&line);
            }
            return;
        }
        let _ = self.term.write_line(&line);
        if let Some(message) = &result.message {
            let _ = self.term.write_line(&format!("      {message}"));
        }
        if let Some(artifact) = &result.artifact {
            let _ = self.term.write_line(&format!("      artifact: {}", artifact.display()));
        }
    }

    /// Print the suite summary
    pub fn summary(&self, report: &SuiteReport) {
        if self.quiet && report.all_passed() {
            return;
        }
        let _ = self.term.write_line("");
        let _ = self.term.write_line(&format_summary(report, self.use_color));
    }
}

/// One line per test: status, id, lane and duration
#[must_use]
pub fn format_result(result: &TestResult, use_color: bool) -> String {
    let status = match (result.outcome, use_color) {
        (Outcome::Pass, true) => style("✓").green().bold().to_string(),
        (Outcome::Fail, true) => style("✗").red().bold().to_string(),
        (Outcome::Error, true) => style("!").yellow().bold().to_string(),
        (Outcome::Pass, false) => "PASS".to_string(),
        (Outcome::Fail, false) => "FAIL".to_string(),
        (Outcome::Error, false) => "ERROR".to_string(),
    };
    format!(
        "{status} {} [{}] {}ms",
        result.test_id,
        result.lane.as_deref().unwrap_or("-"),
        result.duration.as_millis()
    )
}

/// Summary line with pass/fail/error counts
#[must_use]
pub fn format_summary(report: &SuiteReport, use_color: bool) -> String {
    let passed = report.passed_count();
    let failed = report.failed_count();
    let errors = report.error_count();
    let secs = report.duration.as_secs_f64();
    let lanes = report.lanes;
    if !use_color {
        let status = if report.all_passed() {
            "PASSED"
        } else {
            "FAILED"
        };
        return format!(
            "{status} {} tests on {lanes} lane(s) in {secs:.2}s \
             ({passed} passed, {failed} failed, {errors} errors)",
            report.total()
        );
    }
    let passed_style = Style::new().green().bold();
    let failed_style = Style::new().red().bold();
    let error_style = Style::new().yellow().bold();
    let status = if report.all_passed() {
        passed_style.apply_to("PASSED")
    } else {
        failed_style.apply_to("FAILED")
    };
    format!(
        "{status} {} tests on {lanes} lane(s) in {secs:.2}s ({} passed, {} failed, {} errors)",
        report.total(),
        passed_style.apply_to(passed),
        failed_style.apply_to(failed),
        error_style.apply_to(errors),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use recorrido::RecorridoError;
    use std::time::Duration;

    fn report() -> SuiteReport {
        SuiteReport {
            run_id: Default::default(),
            suite: "demo".into(),
            started_at: Default::default(),
            lanes: 2,
            results: vec![
                TestResult::pass("a")
                    .with_lane("lane-0@default")
                    .with_duration(Duration::from_millis(12)),
                TestResult::from_error("b", Outcome::Fail, &RecorridoError::assertion("nope")),
            ],
            duration: Duration::from_millis(1500),
        }
    }

    mod format_tests {
        use super::*;

        #[test]
        fn test_plain_result_line() {
            let r = &report().results[0];
            assert_eq!(format_result(r, false), "PASS a [lane-0@default] 12ms");
        }

        #[test]
        fn test_missing_lane_renders_dash() {
            let r = &report().results[1];
            assert_eq!(format_result(r, false), "FAIL b [-] 0ms");
        }

        #[test]
        fn test_plain_summary() {
            let line = format_summary(&report(), false);
            assert!(line.starts_with("FAILED 2 tests on 2 lane(s) in 1.50s"));
            assert!(line.contains("1 passed, 1 failed, 0 errors"));
        }

        #[test]
        fn test_colored_summary_keeps_counts() {
            let line = console::strip_ansi_codes(&format_summary(&report(), true)).to_string();
            assert!(line.contains("1 passed"));
        }
    }

    mod progress_tests {
        use super::*;

        #[test]
        fn test_sink_counts_results() {
            let sink = ProgressSink::hidden();
            let rep = report();
            for r in &rep.results {
                sink.record_result(r);
            }
            sink.finish(&rep);
            assert_eq!(sink.position(), 2);
        }

        #[test]
        fn test_fanout_reaches_every_sink() {
            let a = Arc::new(recorrido::MemorySink::new());
            let b = Arc::new(ProgressSink::hidden());
            let fanout = FanoutSink::new().with(a.clone()).with(b.clone());
            fanout.record_result(&TestResult::pass("x"));
            assert_eq!(a.results().len(), 1);
            assert_eq!(b.position(), 1);
        }

        #[test]
        fn test_quiet_reporter_hides_progress() {
            let reporter = ProgressReporter::new(false, true);
            let sink = reporter.progress(10, "demo");
            sink.record_result(&TestResult::pass("x"));
            assert_eq!(sink.position(), 1);
        }

        #[test]
        fn test_reporter_methods_do_not_panic() {
            let reporter = ProgressReporter::new(false, false);
            reporter.header("demo");
            reporter.info("running");
            for r in &report().results {
                reporter.test_result(r);
            }
            reporter.summary(&report());
        }
    }
}
