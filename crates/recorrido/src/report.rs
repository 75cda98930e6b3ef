//! Test results, suite reports and result sinks.
//!
//! The scheduler produces exactly one [`TestResult`] per test case and hands
//! each one, plus every [`FailureArtifact`], to an optional [`ResultSink`] as
//! it is recorded. Rendering and upload belong to the sink's owner.

use crate::capture::FailureArtifact;
use crate::config::duration_ms;
use crate::result::{RecorridoError, RecorridoResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Terminal outcome of a test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The test passed
    Pass,
    /// The application under test misbehaved
    Fail,
    /// The environment could not run the test
    Error,
}

impl Outcome {
    /// Whether the outcome counts as success
    #[must_use]
    pub const fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        })
    }
}

/// Result of running a single test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Test identifier
    pub test_id: String,
    /// Outcome
    pub outcome: Outcome,
    /// Test duration
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// Lane the test ran on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lane: Option<String>,
    /// Error message if the test did not pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Innermost error signature if the test did not pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_signature: Option<String>,
    /// Failure artifact directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

impl TestResult {
    /// Create a passing test result
    #[must_use]
    pub fn pass(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            outcome: Outcome::Pass,
            duration: Duration::ZERO,
            lane: None,
            message: None,
            failure_signature: None,
            artifact: None,
        }
    }

    /// Create a non-passing result from the error that ended the test
    #[must_use]
    pub fn from_error(test_id: impl Into<String>, outcome: Outcome, err: &RecorridoError) -> Self {
        Self {
            outcome,
            message: Some(err.to_string()),
            failure_signature: Some(err.root_signature().to_string()),
            ..Self::pass(test_id)
        }
    }

    /// Set duration
    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set lane
    #[must_use]
    pub fn with_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    /// Attach the failure artifact
    #[must_use]
    pub fn with_artifact(mut self, artifact: &FailureArtifact) -> Self {
        self.artifact = Some(artifact.path.clone());
        self
    }
}

/// Aggregated results of one suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Suite name
    pub suite: String,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Lanes used
    pub lanes: usize,
    /// Results in declaration order
    pub results: Vec<TestResult>,
    /// Total duration
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl SuiteReport {
    /// Check if all tests passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_pass())
    }

    /// Count tests with `outcome`
    #[must_use]
    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Count passed tests
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.count(Outcome::Pass)
    }

    /// Count failed tests
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(Outcome::Fail)
    }

    /// Count errored tests
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(Outcome::Error)
    }

    /// Get total test count
    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Results that did not pass
    #[must_use]
    pub fn failures(&self) -> Vec<&TestResult> {
        self.results.iter().filter(|r| !r.outcome.is_pass()).collect()
    }

    /// Look up a result by test id
    #[must_use]
    pub fn result(&self, test_id: &str) -> Option<&TestResult> {
        self.results.iter().find(|r| r.test_id == test_id)
    }

    /// Artifact directories captured during this run, in declaration order
    #[must_use]
    pub fn artifact_paths(&self) -> Vec<&Path> {
        self.results.iter().filter_map(|r| r.artifact.as_deref()).collect()
    }

    /// Pretty JSON
    pub fn to_json(&self) -> RecorridoResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Plain text summary: one line per test, then totals
#[must_use]
pub fn render_summary(report: &SuiteReport) -> String {
    let mut out = String::new();
    for r in &report.results {
        let _ = write!(out, "{:<5} {} ({}ms)", r.outcome, r.test_id, r.duration.as_millis());
        if let Some(lane) = &r.lane {
            let _ = write!(out, " [{lane}]");
        }
        out.push('\n');
        if let Some(msg) = &r.message {
            let _ = writeln!(out, "      {msg}");
        }
        if let Some(artifact) = &r.artifact {
            let _ = writeln!(out, "      artifact: {}", artifact.display());
        }
    }
    let _ = writeln!(
        out,
        "{}: {} passed, {} failed, {} errors, {} total in {}ms",
        report.suite,
        report.passed_count(),
        report.failed_count(),
        report.error_count(),
        report.total(),
        report.duration.as_millis()
    );
    out
}

// =============================================================================
// SINKS
// =============================================================================

/// Receives records as the scheduler produces them, from any lane
pub trait ResultSink: Send + Sync {
    /// A test reached its terminal outcome
    fn record_result(&self, result: &TestResult);

    /// A failure artifact was captured
    fn record_artifact(&self, artifact: &FailureArtifact) {
        let _ = artifact;
    }

    /// The suite finished
    fn finish(&self, report: &SuiteReport) {
        let _ = report;
    }
}

/// Collects records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<TestResult>>,
    artifacts: Mutex<Vec<FailureArtifact>>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Results in arrival order
    #[must_use]
    pub fn results(&self) -> Vec<TestResult> {
        self.results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Artifacts in arrival order
    #[must_use]
    pub fn artifacts(&self) -> Vec<FailureArtifact> {
        self.artifacts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ResultSink for MemorySink {
    fn record_result(&self, result: &TestResult) {
        self.results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(result.clone());
    }

    fn record_artifact(&self, artifact: &FailureArtifact) {
        self.artifacts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(artifact.clone());
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Record<'a> {
    Result(&'a TestResult),
    Artifact(&'a FailureArtifact),
    Summary {
        run_id: Uuid,
        suite: &'a str,
        passed: usize,
        failed: usize,
        errors: usize,
        duration_ms: u64,
    },
}

/// Writes one JSON object per line
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

impl JsonLinesSink {
    /// Wrap a writer
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Append to a file, creating it if needed
    pub fn create(path: impl Into<PathBuf>) -> RecorridoResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(file))
    }

    fn emit(&self, record: &Record<'_>) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "result record not serializable");
                return;
            }
        };
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            tracing::warn!(error = %e, "result sink write failed");
        }
    }
}

impl ResultSink for JsonLinesSink {
    fn record_result(&self, result: &TestResult) {
        self.emit(&Record::Result(result));
    }

    fn record_artifact(&self, artifact: &FailureArtifact) {
        self.emit(&Record::Artifact(artifact));
    }

    fn finish(&self, report: &SuiteReport) {
        self.emit(&Record::Summary {
            run_id: report.run_id,
            suite: &report.suite,
            passed: report.passed_count(),
            failed: report.failed_count(),
            errors: report.error_count(),
            duration_ms: report.duration.as_millis() as u64,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn report() -> SuiteReport {
        SuiteReport {
            run_id: Uuid::new_v4(),
            suite: "smoke".into(),
            started_at: Utc::now(),
            lanes: 2,
            results: vec![
                TestResult::pass("a")
                    .with_duration(Duration::from_millis(12))
                    .with_lane("lane-0@default"),
                TestResult::from_error("b", Outcome::Fail, &RecorridoError::assertion("bad total")),
                TestResult::from_error(
                    "c",
                    Outcome::Error,
                    &RecorridoError::Provisioning {
                        lane: "lane-1@default".into(),
                        attempts: 3,
                        message: "no device".into(),
                    },
                ),
            ],
            duration: Duration::from_millis(40),
        }
    }

    /// Writer that shares its buffer with the test
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    mod report_tests {
        use super::*;

        #[test]
        fn test_counts() {
            let r = report();
            assert_eq!(r.passed_count(), 1);
            assert_eq!(r.failed_count(), 1);
            assert_eq!(r.error_count(), 1);
            assert!(!r.all_passed());
            assert_eq!(r.failures().len(), 2);
            assert!(r.artifact_paths().is_empty());
            assert_eq!(
                r.result("c").unwrap().failure_signature.as_deref(),
                Some("provisioning")
            );
        }

        #[test]
        fn test_json_uses_millis() {
            let json = report().to_json().unwrap();
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value["duration_ms"], 40);
            assert_eq!(value["results"][0]["outcome"], "pass");
            assert_eq!(value["results"][0]["duration_ms"], 12);
            let back: SuiteReport = serde_json::from_str(&json).unwrap();
            assert_eq!(back.results, report().results);
        }

        #[test]
        fn test_summary_text() {
            let text = render_summary(&report());
            assert!(text.contains("pass  a (12ms) [lane-0@default]"));
            assert!(text.contains("Assertion failed: bad total"));
            assert!(text.contains("smoke: 1 passed, 1 failed, 1 errors, 3 total"));
        }
    }

    mod sink_tests {
        use super::*;

        #[test]
        fn test_memory_sink() {
            let sink = MemorySink::new();
            sink.record_result(&TestResult::pass("a"));
            assert_eq!(sink.results().len(), 1);
            assert!(sink.artifacts().is_empty());
        }

        #[test]
        fn test_json_lines_sink() {
            let buf = Shared::default();
            let sink = JsonLinesSink::new(buf.clone());
            let r = report();
            for result in &r.results {
                sink.record_result(result);
            }
            sink.finish(&r);

            let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
            let lines: Vec<serde_json::Value> = text
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect();
            assert_eq!(lines.len(), 4);
            assert_eq!(lines[0]["type"], "result");
            assert_eq!(lines[1]["outcome"], "fail");
            assert_eq!(lines[3]["type"], "summary");
            assert_eq!(lines[3]["errors"], 1);
        }

        #[test]
        fn test_json_lines_file() {
            let dir = tempfile::TempDir::new().unwrap();
            let path = dir.path().join("out/results.jsonl");
            let sink = JsonLinesSink::create(&path).unwrap();
            sink.record_result(&TestResult::pass("a"));
            drop(sink);
            let text = std::fs::read_to_string(path).unwrap();
            assert!(text.contains("\"test_id\":\"a\""));
        }
    }
}
