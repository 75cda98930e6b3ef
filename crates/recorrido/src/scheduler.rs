//! Test Isolation & Parallel Scheduler
//!
//! Runs a [`Suite`] over a [`LanePool`]:
//!
//! ```text
//!  tests (declaration order)          lanes
//!  ┌────┬────┬────┬────┬────┐        ┌─────────┐
//!  │ t0 │ t1 │ t2 │ t3 │ t4 │ ─next─►│ lane-0  │ provision → run → capture? → teardown → Idle
//!  └────┴────┴────┴────┴────┘        │ lane-1  │ ...
//!        AtomicUsize cursor          └─────────┘
//! ```
//!
//! - One worker thread per lane; each worker takes the next test index from
//!   a shared cursor, so a lane that goes idle immediately picks up the next
//!   declared test.
//! - Every test gets a freshly provisioned session and its own
//!   [`TestContext`]; nothing built for one test is reachable from another.
//! - Provisioning is retried a bounded number of times. A lane that never
//!   becomes ready ends the test as [`Outcome::Error`].
//! - A failing test is captured exactly once per run while its lane is
//!   `Capturing`, then the session is torn down and the lane released.
//! - Results are keyed by declaration index, never by completion order.

use crate::cancel::CancelToken;
use crate::capture::{ArtifactStore, CaptureRun, FailureArtifact};
use crate::config::HarnessConfig;
use crate::driver::ElementProvider;
use crate::lane::{LaneClaim, LanePool, LaneProvisioner};
use crate::page_object::PageContext;
use crate::report::{Outcome, ResultSink, SuiteReport, TestResult};
use crate::result::{FailureKind, RecorridoError, RecorridoResult};
use crate::suite::{Suite, TestCase, TestContext};
use chrono::Utc;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Pause between claim attempts when a shared pool is saturated
const CLAIM_BACKOFF: Duration = Duration::from_millis(5);

/// Runs suites over a lane pool
pub struct Scheduler {
    config: HarnessConfig,
    provisioner: Arc<dyn LaneProvisioner>,
    store: ArtifactStore,
    sink: Option<Arc<dyn ResultSink>>,
    targets: Vec<String>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("targets", &self.targets)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler writing artifacts under `config.artifact_dir`
    #[must_use]
    pub fn new(config: HarnessConfig, provisioner: Arc<dyn LaneProvisioner>) -> Self {
        let store = ArtifactStore::new(config.artifact_dir.clone())
            .with_log_tail_lines(config.log_tail_lines);
        Self {
            config,
            provisioner,
            store,
            sink: None,
            targets: Vec::new(),
        }
    }

    /// Device/simulator targets, assigned to lanes round-robin
    #[must_use]
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    /// Forward every record to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The configuration
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Build a pool of `parallelism` lanes over the configured targets
    #[must_use]
    pub fn pool(&self, parallelism: usize) -> LanePool {
        LanePool::new(parallelism, &self.targets)
    }

    /// Run `suite` on a fresh pool of `parallelism` lanes
    pub fn run(&self, suite: &Suite, parallelism: usize) -> RecorridoResult<SuiteReport> {
        let pool = self.pool(parallelism);
        self.run_on(suite, &pool)
    }

    /// Run `suite` on an existing pool
    pub fn run_on(&self, suite: &Suite, pool: &LanePool) -> RecorridoResult<SuiteReport> {
        suite.validate()?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let tests = suite.tests();
        let workers = pool.len().min(tests.len());
        let captures = self.store.begin_run(run_id);

        info!(
            %run_id,
            suite = suite.name(),
            tests = tests.len(),
            lanes = pool.len(),
            "suite started"
        );

        let next = AtomicUsize::new(0);
        let results: Mutex<BTreeMap<usize, TestResult>> = Mutex::new(BTreeMap::new());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(test) = tests.get(index) else {
                        break;
                    };
                    let claim = claim_lane(pool);
                    let result = self.run_test(test, &claim, &captures);
                    drop(claim);
                    if let Some(sink) = &self.sink {
                        sink.record_result(&result);
                    }
                    results
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .insert(index, result);
                });
            }
        });

        let results = results
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .into_values()
            .collect();
        let report = SuiteReport {
            run_id,
            suite: suite.name().to_string(),
            started_at,
            lanes: pool.len(),
            results,
            duration: start.elapsed(),
        };
        info!(
            %run_id,
            passed = report.passed_count(),
            failed = report.failed_count(),
            errors = report.error_count(),
            duration_ms = report.duration.as_millis() as u64,
            "suite finished"
        );
        if let Some(sink) = &self.sink {
            sink.finish(&report);
        }
        Ok(report)
    }

    /// Provision, run, capture and tear down one test on a claimed lane
    fn run_test(
        &self,
        test: &TestCase,
        claim: &LaneClaim<'_>,
        captures: &CaptureRun<'_>,
    ) -> TestResult {
        let lane = claim.id().clone();
        let span = info_span!("test", test_id = test.id(), lane = %lane);
        let _enter = span.enter();
        let start = Instant::now();

        let session = match self.provision(claim) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "lane provisioning failed");
                let artifact = self.capture(captures, claim, None, test.id(), &err);
                return TestResult::from_error(test.id(), Outcome::Error, &err)
                    .with_duration(start.elapsed())
                    .with_lane(lane.to_string())
                    .with_artifact(&artifact);
            }
        };

        if let Err(err) = claim.activate() {
            self.provisioner.teardown(&lane, session);
            return TestResult::from_error(test.id(), Outcome::Error, &err)
                .with_duration(start.elapsed())
                .with_lane(lane.to_string());
        }

        let budget = test.timeout().unwrap_or(self.config.test_timeout);
        let cancel = CancelToken::with_budget(budget);
        let page = PageContext::new(Arc::clone(&session))
            .with_timeout(self.config.default_timeout)
            .with_poll_interval(self.config.default_poll_interval)
            .with_retry(self.config.retry_policy())
            .with_cancel(cancel.clone())
            .with_lane(lane.clone());
        let ctx = TestContext::new(test.id(), lane.clone(), page, cancel);

        debug!("test started");
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| test.run(&ctx))).unwrap_or_else(|payload| {
                Err(RecorridoError::assertion(format!(
                    "test panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        drop(ctx);

        let result = match outcome {
            Ok(()) => TestResult::pass(test.id()),
            Err(err) => {
                let verdict = match err.kind() {
                    FailureKind::Application => Outcome::Fail,
                    FailureKind::Infrastructure => Outcome::Error,
                };
                info!(
                    outcome = %verdict,
                    signature = err.root_signature(),
                    error = %err,
                    "test did not pass"
                );
                let artifact =
                    self.capture(captures, claim, Some(session.as_ref()), test.id(), &err);
                TestResult::from_error(test.id(), verdict, &err).with_artifact(&artifact)
            }
        };

        self.provisioner.teardown(&lane, session);
        let result = result
            .with_duration(start.elapsed())
            .with_lane(lane.to_string());
        info!(
            outcome = %result.outcome,
            duration_ms = result.duration.as_millis() as u64,
            "test finished"
        );
        result
    }

    fn provision(&self, claim: &LaneClaim<'_>) -> RecorridoResult<Arc<dyn ElementProvider>> {
        let lane = claim.id();
        let policy = self.config.provision_policy();
        policy
            .execute(&CancelToken::new(), |attempt| {
                self.provisioner.provision(lane).map_err(|e| {
                    claim.record_provision_failure();
                    warn!(attempt, error = %e, "provisioning attempt failed");
                    e
                })
            })
            .map(|r| r.value)
            .map_err(|e| {
                let (attempts, last) = match e {
                    RecorridoError::RetryExhausted { attempts, last, .. } => (attempts, *last),
                    other => (1, other),
                };
                RecorridoError::Provisioning {
                    lane: lane.to_string(),
                    attempts,
                    message: last.to_string(),
                }
            })
    }

    fn capture(
        &self,
        captures: &CaptureRun<'_>,
        claim: &LaneClaim<'_>,
        session: Option<&dyn ElementProvider>,
        test_id: &str,
        err: &RecorridoError,
    ) -> FailureArtifact {
        if let Err(e) = claim.begin_capture() {
            warn!(error = %e, "lane not in a capturable state");
        }
        let artifact = captures.capture(session, claim.id(), test_id, err);
        if let Some(sink) = &self.sink {
            sink.record_artifact(&artifact);
        }
        artifact
    }
}

fn claim_lane(pool: &LanePool) -> LaneClaim<'_> {
    loop {
        if let Some(claim) = pool.try_claim() {
            return claim;
        }
        std::thread::sleep(CLAIM_BACKOFF);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::lane::{FnProvisioner, LaneId, LaneState};
    use crate::locator::Locator;
    use crate::mock::{ScriptedApp, ScriptedElement};
    use crate::report::MemorySink;
    use crate::retry::BackoffSchedule;
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> HarnessConfig {
        HarnessConfig::default()
            .with_artifact_dir(dir.path())
            .with_default_timeout(Duration::from_millis(100))
            .with_default_poll_interval(Duration::from_millis(2))
            .with_retry_backoff(BackoffSchedule::None)
    }

    fn app_provisioner() -> Arc<dyn LaneProvisioner> {
        Arc::new(FnProvisioner::new(|_: &LaneId| {
            let app = ScriptedApp::builder()
                .screen(
                    "home",
                    [
                        ScriptedElement::new("ok"),
                        ScriptedElement::new("missing").never_appears(),
                    ],
                )
                .build();
            Ok(Arc::new(app) as Arc<dyn ElementProvider>)
        }))
    }

    mod run_tests {
        use super::*;

        #[test]
        fn test_outcomes_in_declaration_order() {
            let dir = TempDir::new().unwrap();
            let sink = Arc::new(MemorySink::new());
            let scheduler = Scheduler::new(config(&dir), app_provisioner()).with_sink(sink.clone());
            let suite = Suite::new("mixed")
                .test("slow_pass", |ctx| {
                    std::thread::sleep(Duration::from_millis(30));
                    ctx.page().tap(&Locator::accessibility_id("ok"))
                })
                .test("times_out", |ctx| {
                    ctx.page().tap(&Locator::accessibility_id("missing"))
                })
                .test("quick_pass", |_| Ok(()));

            let report = scheduler.run(&suite, 3).unwrap();
            let ids: Vec<_> = report.results.iter().map(|r| r.test_id.as_str()).collect();
            assert_eq!(ids, vec!["slow_pass", "times_out", "quick_pass"]);
            assert_eq!(report.passed_count(), 2);
            assert_eq!(report.failed_count(), 1);

            let failed = report.result("times_out").unwrap();
            assert_eq!(failed.failure_signature.as_deref(), Some("element_not_ready"));
            assert!(failed.artifact.as_ref().unwrap().join("manifest.json").exists());
            assert_eq!(report.artifact_paths().len(), 1);
            assert_eq!(sink.results().len(), 3);
            assert_eq!(sink.artifacts().len(), 1);
        }

        #[test]
        fn test_panic_is_a_failure() {
            let dir = TempDir::new().unwrap();
            let scheduler = Scheduler::new(config(&dir), app_provisioner());
            let suite = Suite::new("p").test("boom", |_| panic!("kaboom"));
            let report = scheduler.run(&suite, 1).unwrap();
            let r = &report.results[0];
            assert_eq!(r.outcome, Outcome::Fail);
            assert!(r.message.as_ref().unwrap().contains("kaboom"));
            assert!(r.artifact.is_some());
        }

        #[test]
        fn test_budget_cancels_stuck_wait() {
            let dir = TempDir::new().unwrap();
            let cfg = config(&dir).with_default_timeout(Duration::from_secs(30));
            let scheduler = Scheduler::new(cfg, app_provisioner());
            let suite = Suite::new("b").with_test(
                TestCase::new("stuck", |ctx| {
                    ctx.page().tap(&Locator::accessibility_id("missing"))
                })
                    .with_timeout(Duration::from_millis(80)),
            );
            let start = Instant::now();
            let report = scheduler.run(&suite, 1).unwrap();
            assert!(start.elapsed() < Duration::from_secs(5));
            assert_eq!(report.results[0].outcome, Outcome::Fail);
            assert_eq!(report.results[0].failure_signature.as_deref(), Some("cancelled"));
        }

        #[test]
        fn test_more_tests_than_lanes() {
            let dir = TempDir::new().unwrap();
            let scheduler = Scheduler::new(config(&dir), app_provisioner());
            let mut suite = Suite::new("many");
            for i in 0..12 {
                suite.add_test(TestCase::new(format!("t{i:02}"), |_| {
                    std::thread::sleep(Duration::from_millis(2));
                    Ok(())
                }));
            }
            let pool = scheduler.pool(3);
            let report = scheduler.run_on(&suite, &pool).unwrap();
            assert_eq!(report.total(), 12);
            assert!(report.all_passed());
            assert_eq!(pool.idle_count(), 3);
            let total_runs: u64 = (0..3).map(|i| pool.stats(i).unwrap().tests_run).sum();
            assert_eq!(total_runs, 12);
        }

        #[test]
        fn test_rerun_captures_a_fresh_artifact() {
            let dir = TempDir::new().unwrap();
            let sink = Arc::new(MemorySink::new());
            let scheduler = Scheduler::new(config(&dir), app_provisioner()).with_sink(sink.clone());
            let suite = Suite::new("rerun").test("flaky_login", |ctx| {
                ctx.page().tap(&Locator::accessibility_id("missing"))
            });

            let first = scheduler.run(&suite, 1).unwrap();
            let second = scheduler.run(&suite, 1).unwrap();

            let a = first.results[0].artifact.clone().unwrap();
            let b = second.results[0].artifact.clone().unwrap();
            assert_ne!(a, b);
            assert!(a.join("manifest.json").exists());
            assert!(b.join("manifest.json").exists());
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
            let paths: Vec<_> = sink.artifacts().into_iter().map(|x| x.path).collect();
            assert_eq!(paths, vec![a, b]);
        }

        #[test]
        fn test_duplicate_ids_rejected() {
            let dir = TempDir::new().unwrap();
            let scheduler = Scheduler::new(config(&dir), app_provisioner());
            let suite = Suite::new("dup").test("a", |_| Ok(())).test("a", |_| Ok(()));
            assert!(scheduler.run(&suite, 1).is_err());
        }

        #[test]
        fn test_empty_suite() {
            let dir = TempDir::new().unwrap();
            let scheduler = Scheduler::new(config(&dir), app_provisioner());
            let report = scheduler.run(&Suite::new("none"), 4).unwrap();
            assert_eq!(report.total(), 0);
            assert!(report.all_passed());
        }
    }

    mod provisioning_tests {
        use super::*;

        #[test]
        fn test_flaky_provisioning_recovers() {
            let dir = TempDir::new().unwrap();
            let calls = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&calls);
            let provisioner = Arc::new(FnProvisioner::new(move |_: &LaneId| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RecorridoError::provider("simulator still booting"))
                } else {
                    Ok(Arc::new(ScriptedApp::builder().build()) as Arc<dyn ElementProvider>)
                }
            }));
            let scheduler = Scheduler::new(config(&dir), provisioner);
            let pool = scheduler.pool(1);
            let report = scheduler.run_on(&Suite::new("s").test("a", |_| Ok(())), &pool).unwrap();
            assert!(report.all_passed());
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert_eq!(pool.stats(0).unwrap().provision_failures, 1);
        }

        #[test]
        fn test_provisioning_exhaustion_is_error_not_fail() {
            let dir = TempDir::new().unwrap();
            let calls = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&calls);
            let provisioner = Arc::new(FnProvisioner::new(move |_: &LaneId| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Arc<dyn ElementProvider>, _>(RecorridoError::provider("no devices"))
            }));
            let ran = Arc::new(AtomicU32::new(0));
            let ran_in_body = Arc::clone(&ran);
            let cfg = config(&dir).with_lane_provision_retries(2);
            let scheduler = Scheduler::new(cfg, provisioner);
            let pool = scheduler.pool(1);
            let suite = Suite::new("s").test("never_runs", move |_| {
                ran_in_body.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            let report = scheduler.run_on(&suite, &pool).unwrap();

            let r = &report.results[0];
            assert_eq!(r.outcome, Outcome::Error);
            assert_eq!(r.failure_signature.as_deref(), Some("provisioning"));
            assert!(r.message.as_ref().unwrap().contains("3 attempt(s)"));
            assert_eq!(calls.load(Ordering::SeqCst), 3);
            assert_eq!(ran.load(Ordering::SeqCst), 0);
            assert_eq!(report.artifact_paths().len(), 1);
            assert_eq!(pool.state(0), Some(LaneState::Idle));
        }
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
