//! End-to-end journeys through the scheduler, page objects and flows
//!
//! Every test here drives a fresh [`ScriptedApp`] per lane, so nothing is
//! shared between runs except the artifact directory.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use recorrido::capture::{ArtifactStore, PayloadKind};
use recorrido::mock::{ScriptedApp, ScriptedElement};
use recorrido::prelude::*;
use recorrido::{FnProvisioner, LaneId, LaneProvisioner, LaneState, MemorySink, Outcome};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Page objects
// ============================================================================

struct WelcomePage {
    ctx: PageContext,
    get_started: Locator,
}

impl WelcomePage {
    fn new(ctx: PageContext) -> Self {
        Self {
            ctx,
            get_started: Locator::accessibility_id("get-started"),
        }
    }

    fn open_login(self) -> RecorridoResult<LoginPage> {
        self.ctx.tap(&self.get_started)?;
        LoginPage::new(self.ctx).wait_until_loaded()
    }
}

impl PageObject for WelcomePage {
    fn screen_name(&self) -> &str {
        "welcome"
    }

    fn context(&self) -> &PageContext {
        &self.ctx
    }

    fn is_loaded(&self) -> bool {
        self.ctx.is_present(&self.get_started)
    }
}

struct LoginPage {
    ctx: PageContext,
    email: Locator,
    password: Locator,
    sign_in: Locator,
}

impl LoginPage {
    fn new(ctx: PageContext) -> Self {
        Self {
            ctx,
            email: Locator::accessibility_id("email"),
            password: Locator::accessibility_id("password"),
            sign_in: Locator::accessibility_id("sign-in"),
        }
    }

    fn login(self, email: &str, password: &str) -> RecorridoResult<HomePage> {
        self.ctx.type_text(&self.email, email)?;
        self.ctx.type_text(&self.password, password)?;
        self.ctx.tap(&self.sign_in)?;
        HomePage::new(self.ctx).wait_until_loaded()
    }
}

impl PageObject for LoginPage {
    fn screen_name(&self) -> &str {
        "login"
    }

    fn context(&self) -> &PageContext {
        &self.ctx
    }

    fn is_loaded(&self) -> bool {
        self.ctx.is_present(&self.email)
    }
}

struct HomePage {
    ctx: PageContext,
    greeting: Locator,
}

impl HomePage {
    fn new(ctx: PageContext) -> Self {
        Self {
            ctx,
            greeting: Locator::accessibility_id("greeting"),
        }
    }

    fn greeting(&self) -> RecorridoResult<String> {
        self.ctx.read_text(&self.greeting)
    }
}

impl PageObject for HomePage {
    fn screen_name(&self) -> &str {
        "home"
    }

    fn context(&self) -> &PageContext {
        &self.ctx
    }

    fn is_loaded(&self) -> bool {
        self.ctx.is_present(&self.greeting)
    }
}

fn sign_in_flow() -> Flow<WelcomePage, HomePage> {
    Flow::start("sign in")
        .then("navigateToLogin", WelcomePage::open_login)
        .then("login", |page: LoginPage| {
            page.login("ana@example.com", "hunter2")
        })
        .assert("assertHomeLoaded", |home: &HomePage| {
            let text = home.greeting()?;
            home.context()
                .assert_that(text.contains("ana@example.com"), format!("greeting was {text:?}"))
        })
}

// ============================================================================
// Harness
// ============================================================================

fn provisioner(sign_in: ScriptedElement) -> Arc<dyn LaneProvisioner> {
    Arc::new(FnProvisioner::new(move |lane: &LaneId| {
        let app = ScriptedApp::builder()
            .screen(
                "welcome",
                [ScriptedElement::new("get-started").navigates_to("login")],
            )
            .screen(
                "login",
                [
                    ScriptedElement::new("email"),
                    ScriptedElement::new("password"),
                    sign_in.clone(),
                ],
            )
            .screen(
                "home",
                [ScriptedElement::new("greeting").with_text("Welcome back, ana@example.com")],
            )
            .start_on("welcome")
            .build();
        app.log(format!("provisioned on {lane}"));
        Ok(Arc::new(app) as Arc<dyn ElementProvider>)
    }))
}

fn config(dir: &TempDir) -> HarnessConfig {
    HarnessConfig::default()
        .with_artifact_dir(dir.path())
        .with_default_timeout(Duration::from_millis(150))
        .with_default_poll_interval(Duration::from_millis(5))
}

fn journey_suite() -> Suite {
    Suite::new("journeys").test("sign_in_happy_path", |ctx| {
        let outcome = sign_in_flow().run(WelcomePage::new(ctx.page()))?;
        ctx.page().assert_that(outcome.steps_executed == 3, "all steps ran")
    })
}

#[test]
fn test_sign_in_journey_passes() {
    let dir = TempDir::new().unwrap();
    let sign_in = ScriptedElement::new("sign-in")
        .actionable_after(3)
        .navigates_to("home");
    let scheduler = Scheduler::new(config(&dir), provisioner(sign_in));

    let report = scheduler.run(&journey_suite(), 1).unwrap();
    assert!(report.all_passed(), "{:?}", report.results);
    assert!(report.artifact_paths().is_empty());
}

#[test]
fn test_sign_in_timeout_fails_at_step_two_with_one_artifact() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(MemorySink::new());
    let sign_in = ScriptedElement::new("sign-in").never_appears();
    let scheduler = Scheduler::new(config(&dir), provisioner(sign_in)).with_sink(sink.clone());
    let pool = scheduler.pool(1);

    let report = scheduler.run_on(&journey_suite(), &pool).unwrap();

    let result = &report.results[0];
    assert_eq!(result.outcome, Outcome::Fail);
    assert_eq!(result.failure_signature.as_deref(), Some("element_not_ready"));
    let message = result.message.as_deref().unwrap();
    assert!(message.contains("step 2 (login)"), "{message}");
    assert!(message.contains("~sign-in"), "{message}");

    let artifacts = sink.artifacts();
    assert_eq!(artifacts.len(), 1);
    let artifact = &artifacts[0];
    assert!(artifact.name.starts_with("sign_in_happy_path-"));
    assert_eq!(artifact.failure.step_index, Some(2));
    assert_eq!(artifact.failure.signature, "flow");
    assert!(!artifact.is_degraded(), "{:?}", artifact.capture_errors());
    for kind in [PayloadKind::Screenshot, PayloadKind::TreeDump, PayloadKind::LogTail] {
        assert!(artifact.path.join(kind.file_name()).exists(), "{kind:?} missing");
    }
    let on_disk = ArtifactStore::read_manifest(&artifact.manifest_path()).unwrap();
    assert_eq!(&on_disk, artifact);
    assert_eq!(report.artifact_paths(), vec![artifact.path.as_path()]);

    assert_eq!(pool.state(0), Some(LaneState::Idle));
    assert_eq!(pool.stats(0).unwrap().failures, 1);
}

#[test]
fn test_flaky_sign_in_is_retried_not_failed() {
    let dir = TempDir::new().unwrap();
    let sign_in = ScriptedElement::new("sign-in").rejects(2).navigates_to("home");
    let scheduler = Scheduler::new(config(&dir), provisioner(sign_in));

    let report = scheduler.run(&journey_suite(), 1).unwrap();
    assert!(report.all_passed(), "{:?}", report.results);
}

#[test]
fn test_rejection_past_the_ceiling_reports_retry_exhausted() {
    let dir = TempDir::new().unwrap();
    let sign_in = ScriptedElement::new("sign-in").rejects(10).navigates_to("home");
    let cfg = config(&dir).with_retry_max_attempts(2);
    let scheduler = Scheduler::new(cfg, provisioner(sign_in));

    let report = scheduler.run(&journey_suite(), 1).unwrap();
    let result = &report.results[0];
    assert_eq!(result.outcome, Outcome::Fail);
    assert_eq!(result.failure_signature.as_deref(), Some("action_rejected"));
    assert!(result.message.as_deref().unwrap().contains("2 attempt(s)"));
}
