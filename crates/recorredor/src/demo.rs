//! Built-in demo suites over the scripted in-memory app
//!
//! - `demo`: a sign-in journey and a few screen checks, all passing
//! - `demo-failures`: one pass, one wait timeout, one assertion failure
//! - `demo-offline`: every lane fails to provision

use recorrido::mock::{ScriptedApp, ScriptedElement};
use recorrido::prelude::*;
use recorrido::{FnProvisioner, LaneId, LaneProvisioner, SuiteRegistry};
use std::sync::Arc;
use std::time::Duration;

/// Short wait used by tests that expect an element never to show up
const IMPATIENT: Duration = Duration::from_millis(300);

/// Registry holding every demo suite
#[must_use]
pub fn registry() -> SuiteRegistry {
    let mut registry = SuiteRegistry::new();
    registry.register(demo_suite(), app_provisioner());
    registry.register(failures_suite(), app_provisioner());
    registry.register(offline_suite(), offline_provisioner());
    registry
}

fn app() -> ScriptedApp {
    ScriptedApp::builder()
        .screen(
            "login",
            [
                ScriptedElement::new("email").visible_after(2),
                ScriptedElement::new("password"),
                ScriptedElement::new("sign-in")
                    .actionable_after(3)
                    .rejects(1)
                    .navigates_to("home"),
                ScriptedElement::new("banner").with_text("Welcome to Recorrido"),
            ],
        )
        .screen(
            "home",
            [
                ScriptedElement::new("greeting").with_text("Hello, demo@example.com"),
                ScriptedElement::new("settings").navigates_to("settings"),
            ],
        )
        .screen(
            "settings",
            [
                ScriptedElement::new("title").with_text("Settings"),
                ScriptedElement::new("back").navigates_to("home"),
            ],
        )
        .start_on("login")
        .build()
}

fn app_provisioner() -> Arc<dyn LaneProvisioner> {
    Arc::new(FnProvisioner::new(|lane: &LaneId| {
        let app = app();
        app.log(format!("device ready on {lane}"));
        Ok(Arc::new(app) as Arc<dyn ElementProvider>)
    }))
}

fn offline_provisioner() -> Arc<dyn LaneProvisioner> {
    Arc::new(FnProvisioner::new(|lane: &LaneId| {
        Err::<Arc<dyn ElementProvider>, _>(RecorridoError::provider(format!(
            "no simulator answered for {lane}"
        )))
    }))
}

// =============================================================================
// PAGE OBJECTS
// =============================================================================

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

fn settings_screen() -> ScreenBuilder {
    ScreenBuilder::new("settings")
        .anchor("title", Locator::accessibility_id("title"))
        .element("back", Locator::accessibility_id("back"))
}

fn sign_in() -> Flow<LoginPage, HomePage> {
    Flow::start("sign in")
        .then("waitForLogin", LoginPage::wait_until_loaded)
        .then("login", |page: LoginPage| {
            page.login("demo@example.com", "s3cret")
        })
        .assert("assertGreeting", |home: &HomePage| {
            let text = home.greeting()?;
            home.context().assert_that(
                text.contains("demo@example.com"),
                format!("greeting was {text:?}"),
            )
        })
}

// =============================================================================
// SUITES
// =============================================================================

fn demo_suite() -> Suite {
    Suite::new("demo")
        .with_test(
            TestCase::new("login_reaches_home", |ctx| {
                sign_in().run(LoginPage::new(ctx.page())).map(|_| ())
            })
            .with_tag("smoke"),
        )
        .with_test(
            TestCase::new("login_banner_text", |ctx| {
                ctx.page()
                    .wait_text(&Locator::accessibility_id("banner"), "Welcome to Recorrido")
            })
            .with_tag("smoke"),
        )
        .test("settings_round_trip", |ctx| {
            let home = sign_in().run(LoginPage::new(ctx.page()))?.page;
            let settings = ScreenBuilder::new("home")
                .anchor("greeting", Locator::accessibility_id("greeting"))
                .element("settings", Locator::accessibility_id("settings"))
                .bind(home.ctx)
                .tap_to("settings", settings_screen())?;
            settings
                .context()
                .swipe(&Locator::accessibility_id("title"), SwipeDirection::Down)?;
            let title = settings.read_text("title")?;
            settings.context().assert_that(title == "Settings", "settings title")?;
            settings.tap("back")
        })
}

fn failures_suite() -> Suite {
    Suite::new("demo-failures")
        .test("still_passes", |ctx| {
            ctx.page().long_press(&Locator::accessibility_id("banner"))
        })
        .test("missing_button_times_out", |ctx| {
            ctx.page()
                .with_timeout(IMPATIENT)
                .tap(&Locator::accessibility_id("forgot-password"))
        })
        .test("wrong_banner_text", |ctx| {
            let text = ctx.page().read_text(&Locator::accessibility_id("banner"))?;
            ctx.page().assert_that(text == "Bienvenido", format!("banner was {text:?}"))
        })
}

fn offline_suite() -> Suite {
    Suite::new("demo-offline").test("needs_a_device", |_| Ok(()))
}
