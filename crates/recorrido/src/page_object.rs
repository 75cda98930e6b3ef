//! Page Object Model
//!
//! A page object is a named, immutable binding of one lane's provider
//! session to one screen. It owns locators and methods, never element
//! state, and never hands a [`Locator`] or [`crate::driver::ElementRef`] to
//! its callers.
//!
//! Actions go through [`PageContext`], which does the same three things every
//! time:
//!
//! 1. wait for the target to become actionable ([`RecorridoError::ElementNotReady`] on timeout)
//! 2. invoke the provider primitive ([`RecorridoError::ActionRejected`] if refused)
//! 3. retry under the lane's [`RetryPolicy`] when the failure is whitelisted
//!
//! Navigation is expressed by return values: an action that leaves the screen
//! returns the next page object. Nothing holds a "current screen".
//!
//! # Example
//!
//! ```ignore
//! struct LoginPage {
//!     ctx: PageContext,
//!     email: Locator,
//!     password: Locator,
//!     sign_in: Locator,
//! }
//!
//! impl LoginPage {
//!     fn login(self, email: &str, password: &str) -> RecorridoResult<HomePage> {
//!         self.ctx.type_text(&self.email, email)?;
//!         self.ctx.type_text(&self.password, password)?;
//!         self.ctx.tap(&self.sign_in)?;
//!         HomePage::new(self.ctx).wait_until_loaded()
//!     }
//! }
//! ```

use crate::cancel::CancelToken;
use crate::driver::{ActionKind, ElementProvider, ElementRef, SwipeDirection};
use crate::lane::LaneId;
use crate::locator::Locator;
use crate::result::{RecorridoError, RecorridoResult};
use crate::retry::RetryPolicy;
use crate::wait::{
    ElementCondition, ElementState, FnCondition, Probe, WaitSpec, Waiter,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_MS,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Trait for page objects representing one application screen.
pub trait PageObject: Sized {
    /// Screen name for logs and errors
    fn screen_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// The lane binding this page acts through
    fn context(&self) -> &PageContext;

    /// Check if the screen is shown and ready for interaction
    fn is_loaded(&self) -> bool;

    /// Wait until [`PageObject::is_loaded`] holds, then hand the page back
    fn wait_until_loaded(self) -> RecorridoResult<Self> {
        {
            let ctx = self.context();
            let spec = WaitSpec::new(FnCondition::new(
                || Probe::from_bool(self.is_loaded(), "screen not loaded"),
                format!("screen {} loaded", self.screen_name()),
            ))
            .with_timeout(ctx.timeout())
            .with_poll_interval(ctx.poll_interval());
            ctx.waiter().wait(&spec)?;
        }
        Ok(self)
    }
}

// =============================================================================
// PAGE CONTEXT
// =============================================================================

/// Per-lane binding of provider session, wait defaults and retry policy
///
/// Cloning a context shares the session; the scheduler builds a fresh one
/// for every test.
#[derive(Clone)]
pub struct PageContext {
    provider: Arc<dyn ElementProvider>,
    waiter: Waiter,
    timeout: Duration,
    poll_interval: Duration,
    retry: RetryPolicy,
    lane: Option<LaneId>,
}

impl fmt::Debug for PageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageContext")
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("retry", &self.retry)
            .field("lane", &self.lane)
            .finish_non_exhaustive()
    }
}

impl PageContext {
    /// Bind a provider session with default timing and retry policy
    #[must_use]
    pub fn new(provider: Arc<dyn ElementProvider>) -> Self {
        Self {
            provider,
            waiter: Waiter::new(),
            timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            retry: RetryPolicy::default(),
            lane: None,
        }
    }

    /// Set the default wait timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the default poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the retry policy for actions
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bind waits and retries to a cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.waiter = Waiter::with_cancel(cancel);
        self
    }

    /// Record the lane this context drives
    #[must_use]
    pub fn with_lane(mut self, lane: LaneId) -> Self {
        self.lane = Some(lane);
        self
    }

    /// Default wait timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Default poll interval
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// The waiter bound to this lane
    #[must_use]
    pub const fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    /// The lane, if bound by the scheduler
    #[must_use]
    pub const fn lane(&self) -> Option<&LaneId> {
        self.lane.as_ref()
    }

    /// The provider session
    #[must_use]
    pub fn provider(&self) -> &dyn ElementProvider {
        self.provider.as_ref()
    }

    /// Whether two contexts drive the same provider session
    #[must_use]
    pub fn shares_session_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.provider, &other.provider)
    }

    fn spec<'a>(
        &'a self,
        locator: &'a Locator,
        state: ElementState,
    ) -> WaitSpec<ElementCondition<'a>> {
        WaitSpec::new(ElementCondition::new(self.provider(), locator, state))
            .with_timeout(self.timeout)
            .with_poll_interval(self.poll_interval)
    }

    /// Wait for an actionable element; a timeout becomes `ElementNotReady`
    fn resolve_actionable(&self, locator: &Locator) -> RecorridoResult<ElementRef> {
        let waited = self
            .waiter
            .wait(&self.spec(locator, ElementState::Actionable))
            .map_err(|e| match e {
                e @ RecorridoError::Timeout { .. } => RecorridoError::ElementNotReady {
                    locator: locator.to_string(),
                    source: Box::new(e),
                },
                other => other,
            })?;
        waited
            .value
            .ok_or_else(|| RecorridoError::invalid_state(format!("{locator} resolved to nothing")))
    }

    /// Wait, act, and retry whitelisted failures
    pub fn act(
        &self,
        locator: &Locator,
        action: ActionKind,
        payload: Option<&str>,
    ) -> RecorridoResult<()> {
        self.retry.execute(self.waiter.cancel_token(), |attempt| {
            let element = self.resolve_actionable(locator)?;
            debug!(
                lane = %self.lane.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
                %locator,
                %element,
                action = action.name(),
                attempt,
                "acting"
            );
            self.provider.act(&element, action, payload)
        })?;
        Ok(())
    }

    /// Tap an element
    pub fn tap(&self, locator: &Locator) -> RecorridoResult<()> {
        self.act(locator, ActionKind::Tap, None)
    }

    /// Long-press an element
    pub fn long_press(&self, locator: &Locator) -> RecorridoResult<()> {
        self.act(locator, ActionKind::LongPress, None)
    }

    /// Type text into an element
    pub fn type_text(&self, locator: &Locator, text: &str) -> RecorridoResult<()> {
        self.act(locator, ActionKind::TypeText, Some(text))
    }

    /// Clear an editable element
    pub fn clear(&self, locator: &Locator) -> RecorridoResult<()> {
        self.act(locator, ActionKind::Clear, None)
    }

    /// Swipe starting on an element
    pub fn swipe(&self, locator: &Locator, direction: SwipeDirection) -> RecorridoResult<()> {
        self.act(locator, ActionKind::Swipe(direction), None)
    }

    /// Wait for an element and read its text (empty when it has none)
    pub fn read_text(&self, locator: &Locator) -> RecorridoResult<String> {
        let waited = self.waiter.wait(&self.spec(locator, ElementState::Present))?;
        match waited.value {
            Some(element) => Ok(self.provider.read_text(&element)?.unwrap_or_default()),
            None => Ok(String::new()),
        }
    }

    /// Single non-waiting check that an actionable candidate exists
    #[must_use]
    pub fn is_visible(&self, locator: &Locator) -> bool {
        let spec = self
            .spec(locator, ElementState::Actionable)
            .with_timeout(Duration::ZERO);
        Waiter::new().wait(&spec).is_ok()
    }

    /// Single non-waiting check that any candidate exists
    #[must_use]
    pub fn is_present(&self, locator: &Locator) -> bool {
        let spec = self
            .spec(locator, ElementState::Present)
            .with_timeout(Duration::ZERO);
        Waiter::new().wait(&spec).is_ok()
    }

    /// Wait until the element is actionable
    pub fn wait_visible(&self, locator: &Locator) -> RecorridoResult<()> {
        self.waiter
            .wait(&self.spec(locator, ElementState::Actionable))
            .map(|_| ())
    }

    /// Wait until the element is gone
    pub fn wait_absent(&self, locator: &Locator) -> RecorridoResult<()> {
        self.waiter
            .wait(&self.spec(locator, ElementState::Absent))
            .map(|_| ())
    }

    /// Wait until the element's text equals `text`
    pub fn wait_text(&self, locator: &Locator, text: &str) -> RecorridoResult<()> {
        self.waiter
            .wait(&self.spec(locator, ElementState::TextEquals(text.to_string())))
            .map(|_| ())
    }

    /// Fail with an assertion error unless `condition` holds
    pub fn assert_that(&self, condition: bool, message: impl Into<String>) -> RecorridoResult<()> {
        if condition {
            Ok(())
        } else {
            Err(RecorridoError::assertion(message))
        }
    }
}

// =============================================================================
// SIMPLE SCREENS
// =============================================================================

/// Builder for screens described by named locators
#[derive(Debug, Clone, Default)]
pub struct ScreenBuilder {
    name: String,
    locators: BTreeMap<String, Locator>,
    anchors: Vec<String>,
}

impl ScreenBuilder {
    /// Start a screen definition
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a named element
    #[must_use]
    pub fn element(mut self, name: impl Into<String>, locator: Locator) -> Self {
        let _ = self.locators.insert(name.into(), locator);
        self
    }

    /// Add a named element whose presence marks the screen as loaded
    #[must_use]
    pub fn anchor(mut self, name: impl Into<String>, locator: Locator) -> Self {
        let name = name.into();
        self.anchors.push(name.clone());
        self.element(name, locator)
    }

    /// Bind the screen to a lane
    #[must_use]
    pub fn bind(self, ctx: PageContext) -> SimpleScreen {
        SimpleScreen {
            ctx,
            name: self.name,
            locators: self.locators,
            anchors: self.anchors,
        }
    }
}

/// A page object addressed by element names instead of hand-written methods
#[derive(Debug, Clone)]
pub struct SimpleScreen {
    ctx: PageContext,
    name: String,
    locators: BTreeMap<String, Locator>,
    anchors: Vec<String>,
}

impl SimpleScreen {
    fn locator(&self, name: &str) -> RecorridoResult<&Locator> {
        self.locators
            .get(name)
            .ok_or_else(|| RecorridoError::UnknownElement {
                screen: self.name.clone(),
                name: name.to_string(),
            })
    }

    /// Names of declared elements
    pub fn element_names(&self) -> impl Iterator<Item = &str> {
        self.locators.keys().map(String::as_str)
    }

    /// Tap a named element
    pub fn tap(&self, name: &str) -> RecorridoResult<()> {
        self.ctx.tap(self.locator(name)?)
    }

    /// Type into a named element
    pub fn type_text(&self, name: &str, text: &str) -> RecorridoResult<()> {
        self.ctx.type_text(self.locator(name)?, text)
    }

    /// Clear a named element
    pub fn clear(&self, name: &str) -> RecorridoResult<()> {
        self.ctx.clear(self.locator(name)?)
    }

    /// Read a named element's text
    pub fn read_text(&self, name: &str) -> RecorridoResult<String> {
        self.ctx.read_text(self.locator(name)?)
    }

    /// Whether a named element is currently actionable
    pub fn is_visible(&self, name: &str) -> RecorridoResult<bool> {
        Ok(self.ctx.is_visible(self.locator(name)?))
    }

    /// Tap a named element and bind the screen it leads to
    pub fn tap_to(self, name: &str, next: ScreenBuilder) -> RecorridoResult<Self> {
        self.tap(name)?;
        next.bind(self.ctx).wait_until_loaded()
    }
}

impl PageObject for SimpleScreen {
    fn screen_name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> &PageContext {
        &self.ctx
    }

    fn is_loaded(&self) -> bool {
        self.anchors.iter().all(|name| {
            self.locators
                .get(name)
                .is_some_and(|loc| self.ctx.is_present(loc))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedApp, ScriptedElement};

    fn app() -> Arc<ScriptedApp> {
        Arc::new(
            ScriptedApp::builder()
                .screen(
                    "login",
                    [
                        ScriptedElement::new("email"),
                        ScriptedElement::new("sign-in")
                            .actionable_after(2)
                            .navigates_to("home"),
                        ScriptedElement::new("flaky").rejects(1),
                        ScriptedElement::new("broken").rejects(10),
                        ScriptedElement::new("ghost").never_appears(),
                    ],
                )
                .screen("home", [ScriptedElement::new("welcome").with_text("Hi a@x.com")])
                .start_on("login")
                .build(),
        )
    }

    fn ctx(app: &Arc<ScriptedApp>) -> PageContext {
        PageContext::new(app.clone())
            .with_timeout(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(2))
            .with_retry(
                RetryPolicy::default().with_backoff(crate::retry::BackoffSchedule::None),
            )
    }

    mod context_tests {
        use super::*;

        #[test]
        fn test_tap_waits_for_actionable() {
            let app = app();
            let ctx = ctx(&app);
            ctx.tap(&Locator::accessibility_id("sign-in")).unwrap();
            assert_eq!(app.current_screen(), "home");
            assert_eq!(app.actions().len(), 1);
        }

        #[test]
        fn test_timeout_becomes_element_not_ready() {
            let app = app();
            let err = ctx(&app)
                .tap(&Locator::accessibility_id("ghost"))
                .unwrap_err();
            match err {
                RecorridoError::ElementNotReady { locator, source } => {
                    assert_eq!(locator, "~ghost");
                    assert!(source.is_timeout());
                }
                other => panic!("unexpected: {other}"),
            }
            assert!(app.actions().is_empty());
        }

        #[test]
        fn test_transient_rejection_is_retried() {
            let app = app();
            ctx(&app).tap(&Locator::accessibility_id("flaky")).unwrap();
            assert_eq!(app.actions().len(), 2);
        }

        #[test]
        fn test_persistent_rejection_exhausts() {
            let app = app();
            let err = ctx(&app)
                .tap(&Locator::accessibility_id("broken"))
                .unwrap_err();
            assert_eq!(err.signature(), "retry_exhausted");
            assert_eq!(err.root_signature(), "action_rejected");
        }

        #[test]
        fn test_rejection_is_fatal_without_whitelist() {
            let app = app();
            let err = ctx(&app)
                .with_retry(RetryPolicy::no_retry())
                .tap(&Locator::accessibility_id("flaky"))
                .unwrap_err();
            assert_eq!(err.signature(), "action_rejected");
        }

        #[test]
        fn test_read_text_and_visibility() {
            let app = app();
            let ctx = ctx(&app);
            assert!(ctx.is_present(&Locator::accessibility_id("email")));
            assert!(!ctx.is_present(&Locator::accessibility_id("welcome")));
            ctx.tap(&Locator::accessibility_id("sign-in")).unwrap();
            assert_eq!(
                ctx.read_text(&Locator::accessibility_id("welcome")).unwrap(),
                "Hi a@x.com"
            );
            ctx.wait_text(&Locator::accessibility_id("welcome"), "Hi a@x.com")
                .unwrap();
            ctx.wait_absent(&Locator::accessibility_id("email")).unwrap();
        }

        #[test]
        fn test_long_press_and_swipe_are_recorded() {
            let app = app();
            let ctx = ctx(&app);
            ctx.swipe(&Locator::accessibility_id("email"), SwipeDirection::Up)
                .unwrap();
            ctx.long_press(&Locator::accessibility_id("sign-in")).unwrap();

            let actions = app.actions();
            let kinds: Vec<_> = actions.iter().map(|a| a.action).collect();
            assert_eq!(
                kinds,
                vec![ActionKind::Swipe(SwipeDirection::Up), ActionKind::LongPress]
            );
            assert!(actions.iter().all(|a| a.accepted && a.payload.is_none()));
            assert_eq!(app.current_screen(), "home");
        }

        #[test]
        fn test_assert_that() {
            let app = app();
            let ctx = ctx(&app);
            assert!(ctx.assert_that(true, "fine").is_ok());
            assert_eq!(
                ctx.assert_that(false, "total mismatch").unwrap_err().signature(),
                "assertion"
            );
        }

        #[test]
        fn test_cancelled_context_aborts_wait() {
            let app = app();
            let token = CancelToken::new();
            token.cancel();
            let err = ctx(&app)
                .with_cancel(token)
                .tap(&Locator::accessibility_id("email"))
                .unwrap_err();
            assert!(err.is_cancelled());
        }

        #[test]
        fn test_shares_session() {
            let a = app();
            let b = app();
            let ca = ctx(&a);
            assert!(ca.shares_session_with(&ca.clone()));
            assert!(!ca.shares_session_with(&ctx(&b)));
        }
    }

    mod screen_tests {
        use super::*;

        fn login() -> ScreenBuilder {
            ScreenBuilder::new("Login")
                .anchor("email", Locator::accessibility_id("email"))
                .element("sign_in", Locator::accessibility_id("sign-in"))
        }

        fn home() -> ScreenBuilder {
            ScreenBuilder::new("Home").anchor("welcome", Locator::accessibility_id("welcome"))
        }

        #[test]
        fn test_navigation_by_return_value() {
            let app = app();
            let screen = login().bind(ctx(&app)).wait_until_loaded().unwrap();
            assert_eq!(screen.screen_name(), "Login");
            screen.type_text("email", "a@x.com").unwrap();
            let home = screen.tap_to("sign_in", home()).unwrap();
            assert_eq!(home.screen_name(), "Home");
            assert_eq!(home.read_text("welcome").unwrap(), "Hi a@x.com");
        }

        #[test]
        fn test_unknown_element() {
            let app = app();
            let screen = login().bind(ctx(&app));
            let err = screen.tap("forgot_password").unwrap_err();
            assert!(matches!(err, RecorridoError::UnknownElement { .. }));
            assert_eq!(screen.element_names().collect::<Vec<_>>(), vec!["email", "sign_in"]);
        }

        #[test]
        fn test_wait_until_loaded_times_out_on_wrong_screen() {
            let app = app();
            let err = home().bind(ctx(&app)).wait_until_loaded().unwrap_err();
            assert!(err.is_timeout());
            assert!(err.to_string().contains("screen Home loaded"));
        }
    }
}
