//! Scripted in-memory application for tests and demos.
//!
//! A [`ScriptedApp`] is a set of named screens, each holding
//! [`ScriptedElement`]s whose timing is scripted: an element can appear
//! only after a number of lookups, become actionable only after a number of
//! checks, reject its first few actions, or never appear at all. Tapping an
//! element with [`ScriptedElement::navigates_to`] switches screens and
//! invalidates every previously returned [`ElementRef`].
//!
//! ```ignore
//! let app = ScriptedApp::builder()
//!     .screen("login", [
//!         ScriptedElement::new("email"),
//!         ScriptedElement::new("sign-in").actionable_after(3).navigates_to("home"),
//!     ])
//!     .screen("home", [ScriptedElement::new("welcome").with_text("Hello")])
//!     .build();
//! ```

use crate::driver::{ActionKind, ElementProvider, ElementRef, Screenshot};
use crate::locator::{Locator, Selector};
use crate::result::{RecorridoError, RecorridoResult};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// One scripted element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedElement {
    name: String,
    text: Option<String>,
    class: String,
    visible_after: u32,
    actionable_after: u32,
    rejections: u32,
    never_appears: bool,
    navigates_to: Option<String>,
}

impl ScriptedElement {
    /// Element addressable by accessibility id or resource id `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: None,
            class: "Other".to_string(),
            visible_after: 0,
            actionable_after: 0,
            rejections: 0,
            never_appears: false,
            navigates_to: None,
        }
    }

    /// Visible text
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Class matched by class-chain locators
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    /// Missing from the first `n` lookups after the screen is shown
    #[must_use]
    pub const fn visible_after(mut self, n: u32) -> Self {
        self.visible_after = n;
        self
    }

    /// Not actionable for the first `n` actionability checks
    #[must_use]
    pub const fn actionable_after(mut self, n: u32) -> Self {
        self.actionable_after = n;
        self
    }

    /// Reject the first `n` actions
    #[must_use]
    pub const fn rejects(mut self, n: u32) -> Self {
        self.rejections = n;
        self
    }

    /// Never shows up
    #[must_use]
    pub const fn never_appears(mut self) -> Self {
        self.never_appears = true;
        self
    }

    /// Tapping shows `screen`
    #[must_use]
    pub fn navigates_to(mut self, screen: impl Into<String>) -> Self {
        self.navigates_to = Some(screen.into());
        self
    }

    fn matches(&self, selector: &Selector) -> bool {
        match selector {
            Selector::AccessibilityId(v) | Selector::ResourceId(v) => &self.name == v,
            Selector::Text(v) => self.text.as_deref() == Some(v.as_str()),
            Selector::ClassChain(v) => &self.class == v,
        }
    }
}

/// An action the app received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAction {
    /// Screen shown when the action arrived
    pub screen: String,
    /// Target element name
    pub element: String,
    /// Action kind
    pub action: ActionKind,
    /// Payload, if any
    pub payload: Option<String>,
    /// Whether the app accepted it
    pub accepted: bool,
}

#[derive(Debug)]
struct Live {
    spec: ScriptedElement,
    finds: u32,
    checks: u32,
    rejections_left: u32,
    value: Option<String>,
}

impl Live {
    fn new(spec: ScriptedElement) -> Self {
        let rejections_left = spec.rejections;
        let value = spec.text.clone();
        Self {
            spec,
            finds: 0,
            checks: 0,
            rejections_left,
            value,
        }
    }

    const fn visible(&self) -> bool {
        !self.spec.never_appears && self.finds > self.spec.visible_after
    }
}

#[derive(Debug)]
struct Screen {
    name: String,
    elements: Vec<Live>,
}

#[derive(Debug)]
struct State {
    screens: Vec<Screen>,
    current: usize,
    generation: u64,
    alive: bool,
    actions: Vec<RecordedAction>,
    log: Vec<String>,
}

impl State {
    fn screen(&self) -> Option<&Screen> {
        self.screens.get(self.current)
    }

    fn screen_name(&self) -> String {
        self.screen().map(|s| s.name.clone()).unwrap_or_default()
    }

    fn show(&mut self, name: &str) -> bool {
        let Some(idx) = self.screens.iter().position(|s| s.name == name) else {
            return false;
        };
        self.current = idx;
        self.generation += 1;
        for el in &mut self.screens[idx].elements {
            el.finds = 0;
            el.checks = 0;
        }
        self.log.push(format!("navigated to {name}"));
        true
    }

    /// Index of the live element a ref points at, if it is still current
    fn resolve(&self, element: &ElementRef) -> Option<usize> {
        let (rest, generation) = element.id.rsplit_once('#')?;
        let (screen, name) = rest.split_once('/')?;
        if generation.parse::<u64>().ok()? != self.generation {
            return None;
        }
        let current = self.screen()?;
        if current.name != screen {
            return None;
        }
        current.elements.iter().position(|el| el.spec.name == name)
    }

    fn scope_visible(&mut self, locator: &Locator) -> bool {
        let Some(scope) = locator.scope() else {
            return true;
        };
        if !self.scope_visible(scope) {
            return false;
        }
        let current = self.current;
        self.screens.get_mut(current).is_some_and(|screen| {
            screen.elements.iter_mut().any(|el| {
                if el.spec.matches(scope.selector()) {
                    el.finds += 1;
                    el.visible()
                } else {
                    false
                }
            })
        })
    }
}

/// Builder for [`ScriptedApp`]
#[derive(Debug, Clone, Default)]
pub struct ScriptedAppBuilder {
    screens: Vec<(String, Vec<ScriptedElement>)>,
    start: Option<String>,
}

impl ScriptedAppBuilder {
    /// Add a screen
    #[must_use]
    pub fn screen(
        mut self,
        name: impl Into<String>,
        elements: impl IntoIterator<Item = ScriptedElement>,
    ) -> Self {
        self.screens
            .push((name.into(), elements.into_iter().collect()));
        self
    }

    /// Screen shown at launch (defaults to the first screen)
    #[must_use]
    pub fn start_on(mut self, name: impl Into<String>) -> Self {
        self.start = Some(name.into());
        self
    }

    /// Launch a fresh instance
    #[must_use]
    pub fn build(&self) -> ScriptedApp {
        let screens = self
            .screens
            .iter()
            .map(|(name, elements)| Screen {
                name: name.clone(),
                elements: elements.iter().cloned().map(Live::new).collect(),
            })
            .collect();
        let mut state = State {
            screens,
            current: 0,
            generation: 0,
            alive: true,
            actions: Vec::new(),
            log: vec!["app launched".to_string()],
        };
        if let Some(start) = &self.start {
            let _ = state.show(start);
        }
        ScriptedApp {
            state: Mutex::new(state),
        }
    }
}

/// In-memory [`ElementProvider`] with scripted timing
#[derive(Debug)]
pub struct ScriptedApp {
    state: Mutex<State>,
}

impl ScriptedApp {
    /// Start describing an app
    #[must_use]
    pub fn builder() -> ScriptedAppBuilder {
        ScriptedAppBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Name of the screen currently shown
    #[must_use]
    pub fn current_screen(&self) -> String {
        self.lock().screen_name()
    }

    /// Every action received, in order
    #[must_use]
    pub fn actions(&self) -> Vec<RecordedAction> {
        self.lock().actions.clone()
    }

    /// Show a screen directly; `false` if it does not exist
    pub fn navigate(&self, screen: &str) -> bool {
        self.lock().show(screen)
    }

    /// Simulate a crashed driver session
    pub fn kill_session(&self) {
        let mut state = self.lock();
        state.alive = false;
        state.log.push("session terminated".to_string());
    }

    /// Whether the session is alive
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.lock().alive
    }

    /// Append an app log line
    pub fn log(&self, line: impl Into<String>) {
        self.lock().log.push(line.into());
    }

    fn dead() -> RecorridoError {
        RecorridoError::provider("session terminated")
    }
}

impl ElementProvider for ScriptedApp {
    fn find(&self, locator: &Locator) -> RecorridoResult<Vec<ElementRef>> {
        let mut state = self.lock();
        if !state.alive {
            return Err(Self::dead());
        }
        if !state.scope_visible(locator) {
            return Ok(Vec::new());
        }
        let generation = state.generation;
        let current = state.current;
        let Some(screen) = state.screens.get_mut(current) else {
            return Ok(Vec::new());
        };
        let screen_name = screen.name.clone();
        let found = screen
            .elements
            .iter_mut()
            .filter(|el| el.spec.matches(locator.selector()))
            .filter_map(|el| {
                el.finds += 1;
                el.visible().then(|| {
                    ElementRef::new(format!("{screen_name}/{}#{generation}", el.spec.name))
                        .with_label(el.spec.name.clone())
                })
            })
            .collect();
        Ok(found)
    }

    fn is_actionable(&self, element: &ElementRef) -> bool {
        let mut state = self.lock();
        if !state.alive {
            return false;
        }
        let Some(idx) = state.resolve(element) else {
            return false;
        };
        let current = state.current;
        let el = &mut state.screens[current].elements[idx];
        if !el.visible() {
            return false;
        }
        el.checks += 1;
        el.checks > el.spec.actionable_after
    }

    fn act(
        &self,
        element: &ElementRef,
        action: ActionKind,
        payload: Option<&str>,
    ) -> RecorridoResult<()> {
        let mut state = self.lock();
        if !state.alive {
            return Err(Self::dead());
        }
        let screen = state.screen_name();
        let label = element.label.clone().unwrap_or_else(|| element.id.clone());
        let mut record = RecordedAction {
            screen: screen.clone(),
            element: label.clone(),
            action,
            payload: payload.map(str::to_string),
            accepted: false,
        };

        let Some(idx) = state.resolve(element) else {
            state.actions.push(record);
            state.log.push(format!("{action} on stale {label}"));
            return Err(RecorridoError::action_rejected(
                action.name(),
                &label,
                "stale element reference",
            ));
        };

        let current = state.current;
        let el = &mut state.screens[current].elements[idx];
        if el.rejections_left > 0 {
            el.rejections_left -= 1;
            state.actions.push(record);
            state.log.push(format!("{action} on {label} rejected: busy"));
            return Err(RecorridoError::action_rejected(
                action.name(),
                &label,
                "element busy",
            ));
        }

        let mut navigate = None;
        match action {
            ActionKind::TypeText => {
                let mut value = el.value.take().unwrap_or_default();
                value.push_str(payload.unwrap_or_default());
                el.value = Some(value);
            }
            ActionKind::Clear => el.value = None,
            ActionKind::Tap | ActionKind::LongPress => navigate.clone_from(&el.spec.navigates_to),
            ActionKind::Swipe(_) => {}
        }

        record.accepted = true;
        state.actions.push(record);
        state.log.push(format!("{action} on {screen}/{label}"));
        if let Some(next) = navigate {
            if !state.show(&next) {
                return Err(RecorridoError::provider(format!("no screen named {next}")));
            }
        }
        Ok(())
    }

    fn read_text(&self, element: &ElementRef) -> RecorridoResult<Option<String>> {
        let state = self.lock();
        if !state.alive {
            return Err(Self::dead());
        }
        let idx = state
            .resolve(element)
            .ok_or_else(|| RecorridoError::provider(format!("stale element {element}")))?;
        Ok(state.screens[state.current].elements[idx].value.clone())
    }

    fn screenshot(&self) -> RecorridoResult<Screenshot> {
        let state = self.lock();
        if !state.alive {
            return Err(Self::dead());
        }
        let mut data = PNG_SIGNATURE.to_vec();
        data.extend_from_slice(state.screen_name().as_bytes());
        Ok(Screenshot::new(data, 390, 844))
    }

    fn tree_dump(&self) -> RecorridoResult<String> {
        let state = self.lock();
        if !state.alive {
            return Err(Self::dead());
        }
        let mut out = String::new();
        let _ = writeln!(out, "screen {} (generation {})", state.screen_name(), state.generation);
        if let Some(screen) = state.screen() {
            for el in &screen.elements {
                let _ = write!(out, "  ~{} class={}", el.spec.name, el.spec.class);
                if let Some(v) = &el.value {
                    let _ = write!(out, " text={v:?}");
                }
                let _ = writeln!(out, " visible={}", el.visible());
            }
        }
        Ok(out)
    }

    fn log_tail(&self, lines: usize) -> RecorridoResult<Vec<String>> {
        let state = self.lock();
        if !state.alive {
            return Err(Self::dead());
        }
        let skip = state.log.len().saturating_sub(lines);
        Ok(state.log[skip..].to_vec())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn app() -> ScriptedApp {
        ScriptedApp::builder()
            .screen(
                "list",
                [
                    ScriptedElement::new("row").with_class("Cell"),
                    ScriptedElement::new("delete").with_text("Delete").visible_after(2),
                    ScriptedElement::new("open").navigates_to("detail"),
                ],
            )
            .screen("detail", [ScriptedElement::new("title").with_text("Item 1")])
            .build()
    }

    #[test]
    fn test_starts_on_first_screen() {
        assert_eq!(app().current_screen(), "list");
    }

    #[test]
    fn test_visible_after_counts_lookups() {
        let app = app();
        let loc = Locator::text("Delete");
        assert!(app.find(&loc).unwrap().is_empty());
        assert!(app.find(&loc).unwrap().is_empty());
        assert_eq!(app.find(&loc).unwrap().len(), 1);
    }

    #[test]
    fn test_scope_must_resolve() {
        let app = app();
        let scoped = Locator::accessibility_id("open").within(Locator::class_chain("Cell"));
        assert_eq!(app.find(&scoped).unwrap().len(), 1);
        let missing = Locator::accessibility_id("open").within(Locator::class_chain("Table"));
        assert!(app.find(&missing).unwrap().is_empty());
    }

    #[test]
    fn test_navigation_invalidates_refs() {
        let app = app();
        let open = app.find(&Locator::accessibility_id("open")).unwrap().remove(0);
        let row = app.find(&Locator::accessibility_id("row")).unwrap().remove(0);
        app.act(&open, ActionKind::Tap, None).unwrap();
        assert_eq!(app.current_screen(), "detail");
        assert!(!app.is_actionable(&row));
        let err = app.act(&row, ActionKind::Tap, None).unwrap_err();
        assert!(err.to_string().contains("stale"));
        assert_eq!(app.actions().len(), 2);
        assert!(!app.actions()[1].accepted);
    }

    #[test]
    fn test_type_and_clear() {
        let app = ScriptedApp::builder()
            .screen("form", [ScriptedElement::new("email")])
            .build();
        let email = app.find(&Locator::accessibility_id("email")).unwrap().remove(0);
        app.act(&email, ActionKind::TypeText, Some("a@")).unwrap();
        app.act(&email, ActionKind::TypeText, Some("x.com")).unwrap();
        assert_eq!(app.read_text(&email).unwrap().as_deref(), Some("a@x.com"));
        app.act(&email, ActionKind::Clear, None).unwrap();
        assert_eq!(app.read_text(&email).unwrap(), None);
    }

    #[test]
    fn test_diagnostics() {
        let app = app();
        assert!(app.screenshot().unwrap().data.starts_with(&PNG_SIGNATURE));
        assert!(app.tree_dump().unwrap().contains("~row class=Cell"));
        app.log("custom line");
        assert_eq!(app.log_tail(1).unwrap(), vec!["custom line".to_string()]);
        app.kill_session();
        assert!(!app.is_alive());
        assert!(app.screenshot().is_err());
        assert!(app.find(&Locator::accessibility_id("row")).is_err());
    }
}
