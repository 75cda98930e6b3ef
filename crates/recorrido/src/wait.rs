//! Wait Engine
//!
//! Deadline-checked polling for "is this element actionable yet" without
//! hard sleeps.
//!
//! - Each poll re-queries the provider; an [`ElementRef`] seen on one poll
//!   is never trusted on the next.
//! - The first satisfied poll returns immediately.
//! - A zero timeout evaluates the condition exactly once.
//! - On timeout the error carries the last observed provider state.
//! - The loop checks its [`CancelToken`] every iteration.

use crate::cancel::CancelToken;
use crate::driver::{ElementProvider, ElementRef};
use crate::locator::Locator;
use crate::result::{RecorridoError, RecorridoResult};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default timeout for wait operations (5 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5_000;

/// Default polling interval (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

// =============================================================================
// PROBE
// =============================================================================

/// Outcome of a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T = ()> {
    /// Condition satisfied, with the value observed on this poll
    Ready(T),
    /// Condition not yet satisfied; description of what was observed
    Pending(String),
}

impl<T> Probe<T> {
    /// Whether the condition was satisfied
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl Probe<()> {
    /// Convert a boolean check into a probe
    #[must_use]
    pub fn from_bool(ok: bool, observed: impl Into<String>) -> Self {
        if ok {
            Self::Ready(())
        } else {
            Self::Pending(observed.into())
        }
    }
}

// =============================================================================
// WAIT CONDITION TRAIT
// =============================================================================

/// A condition the wait engine can poll
pub trait WaitCondition {
    /// Value produced when the condition holds
    type Output;

    /// Evaluate the condition once
    fn poll(&self) -> Probe<Self::Output>;

    /// Get description for error messages
    fn description(&self) -> String;
}

/// A function-based wait condition
pub struct FnCondition<F> {
    func: F,
    description: String,
}

impl<F> std::fmt::Debug for FnCondition<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCondition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl<F> FnCondition<F> {
    /// Create a new function condition
    pub fn new(func: F, description: impl Into<String>) -> Self {
        Self {
            func,
            description: description.into(),
        }
    }
}

impl<T, F: Fn() -> Probe<T>> WaitCondition for FnCondition<F> {
    type Output = T;

    fn poll(&self) -> Probe<T> {
        (self.func)()
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

// =============================================================================
// ELEMENT CONDITIONS
// =============================================================================

/// Element state an [`ElementCondition`] waits for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementState {
    /// At least one candidate exists
    Present,
    /// A candidate exists and the provider reports it actionable
    Actionable,
    /// No candidate exists
    Absent,
    /// A candidate's text equals the value
    TextEquals(String),
    /// A candidate's text contains the value
    TextContains(String),
}

impl std::fmt::Display for ElementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Actionable => write!(f, "actionable"),
            Self::Absent => write!(f, "absent"),
            Self::TextEquals(t) => write!(f, "text == {t:?}"),
            Self::TextContains(t) => write!(f, "text contains {t:?}"),
        }
    }
}

/// Polls the provider for a locator reaching an [`ElementState`]
pub struct ElementCondition<'a> {
    provider: &'a dyn ElementProvider,
    locator: &'a Locator,
    state: ElementState,
}

impl std::fmt::Debug for ElementCondition<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementCondition")
            .field("locator", &self.locator)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> ElementCondition<'a> {
    /// Create a new element condition
    #[must_use]
    pub const fn new(
        provider: &'a dyn ElementProvider,
        locator: &'a Locator,
        state: ElementState,
    ) -> Self {
        Self {
            provider,
            locator,
            state,
        }
    }

    fn candidates(&self, found: Vec<ElementRef>) -> Vec<ElementRef> {
        match self.locator.index() {
            Some(n) => found.into_iter().nth(n).into_iter().collect(),
            None => found,
        }
    }

    fn text_matches(
        &self,
        element: &ElementRef,
        pred: impl Fn(&str) -> bool,
    ) -> Result<bool, String> {
        match self.provider.read_text(element) {
            Ok(Some(text)) => Ok(pred(&text)),
            Ok(None) => Ok(false),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl WaitCondition for ElementCondition<'_> {
    type Output = Option<ElementRef>;

    fn poll(&self) -> Probe<Option<ElementRef>> {
        let found = match self.provider.find(self.locator) {
            Ok(found) => found,
            Err(e) => return Probe::Pending(format!("provider error: {e}")),
        };
        let total = found.len();
        let candidates = self.candidates(found);

        match &self.state {
            ElementState::Absent => {
                if candidates.is_empty() {
                    Probe::Ready(None)
                } else {
                    Probe::Pending(format!("{total} candidate(s) still present"))
                }
            }
            _ if candidates.is_empty() => {
                Probe::Pending(format!("0 of {total} candidate(s) matched"))
            }
            ElementState::Present => Probe::Ready(candidates.into_iter().next()),
            ElementState::Actionable => candidates
                .iter()
                .find(|el| self.provider.is_actionable(el))
                .cloned()
                .map_or_else(
                    || {
                        Probe::Pending(format!(
                            "{} candidate(s), none actionable",
                            candidates.len()
                        ))
                    },
                    |el| Probe::Ready(Some(el)),
                ),
            ElementState::TextEquals(expected) | ElementState::TextContains(expected) => {
                let exact = matches!(self.state, ElementState::TextEquals(_));
                let mut last = String::from("no text");
                for el in &candidates {
                    let matched = self.text_matches(el, |t| {
                        if exact {
                            t == expected
                        } else {
                            t.contains(expected.as_str())
                        }
                    });
                    match matched {
                        Ok(true) => return Probe::Ready(Some(el.clone())),
                        Ok(false) => {
                            last = self
                                .provider
                                .read_text(el)
                                .ok()
                                .flatten()
                                .map_or_else(|| "no text".to_string(), |t| format!("text {t:?}"));
                        }
                        Err(e) => last = e,
                    }
                }
                Probe::Pending(format!("{} candidate(s), {last}", candidates.len()))
            }
        }
    }

    fn description(&self) -> String {
        format!("{} {}", self.locator, self.state)
    }
}

// =============================================================================
// WAIT SPEC
// =============================================================================

/// A condition plus its timing, built per call and never shared
#[derive(Debug)]
pub struct WaitSpec<C> {
    condition: C,
    timeout: Duration,
    poll_interval: Duration,
}

impl<C: WaitCondition> WaitSpec<C> {
    /// Create a spec with default timing
    pub const fn new(condition: C) -> Self {
        Self {
            condition,
            timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Set the timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Timeout
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Polling interval
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Description of the awaited condition
    pub fn description(&self) -> String {
        self.condition.description()
    }
}

impl<'a> WaitSpec<ElementCondition<'a>> {
    /// Wait for the locator to resolve to an actionable element
    pub const fn for_actionable(provider: &'a dyn ElementProvider, locator: &'a Locator) -> Self {
        Self::new(ElementCondition::new(
            provider,
            locator,
            ElementState::Actionable,
        ))
    }

    /// Wait for the locator to resolve to at least one element
    pub const fn for_present(provider: &'a dyn ElementProvider, locator: &'a Locator) -> Self {
        Self::new(ElementCondition::new(
            provider,
            locator,
            ElementState::Present,
        ))
    }

    /// Wait for the locator to resolve to nothing
    pub const fn for_absent(provider: &'a dyn ElementProvider, locator: &'a Locator) -> Self {
        Self::new(ElementCondition::new(
            provider,
            locator,
            ElementState::Absent,
        ))
    }

    /// Wait for the element text to equal `text`
    pub fn for_text(
        provider: &'a dyn ElementProvider,
        locator: &'a Locator,
        text: impl Into<String>,
    ) -> Self {
        Self::new(ElementCondition::new(
            provider,
            locator,
            ElementState::TextEquals(text.into()),
        ))
    }
}

// =============================================================================
// WAIT RESULT
// =============================================================================

/// Result of a successful wait
#[derive(Debug, Clone)]
pub struct Waited<T> {
    /// Value observed on the satisfying poll
    pub value: T,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Number of polls performed
    pub polls: u32,
}

// =============================================================================
// WAITER IMPLEMENTATION
// =============================================================================

/// Runs wait specs; one per lane, carrying that lane's cancellation token
#[derive(Debug, Clone, Default)]
pub struct Waiter {
    cancel: CancelToken,
}

impl Waiter {
    /// Create a waiter that is never cancelled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a waiter bound to a cancellation token
    #[must_use]
    pub const fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    /// The waiter's cancellation token
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Poll `spec` until it is satisfied, the timeout elapses, or the token fires
    pub fn wait<C: WaitCondition>(&self, spec: &WaitSpec<C>) -> RecorridoResult<Waited<C::Output>> {
        let start = Instant::now();

        if spec.timeout.is_zero() {
            return match spec.condition.poll() {
                Probe::Ready(value) => Ok(Waited {
                    value,
                    elapsed: start.elapsed(),
                    polls: 1,
                }),
                Probe::Pending(observed) => Err(RecorridoError::Timeout {
                    description: spec.description(),
                    elapsed: start.elapsed(),
                    last_observed: observed,
                }),
            };
        }

        let mut polls = 0u32;
        loop {
            self.cancel.check()?;
            polls += 1;
            let observed = match spec.condition.poll() {
                Probe::Ready(value) => {
                    debug!(
                        condition = %spec.description(),
                        polls,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "wait satisfied"
                    );
                    return Ok(Waited {
                        value,
                        elapsed: start.elapsed(),
                        polls,
                    });
                }
                Probe::Pending(observed) => observed,
            };
            trace!(condition = %spec.description(), polls, %observed, "wait pending");

            let elapsed = start.elapsed();
            if elapsed >= spec.timeout {
                debug!(condition = %spec.description(), polls, %observed, "wait timed out");
                return Err(RecorridoError::Timeout {
                    description: spec.description(),
                    elapsed,
                    last_observed: observed,
                });
            }
            self.cancel
                .sleep(spec.poll_interval.min(spec.timeout - elapsed))?;
        }
    }

    /// Wait for a predicate to return true
    pub fn wait_for_function<F>(
        &self,
        predicate: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> RecorridoResult<Waited<()>>
    where
        F: Fn() -> bool,
    {
        let spec = WaitSpec::new(FnCondition::new(
            || Probe::from_bool(predicate(), "predicate returned false"),
            "custom function",
        ))
        .with_timeout(timeout)
        .with_poll_interval(poll_interval);
        self.wait(&spec)
    }

    /// Wait until `probe` yields a value
    pub fn wait_for_value<T, F>(
        &self,
        description: &str,
        probe: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> RecorridoResult<T>
    where
        F: Fn() -> Probe<T>,
    {
        let spec = WaitSpec::new(FnCondition::new(probe, description))
            .with_timeout(timeout)
            .with_poll_interval(poll_interval);
        self.wait(&spec).map(|w| w.value)
    }
}

// =============================================================================
// CONVENIENCE FUNCTIONS
// =============================================================================

/// Wait for a condition with the default poll interval
pub fn wait_until<F>(predicate: F, timeout: Duration) -> RecorridoResult<()>
where
    F: Fn() -> bool,
{
    Waiter::new()
        .wait_for_function(
            predicate,
            timeout,
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        )
        .map(|_| ())
}

// =============================================================================
// TESTS
// =============================================================================
