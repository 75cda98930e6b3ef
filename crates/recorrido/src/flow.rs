//! Flow Composer
//!
//! A [`Flow`] is an ordered list of named steps. Each step takes the page
//! object produced by the previous one and returns the next. The builder is
//! typed, so `Flow<LoginPage, HomePage>` only accepts steps whose input
//! matches the previous step's output.
//!
//! Running a flow is strictly sequential and fail-fast: the first failing
//! step stops the journey and its error is wrapped in
//! [`RecorridoError::Flow`] with the 1-based step index and step name.
//! Flows hold no session state and can be run any number of times.

use crate::result::{RecorridoError, RecorridoResult};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::time::{Duration, Instant};
use tracing::{debug, info};

type AnyValue = Box<dyn Any>;
type StepFn = Box<dyn Fn(AnyValue) -> RecorridoResult<AnyValue> + Send + Sync>;

struct Step {
    name: String,
    run: StepFn,
}

/// A linear user journey from `In` to `Out`
pub struct Flow<In, Out> {
    name: String,
    steps: Vec<Step>,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out> fmt::Debug for Flow<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Result of a completed flow
#[derive(Debug)]
pub struct FlowOutcome<T> {
    /// Page object returned by the last step
    pub page: T,
    /// Steps executed
    pub steps_executed: usize,
    /// Wall time
    pub duration: Duration,
}

impl<T: 'static> Flow<T, T> {
    /// Start an empty flow
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            _types: PhantomData,
        }
    }
}

impl<In: 'static, Out: 'static> Flow<In, Out> {
    /// Append a step transforming the current page into the next one
    #[must_use]
    pub fn then<Next, F>(mut self, name: impl Into<String>, step: F) -> Flow<In, Next>
    where
        Next: 'static,
        F: Fn(Out) -> RecorridoResult<Next> + Send + Sync + 'static,
    {
        let name = name.into();
        let label = name.clone();
        self.steps.push(Step {
            name,
            run: Box::new(move |value: AnyValue| {
                let page = value.downcast::<Out>().map_err(|_| {
                    RecorridoError::invalid_state(format!(
                        "step '{label}' received an unexpected page type"
                    ))
                })?;
                step(*page).map(|next| Box::new(next) as AnyValue)
            }),
        });
        Flow {
            name: self.name,
            steps: self.steps,
            _types: PhantomData,
        }
    }

    /// Append a terminal check that keeps the current page
    #[must_use]
    pub fn assert<F>(self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Out) -> RecorridoResult<()> + Send + Sync + 'static,
    {
        self.then(name, move |page: Out| {
            check(&page)?;
            Ok(page)
        })
    }

    /// Append every step of another flow
    #[must_use]
    pub fn append<Next: 'static>(mut self, other: Flow<Out, Next>) -> Flow<In, Next> {
        self.steps.extend(other.steps);
        Flow {
            name: self.name,
            steps: self.steps,
            _types: PhantomData,
        }
    }

    /// Flow name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the flow has no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step names in execution order
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Execute every step in order, stopping at the first failure
    pub fn run(&self, initial: In) -> RecorridoResult<FlowOutcome<Out>> {
        let start = Instant::now();
        let mut value: AnyValue = Box::new(initial);

        for (i, step) in self.steps.iter().enumerate() {
            let step_index = i + 1;
            debug!(flow = %self.name, step = step_index, step_name = %step.name, "running step");
            value = (step.run)(value).map_err(|source| {
                info!(
                    flow = %self.name,
                    step = step_index,
                    step_name = %step.name,
                    signature = source.signature(),
                    "flow halted"
                );
                RecorridoError::Flow {
                    flow: self.name.clone(),
                    step_index,
                    step_name: step.name.clone(),
                    source: Box::new(source),
                }
            })?;
        }

        let page = value.downcast::<Out>().map_err(|_| {
            RecorridoError::invalid_state(format!(
                "flow '{}' produced an unexpected page type",
                self.name
            ))
        })?;
        Ok(FlowOutcome {
            page: *page,
            steps_executed: self.steps.len(),
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Start;
    #[derive(Debug, PartialEq)]
    struct Login(String);
    #[derive(Debug, PartialEq)]
    struct Home {
        user: String,
    }

    #[test]
    fn test_threads_pages_between_steps() {
        let flow = Flow::<Start, Start>::start("sign in")
            .then("navigate", |_: Start| Ok(Login(String::new())))
            .then("login", |_: Login| {
                Ok(Home {
                    user: "a@x.com".into(),
                })
            })
            .assert("home loaded", |home: &Home| {
                if home.user.is_empty() {
                    Err(RecorridoError::assertion("no user"))
                } else {
                    Ok(())
                }
            });
        assert_eq!(flow.len(), 3);
        assert_eq!(flow.step_names(), vec!["navigate", "login", "home loaded"]);

        let outcome = flow.run(Start).unwrap();
        assert_eq!(outcome.page.user, "a@x.com");
        assert_eq!(outcome.steps_executed, 3);
    }

    #[test]
    fn test_fail_fast_reports_step_two() {
        let third = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&third);
        let flow = Flow::<Start, Start>::start("three steps")
            .then("one", |s: Start| Ok(s))
            .then("two", |_: Start| -> RecorridoResult<Start> {
                Err(RecorridoError::Timeout {
                    description: "~sign-in actionable".into(),
                    elapsed: Duration::from_millis(10),
                    last_observed: "0 candidates".into(),
                })
            })
            .then("three", move |s: Start| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(s)
            });

        let err = flow.run(Start).unwrap_err();
        assert_eq!(third.load(Ordering::SeqCst), 0);
        match &err {
            RecorridoError::Flow {
                step_index,
                step_name,
                source,
                ..
            } => {
                assert_eq!(*step_index, 2);
                assert_eq!(step_name, "two");
                assert!(source.is_timeout());
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(err.step_index(), Some(2));
    }

    #[test]
    fn test_empty_flow_returns_input() {
        let flow = Flow::<Login, Login>::start("noop");
        assert!(flow.is_empty());
        let outcome = flow.run(Login("x".into())).unwrap();
        assert_eq!(outcome.page, Login("x".into()));
        assert_eq!(outcome.steps_executed, 0);
    }

    #[test]
    fn test_append_and_rerun() {
        let to_login = Flow::<Start, Start>::start("to login")
            .then("navigate", |_: Start| Ok(Login("a".into())));
        let to_home = Flow::<Login, Login>::start("to home")
            .then("login", |l: Login| Ok(Home { user: l.0 }));
        let journey = to_login.append(to_home);
        assert_eq!(journey.name(), "to login");
        assert_eq!(journey.step_names(), vec!["navigate", "login"]);
        assert_eq!(journey.run(Start).unwrap().page.user, "a");
        // flows are data; a second run starts fresh
        assert_eq!(journey.run(Start).unwrap().steps_executed, 2);
    }
}
