//! Test suites, selectors and the per-test context.

use crate::cancel::CancelToken;
use crate::lane::{LaneId, LaneProvisioner};
use crate::page_object::PageContext;
use crate::result::{RecorridoError, RecorridoResult};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Body of a test case
pub type TestBody = Arc<dyn Fn(&TestContext) -> RecorridoResult<()> + Send + Sync>;

/// A single test case
#[derive(Clone)]
pub struct TestCase {
    id: String,
    tags: BTreeSet<String>,
    timeout: Option<Duration>,
    body: TestBody,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.id)
            .field("tags", &self.tags)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TestCase {
    /// Create a test case
    pub fn new<F>(id: impl Into<String>, body: F) -> Self
    where
        F: Fn(&TestContext) -> RecorridoResult<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            tags: BTreeSet::new(),
            timeout: None,
            body: Arc::new(body),
        }
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let _ = self.tags.insert(tag.into());
        self
    }

    /// Override the whole-test budget
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Test identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tags
    #[must_use]
    pub const fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Per-test budget override
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run the body
    pub fn run(&self, ctx: &TestContext) -> RecorridoResult<()> {
        (self.body)(ctx)
    }
}

/// An ordered collection of test cases
#[derive(Debug, Clone)]
pub struct Suite {
    name: String,
    tests: Vec<TestCase>,
}

impl Suite {
    /// Create an empty suite
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
        }
    }

    /// Append a test case
    #[must_use]
    pub fn with_test(mut self, test: TestCase) -> Self {
        self.tests.push(test);
        self
    }

    /// Append a test case built from a closure
    #[must_use]
    pub fn test<F>(self, id: impl Into<String>, body: F) -> Self
    where
        F: Fn(&TestContext) -> RecorridoResult<()> + Send + Sync + 'static,
    {
        self.with_test(TestCase::new(id, body))
    }

    /// Append a test case
    pub fn add_test(&mut self, test: TestCase) {
        self.tests.push(test);
    }

    /// Suite name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tests in declaration order
    #[must_use]
    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    /// Get test count
    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Whether the suite has no tests
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// A copy holding only the tests `selector` accepts
    #[must_use]
    pub fn filter(&self, selector: &SuiteSelector) -> Self {
        Self {
            name: self.name.clone(),
            tests: self
                .tests
                .iter()
                .filter(|t| selector.matches(t))
                .cloned()
                .collect(),
        }
    }

    /// Reject suites that reuse a test identifier
    pub fn validate(&self) -> RecorridoResult<()> {
        let mut seen = BTreeSet::new();
        for test in &self.tests {
            if !seen.insert(test.id()) {
                return Err(RecorridoError::invalid_state(format!(
                    "suite '{}' declares test '{}' twice",
                    self.name,
                    test.id()
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// SELECTOR
// =============================================================================

#[derive(Debug, Clone)]
enum Term {
    Name(Regex),
    Tag(String),
}

/// Comma-separated test filter: `login*`, `*checkout*`, `tag:smoke`
///
/// A test is selected when any term matches. `*` matches any run of
/// characters; names are matched in full.
#[derive(Debug, Clone)]
pub struct SuiteSelector {
    terms: Vec<Term>,
}

impl SuiteSelector {
    /// Select every test
    #[must_use]
    pub const fn all() -> Self {
        Self { terms: Vec::new() }
    }

    /// Parse a filter expression
    pub fn parse(expr: &str) -> RecorridoResult<Self> {
        let terms = expr
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|term| {
                if let Some(tag) = term.strip_prefix("tag:") {
                    return Ok(Term::Tag(tag.to_string()));
                }
                let pattern = term
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*");
                Regex::new(&format!("^{pattern}$"))
                    .map(Term::Name)
                    .map_err(|e| RecorridoError::config(format!("bad filter '{term}': {e}")))
            })
            .collect::<RecorridoResult<Vec<_>>>()?;
        Ok(Self { terms })
    }

    /// Whether `test` is selected
    #[must_use]
    pub fn matches(&self, test: &TestCase) -> bool {
        self.terms.is_empty()
            || self.terms.iter().any(|term| match term {
                Term::Name(re) => re.is_match(test.id()),
                Term::Tag(tag) => test.tags().contains(tag),
            })
    }
}

impl Default for SuiteSelector {
    fn default() -> Self {
        Self::all()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// A suite together with the provisioner that readies its lanes
#[derive(Clone)]
pub struct RegisteredSuite {
    /// The suite
    pub suite: Suite,
    /// Lane provisioner for the suite's target app
    pub provisioner: Arc<dyn LaneProvisioner>,
}

impl fmt::Debug for RegisteredSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredSuite")
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

/// Named suites an embedding binary makes runnable
#[derive(Debug, Clone, Default)]
pub struct SuiteRegistry {
    suites: BTreeMap<String, RegisteredSuite>,
}

impl SuiteRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a suite under its name, replacing any previous entry
    pub fn register(&mut self, suite: Suite, provisioner: Arc<dyn LaneProvisioner>) {
        let _ = self.suites.insert(
            suite.name().to_string(),
            RegisteredSuite { suite, provisioner },
        );
    }

    /// Look up a suite
    pub fn get(&self, name: &str) -> RecorridoResult<&RegisteredSuite> {
        self.suites.get(name).ok_or_else(|| {
            let known: Vec<_> = self.suites.keys().map(String::as_str).collect();
            RecorridoError::config(format!(
                "unknown suite '{name}' (available: {})",
                known.join(", ")
            ))
        })
    }

    /// Registered suites in name order
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredSuite> {
        self.suites.values()
    }

    /// Number of suites
    #[must_use]
    pub fn len(&self) -> usize {
        self.suites.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }
}

// =============================================================================
// TEST CONTEXT
// =============================================================================

/// Everything a test body may touch, private to one test on one lane
#[derive(Debug, Clone)]
pub struct TestContext {
    test_id: String,
    lane: LaneId,
    page: PageContext,
    cancel: CancelToken,
}

impl TestContext {
    /// Assemble a context
    #[must_use]
    pub fn new(
        test_id: impl Into<String>,
        lane: LaneId,
        page: PageContext,
        cancel: CancelToken,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            lane,
            page,
            cancel,
        }
    }

    /// Test identifier
    #[must_use]
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Lane running the test
    #[must_use]
    pub const fn lane(&self) -> &LaneId {
        &self.lane
    }

    /// Binding used to construct the first page object
    #[must_use]
    pub fn page(&self) -> PageContext {
        self.page.clone()
    }

    /// Element tree of the current screen, for diagnostics only
    pub fn tree_dump(&self) -> RecorridoResult<String> {
        self.page.provider().tree_dump()
    }

    /// Last `lines` device/app log lines, for diagnostics only
    pub fn log_tail(&self, lines: usize) -> RecorridoResult<Vec<String>> {
        self.page.provider().log_tail(lines)
    }

    /// The test's cancellation token
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}
