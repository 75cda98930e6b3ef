//! Recorrido: UI Test Orchestration for Element-Based Apps
//!
//! Recorrido (Spanish: "a walk through") drives end-to-end UI tests against
//! any element provider: a mobile automation server, a simulator bridge, or
//! the scripted in-memory app in [`mock`]. It owns the parts that make such
//! suites deterministic: condition-based waiting, page objects, flow
//! composition, whitelisted retries, lane-isolated parallelism and
//! exactly-once failure capture.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   RECORRIDO Architecture                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Suite      │    │ Scheduler  │    │ LanePool   │            │
//! │   │ TestCase   │───►│ (workers)  │───►│ lane-N     │            │
//! │   └────────────┘    └─────┬──────┘    └─────┬──────┘            │
//! │                           │                 │ provision         │
//! │                           ▼                 ▼                   │
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Flow       │───►│ PageObject │───►│ Element    │            │
//! │   │ (steps)    │    │ PageContext│    │ Provider   │            │
//! │   └────────────┘    └─────┬──────┘    └────────────┘            │
//! │                           │ wait + retry                        │
//! │                           ▼                                     │
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Waiter     │    │ RetryPolicy│    │ Artifact   │            │
//! │   │ (polling)  │    │ (whitelist)│    │ Store      │            │
//! │   └────────────┘    └────────────┘    └────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```
//! use recorrido::mock::{ScriptedApp, ScriptedElement};
//! use recorrido::{FnProvisioner, HarnessConfig, LaneId, Locator, Scheduler, Suite};
//! use recorrido::ElementProvider;
//! use std::sync::Arc;
//!
//! let provisioner = Arc::new(FnProvisioner::new(|_: &LaneId| {
//!     let app = ScriptedApp::builder()
//!         .screen("home", [ScriptedElement::new("greeting").with_text("hola")])
//!         .build();
//!     Ok(Arc::new(app) as Arc<dyn ElementProvider>)
//! }));
//! let dir = std::env::temp_dir().join("recorrido-doc");
//! let scheduler = Scheduler::new(HarnessConfig::default().with_artifact_dir(dir), provisioner);
//! let suite = Suite::new("smoke").test("greets", |ctx| {
//!     let text = ctx.page().read_text(&Locator::accessibility_id("greeting"))?;
//!     ctx.page().assert_that(text == "hola", "greeting text")
//! });
//! let report = scheduler.run(&suite, 2).unwrap();
//! assert!(report.all_passed());
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

pub mod cancel;
pub mod capture;
pub mod config;
pub mod driver;
pub mod flow;
pub mod lane;
pub mod locator;
pub mod mock;
pub mod page_object;
pub mod report;
pub mod result;
pub mod retry;
pub mod scheduler;
pub mod suite;
pub mod wait;

pub use cancel::CancelToken;
pub use capture::{
    ArtifactStore, CaptureRun, FailureArtifact, FailureRecord, PayloadKind, PayloadRecord,
};
pub use config::HarnessConfig;
pub use driver::{ActionKind, ElementProvider, ElementRef, Screenshot, SwipeDirection};
pub use flow::{Flow, FlowOutcome};
pub use lane::{
    FnProvisioner, LaneClaim, LaneId, LanePool, LaneProvisioner, LaneState, LaneStatsSnapshot,
};
pub use locator::{Locator, Selector};
pub use page_object::{PageContext, PageObject, ScreenBuilder, SimpleScreen};
pub use report::{
    render_summary, JsonLinesSink, MemorySink, Outcome, ResultSink, SuiteReport, TestResult,
};
pub use result::{FailureKind, RecorridoError, RecorridoResult};
pub use retry::{
    with_retry, AttemptOutcome, BackoffSchedule, Retried, RetryDecision, RetryMatcher, RetryPolicy,
};
pub use scheduler::Scheduler;
pub use suite::{
    RegisteredSuite, Suite, SuiteRegistry, SuiteSelector, TestBody, TestCase, TestContext,
};
pub use wait::{
    wait_until, ElementCondition, ElementState, FnCondition, Probe, WaitCondition, WaitSpec,
    Waited, Waiter,
};

/// Everything a test author needs
pub mod prelude {
    pub use super::flow::*;
    pub use super::locator::*;
    pub use super::page_object::*;
    pub use super::result::*;
    pub use super::suite::*;
    pub use super::wait::*;
    pub use super::{ElementProvider, HarnessConfig, Scheduler, SwipeDirection};
}
