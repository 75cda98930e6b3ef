//! Result and error types for Recorrido.
//!
//! Every error carries a stable [`RecorridoError::signature`] so retry
//! whitelists can name the failures they consider transient, and a
//! [`FailureKind`] that decides whether a test ends as `fail` or `error`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for Recorrido operations
pub type RecorridoResult<T> = Result<T, RecorridoError>;

/// Who is to blame for a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The application under test (or the test itself) misbehaved
    Application,
    /// The execution environment could not be readied
    Infrastructure,
}

/// Errors that can occur in Recorrido
#[derive(Debug, Error)]
pub enum RecorridoError {
    /// A wait condition never became true
    #[error(
        "Timed out after {}ms waiting for {description} (last observed: {last_observed})",
        elapsed.as_millis()
    )]
    Timeout {
        /// What was waited for
        description: String,
        /// Time spent waiting
        elapsed: Duration,
        /// Provider state seen on the final poll
        last_observed: String,
    },

    /// A page action could not find its element in an actionable state
    #[error("Element {locator} not ready: {source}")]
    ElementNotReady {
        /// Rendered locator
        locator: String,
        /// Underlying wait failure
        source: Box<RecorridoError>,
    },

    /// The provider refused an action after a successful wait
    #[error("Action {action} on {target} rejected: {reason}")]
    ActionRejected {
        /// Action that was attempted
        action: String,
        /// Element the action targeted
        target: String,
        /// Provider supplied reason
        reason: String,
    },

    /// A transient failure recurred beyond the retry policy bounds
    #[error("Retry exhausted after {attempts} attempt(s) in {}ms: {last}", elapsed.as_millis())]
    RetryExhausted {
        /// Attempts made
        attempts: u32,
        /// Total time spent including backoff
        elapsed: Duration,
        /// Error returned by the final attempt
        #[source]
        last: Box<RecorridoError>,
    },

    /// A flow step failed
    #[error("Flow '{flow}' failed at step {step_index} ({step_name}): {source}")]
    Flow {
        /// Flow name
        flow: String,
        /// 1-based index of the failing step
        step_index: usize,
        /// Name of the failing step
        step_name: String,
        /// Error raised by the step
        source: Box<RecorridoError>,
    },

    /// A lane could not be provisioned
    #[error("Provisioning of lane {lane} failed after {attempts} attempt(s): {message}")]
    Provisioning {
        /// Lane label
        lane: String,
        /// Attempts made
        attempts: u32,
        /// Last provisioning failure
        message: String,
    },

    /// Diagnostic capture failed
    #[error("Capture failed for {test_id}: {message}")]
    Capture {
        /// Test being captured
        test_id: String,
        /// Error message
        message: String,
    },

    /// The test budget expired or the test was cancelled
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// Why the loop stopped
        reason: String,
    },

    /// An assertion evaluated false
    #[error("Assertion failed: {message}")]
    Assertion {
        /// Error message
        message: String,
    },

    /// A named element is not declared on a screen
    #[error("Screen '{screen}' has no element named '{name}'")]
    UnknownElement {
        /// Screen name
        screen: String,
        /// Requested element name
        name: String,
    },

    /// The provider could not answer a query
    #[error("Provider error: {message}")]
    Provider {
        /// Error message
        message: String,
    },

    /// Invalid state error (operation called in wrong state)
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl RecorridoError {
    /// Create an action rejection
    #[must_use]
    pub fn action_rejected(
        action: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ActionRejected {
            action: action.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create an assertion failure
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Create a provider error
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Stable signature used by retry whitelists and reports
    #[must_use]
    pub const fn signature(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::ElementNotReady { .. } => "element_not_ready",
            Self::ActionRejected { .. } => "action_rejected",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Flow { .. } => "flow",
            Self::Provisioning { .. } => "provisioning",
            Self::Capture { .. } => "capture",
            Self::Cancelled { .. } => "cancelled",
            Self::Assertion { .. } => "assertion",
            Self::UnknownElement { .. } => "unknown_element",
            Self::Provider { .. } => "provider",
            Self::InvalidState { .. } => "invalid_state",
            Self::Config { .. } => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Yaml(_) => "yaml",
        }
    }

    /// The error underneath any flow context
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Flow { source, .. } => source.root(),
            other => other,
        }
    }

    /// Signature of the innermost error behind flow and retry wrappers
    #[must_use]
    pub fn root_signature(&self) -> &'static str {
        match self {
            Self::Flow { source, .. } => source.root_signature(),
            Self::RetryExhausted { last, .. } => last.root_signature(),
            other => other.signature(),
        }
    }

    /// Classify the failure for the terminal test outcome
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self.root() {
            Self::Provisioning { .. } => FailureKind::Infrastructure,
            _ => FailureKind::Application,
        }
    }

    /// Step index of the failing flow step, if any
    #[must_use]
    pub const fn step_index(&self) -> Option<usize> {
        match self {
            Self::Flow { step_index, .. } => Some(*step_index),
            _ => None,
        }
    }

    /// Whether this is a timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this is a cancellation
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
