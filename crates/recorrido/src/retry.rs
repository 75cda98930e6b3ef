//! Retry Policy Engine
//!
//! Bounded, classified retries around a single operation.
//!
//! An operation reports one of three [`AttemptOutcome`]s. Only `Retryable`
//! outcomes are retried, and only while attempts remain. Assertion failures
//! are fatal unless a caller explicitly whitelists the `assertion` signature,
//! so a flaky check cannot silently turn into a pass.
//!
//! ```text
//! attempt 1 ──► Success ─────────────────────────────► Ok(value)
//!     │
//!     ├──► Fatal(e) ─────────────────────────────────► Err(e)
//!     │
//!     └──► Retryable(e) ──► attempts left? ── no ────► Err(RetryExhausted)
//!                                │
//!                               yes ──► backoff(n) ──► attempt n+1
//! ```

use crate::cancel::CancelToken;
use crate::result::{RecorridoError, RecorridoResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default attempt ceiling
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Signature retried by default
pub const DEFAULT_RETRYABLE_SIGNATURE: &str = "action_rejected";

/// Classified outcome of one attempt
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    /// The attempt succeeded
    Success(T),
    /// The attempt failed in a way the policy may retry
    Retryable(RecorridoError),
    /// The attempt failed permanently
    Fatal(RecorridoError),
}

impl<T> AttemptOutcome<T> {
    /// Whether the attempt succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

// =============================================================================
// BACKOFF
// =============================================================================

/// Delay between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffSchedule {
    /// Retry immediately
    None,
    /// The same delay before every retry
    Fixed {
        /// Delay in milliseconds
        delay_ms: u64,
    },
    /// `initial * factor^(n-1)`, capped at `max`
    Exponential {
        /// First delay in milliseconds
        initial_ms: u64,
        /// Growth factor
        factor: f64,
        /// Upper bound in milliseconds
        max_ms: u64,
    },
    /// Explicit per-retry delays; the last entry repeats
    Explicit {
        /// Delays in milliseconds
        delays_ms: Vec<u64>,
    },
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::Exponential {
            initial_ms: 100,
            factor: 2.0,
            max_ms: 2_000,
        }
    }
}

impl BackoffSchedule {
    /// Fixed delay
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Delay before retry number `retry` (1 = the delay after the first failure)
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Self::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => {
                let exp = i32::try_from(retry - 1).unwrap_or(i32::MAX);
                let raw = (*initial_ms as f64) * factor.max(1.0).powi(exp);
                let capped = if raw.is_finite() {
                    raw.min(*max_ms as f64)
                } else {
                    *max_ms as f64
                };
                Duration::from_millis(capped as u64)
            }
            Self::Explicit { delays_ms } => {
                let idx = (retry - 1) as usize;
                delays_ms
                    .get(idx)
                    .or_else(|| delays_ms.last())
                    .map_or(Duration::ZERO, |ms| Duration::from_millis(*ms))
            }
        }
    }
}

// =============================================================================
// MATCHER
// =============================================================================

/// Decides which failures are transient
#[derive(Clone)]
pub enum RetryMatcher {
    /// Retry errors whose signature is listed
    Whitelist(BTreeSet<String>),
    /// Retry errors the predicate accepts
    Predicate(Arc<dyn Fn(&RecorridoError) -> bool + Send + Sync>),
}

impl fmt::Debug for RetryMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whitelist(set) => f.debug_tuple("Whitelist").field(set).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl Default for RetryMatcher {
    fn default() -> Self {
        Self::whitelist([DEFAULT_RETRYABLE_SIGNATURE])
    }
}

impl RetryMatcher {
    /// Whitelist from signatures
    pub fn whitelist<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Whitelist(signatures.into_iter().map(Into::into).collect())
    }

    /// Custom predicate
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&RecorridoError) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Whether `err` is transient
    #[must_use]
    pub fn matches(&self, err: &RecorridoError) -> bool {
        match self {
            Self::Whitelist(set) => set.contains(err.signature()),
            Self::Predicate(f) => f(err),
        }
    }
}

// =============================================================================
// POLICY
// =============================================================================

/// What to do after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep then try again
    RetryAfter(Duration),
    /// Stop: the error is not transient
    GiveUp,
    /// Stop: the attempt ceiling was reached
    Exhausted,
}

/// Retry bounds, backoff and failure classification
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffSchedule,
    matcher: RetryMatcher,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffSchedule::default(),
            matcher: RetryMatcher::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    #[must_use]
    pub fn new(max_attempts: u32, backoff: BackoffSchedule, matcher: RetryMatcher) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            matcher,
        }
    }

    /// A policy that never retries
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(
            1,
            BackoffSchedule::None,
            RetryMatcher::whitelist::<_, String>([]),
        )
    }

    /// Set the attempt ceiling (minimum 1)
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the backoff schedule
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the matcher
    #[must_use]
    pub fn with_matcher(mut self, matcher: RetryMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Attempt ceiling
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff schedule
    #[must_use]
    pub const fn backoff(&self) -> &BackoffSchedule {
        &self.backoff
    }

    /// Classify a raw result into an attempt outcome
    pub fn classify<T>(&self, result: RecorridoResult<T>) -> AttemptOutcome<T> {
        match result {
            Ok(v) => AttemptOutcome::Success(v),
            Err(e) if self.matcher.matches(&e) => AttemptOutcome::Retryable(e),
            Err(e) => AttemptOutcome::Fatal(e),
        }
    }

    /// Decide what follows a failed attempt number `attempt` (1-based)
    #[must_use]
    pub fn decide(&self, attempt: u32, err: &RecorridoError) -> RetryDecision {
        if !self.matcher.matches(err) {
            RetryDecision::GiveUp
        } else if attempt >= self.max_attempts {
            RetryDecision::Exhausted
        } else {
            RetryDecision::RetryAfter(self.backoff.delay_for(attempt))
        }
    }

    /// Run `op` under this policy
    ///
    /// `op` receives the 1-based attempt number.
    pub fn execute<T, F>(&self, cancel: &CancelToken, mut op: F) -> RecorridoResult<Retried<T>>
    where
        F: FnMut(u32) -> RecorridoResult<T>,
    {
        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            cancel.check()?;
            attempt += 1;
            let err = match self.classify(op(attempt)) {
                AttemptOutcome::Success(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    });
                }
                AttemptOutcome::Fatal(err) => return Err(err),
                AttemptOutcome::Retryable(err) => err,
            };

            match self.decide(attempt, &err) {
                RetryDecision::GiveUp => return Err(err),
                RetryDecision::Exhausted => {
                    warn!(
                        attempts = attempt,
                        signature = err.signature(),
                        "retry budget exhausted"
                    );
                    return Err(RecorridoError::RetryExhausted {
                        attempts: attempt,
                        elapsed: start.elapsed(),
                        last: Box::new(err),
                    });
                }
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        signature = err.signature(),
                        error = %err,
                        "transient failure, retrying"
                    );
                    cancel.sleep(delay)?;
                }
            }
        }
    }
}

/// Successful result of [`RetryPolicy::execute`]
#[derive(Debug, Clone)]
pub struct Retried<T> {
    /// Value returned by the successful attempt
    pub value: T,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Total time including backoff
    pub elapsed: Duration,
}

/// Run `op` under `policy`, returning only the value
pub fn with_retry<T, F>(policy: &RetryPolicy, cancel: &CancelToken, op: F) -> RecorridoResult<T>
where
    F: FnMut(u32) -> RecorridoResult<T>,
{
    policy.execute(cancel, op).map(|r| r.value)
}
