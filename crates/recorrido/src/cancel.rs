//! Cooperative cancellation for wait and retry loops.
//!
//! A [`CancelToken`] combines a shared flag with an optional deadline. Loops
//! call [`CancelToken::check`] on every iteration and sleep through
//! [`CancelToken::sleep`], so a test whose budget expires releases its lane
//! within one sleep slice.

use crate::result::{RecorridoError, RecorridoResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep between flag checks
pub const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Shared cancellation flag with an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that only cancels when [`CancelToken::cancel`] is called
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that expires at `deadline`
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// A token that expires `budget` from now
    #[must_use]
    pub fn with_budget(budget: Duration) -> Self {
        Self::with_deadline(Instant::now() + budget)
    }

    /// Cancel every clone of this token
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Deadline, if any
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the flag is set or the deadline has passed
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline (`None` when unbounded)
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Clamp a delay so it never overshoots the deadline
    #[must_use]
    pub fn clamp(&self, delay: Duration) -> Duration {
        self.remaining().map_or(delay, |left| delay.min(left))
    }

    /// Fail with [`RecorridoError::Cancelled`] if the token has fired
    pub fn check(&self) -> RecorridoResult<()> {
        if self.flag.load(Ordering::SeqCst) {
            return Err(RecorridoError::Cancelled {
                reason: "cancelled".to_string(),
            });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(RecorridoError::Cancelled {
                reason: "test budget exhausted".to_string(),
            });
        }
        Ok(())
    }

    /// Sleep for `delay`, waking early if the token fires
    pub fn sleep(&self, delay: Duration) -> RecorridoResult<()> {
        let until = Instant::now() + self.clamp(delay);
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep((until - now).min(SLEEP_SLICE));
        }
    }
}
