//! Lane pool: isolated execution slots for parallel tests.
//!
//! A lane is one device/simulator/browser slot. Each slot holds its state in
//! an atomic, so claiming a lane is a single compare-and-swap and a lane is
//! never held by two tests at once.
//!
//! ```text
//!        try_claim()            activate()
//! Idle ──────────────► Provisioning ──────────► InUse
//!  ▲                        │                     │
//!  │                        │ begin_capture()     │ begin_capture()
//!  │                        ▼                     ▼
//!  └──────── drop ─────── Capturing ◄─────────────┘
//! ```
//!
//! Every claimed lane returns to `Idle` when its [`LaneClaim`] drops,
//! including when the test body panicked.

use crate::driver::ElementProvider;
use crate::result::{RecorridoError, RecorridoResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Target used when none is configured
pub const DEFAULT_TARGET: &str = "default";

/// Lane lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LaneState {
    /// Free to claim
    Idle = 0,
    /// Claimed; a fresh session is being readied
    Provisioning = 1,
    /// Running a test
    InUse = 2,
    /// Collecting failure diagnostics
    Capturing = 3,
}

impl LaneState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Provisioning,
            2 => Self::InUse,
            3 => Self::Capturing,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for LaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Provisioning => "provisioning",
            Self::InUse => "in_use",
            Self::Capturing => "capturing",
        };
        f.write_str(s)
    }
}

/// Identity of a lane
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaneId {
    /// Slot index
    pub index: usize,
    /// Device or simulator target the lane drives
    pub target: Arc<str>,
}

impl LaneId {
    /// Create a lane id
    #[must_use]
    pub fn new(index: usize, target: impl Into<Arc<str>>) -> Self {
        Self {
            index,
            target: target.into(),
        }
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane-{}@{}", self.index, self.target)
    }
}

/// Per-lane counters
#[derive(Debug, Default)]
pub struct LaneStats {
    tests_run: AtomicU64,
    failures: AtomicU64,
    provision_failures: AtomicU64,
}

/// Point-in-time copy of [`LaneStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStatsSnapshot {
    /// Tests that ran on this lane
    pub tests_run: u64,
    /// Tests that did not pass
    pub failures: u64,
    /// Provisioning attempts that failed
    pub provision_failures: u64,
}

impl LaneStats {
    /// Snapshot the counters
    #[must_use]
    pub fn snapshot(&self) -> LaneStatsSnapshot {
        LaneStatsSnapshot {
            tests_run: self.tests_run.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            provision_failures: self.provision_failures.load(Ordering::Relaxed),
        }
    }
}

struct Slot {
    id: LaneId,
    state: AtomicU8,
    stats: LaneStats,
}

impl Slot {
    fn load(&self) -> LaneState {
        LaneState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Fixed set of lanes
pub struct LanePool {
    slots: Vec<Slot>,
}

impl fmt::Debug for LanePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|s| (s.id.to_string(), s.load())))
            .finish()
    }
}

impl LanePool {
    /// Create `size` lanes, assigning targets round-robin
    ///
    /// An empty target list drives every lane against [`DEFAULT_TARGET`].
    #[must_use]
    pub fn new(size: usize, targets: &[String]) -> Self {
        let size = size.max(1);
        let slots = (0..size)
            .map(|index| {
                let target: Arc<str> = if targets.is_empty() {
                    Arc::from(DEFAULT_TARGET)
                } else {
                    Arc::from(targets[index % targets.len()].as_str())
                };
                Slot {
                    id: LaneId { index, target },
                    state: AtomicU8::new(LaneState::Idle as u8),
                    stats: LaneStats::default(),
                }
            })
            .collect();
        Self { slots }
    }

    /// Number of lanes
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool has no lanes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Claim the first idle lane
    pub fn try_claim(&self) -> Option<LaneClaim<'_>> {
        self.slots.iter().find_map(|slot| {
            slot.state
                .compare_exchange(
                    LaneState::Idle as u8,
                    LaneState::Provisioning as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .ok()
                .map(|_| LaneClaim { slot })
        })
    }

    /// Current state of lane `index`
    #[must_use]
    pub fn state(&self, index: usize) -> Option<LaneState> {
        self.slots.get(index).map(Slot::load)
    }

    /// Counters for lane `index`
    #[must_use]
    pub fn stats(&self, index: usize) -> Option<LaneStatsSnapshot> {
        self.slots.get(index).map(|s| s.stats.snapshot())
    }

    /// Lane ids in slot order
    pub fn lanes(&self) -> impl Iterator<Item = &LaneId> {
        self.slots.iter().map(|s| &s.id)
    }

    /// Number of idle lanes
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.load() == LaneState::Idle)
            .count()
    }
}

/// Exclusive hold on one lane; releases it to `Idle` on drop
pub struct LaneClaim<'a> {
    slot: &'a Slot,
}

impl fmt::Debug for LaneClaim<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaneClaim")
            .field("lane", &self.slot.id.to_string())
            .field("state", &self.state())
            .finish()
    }
}

impl LaneClaim<'_> {
    /// The claimed lane
    #[must_use]
    pub const fn id(&self) -> &LaneId {
        &self.slot.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> LaneState {
        self.slot.load()
    }

    fn transition(&self, from: &[LaneState], to: LaneState) -> RecorridoResult<()> {
        let current = self.state();
        if !from.contains(&current) {
            return Err(RecorridoError::invalid_state(format!(
                "{} cannot move from {current} to {to}",
                self.slot.id
            )));
        }
        self.slot.state.store(to as u8, Ordering::Release);
        Ok(())
    }

    /// Provisioning finished; the test may start
    pub fn activate(&self) -> RecorridoResult<()> {
        self.transition(&[LaneState::Provisioning], LaneState::InUse)?;
        self.slot.stats.tests_run.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// The test failed; diagnostics are being collected
    pub fn begin_capture(&self) -> RecorridoResult<()> {
        self.transition(
            &[LaneState::Provisioning, LaneState::InUse],
            LaneState::Capturing,
        )?;
        self.slot.stats.failures.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record a failed provisioning attempt
    pub fn record_provision_failure(&self) {
        self.slot
            .stats
            .provision_failures
            .fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for LaneClaim<'_> {
    fn drop(&mut self) {
        self.slot
            .state
            .store(LaneState::Idle as u8, Ordering::Release);
    }
}

/// Readies a fresh session for a lane before each test
pub trait LaneProvisioner: Send + Sync {
    /// Create a clean session: fresh app install or reset, cleared state
    fn provision(&self, lane: &LaneId) -> RecorridoResult<Arc<dyn ElementProvider>>;

    /// Tear the session down after the test (and after any capture)
    fn teardown(&self, lane: &LaneId, session: Arc<dyn ElementProvider>) {
        let _ = (lane, session);
    }
}

/// Closure-backed provisioner
pub struct FnProvisioner<F> {
    func: F,
}

impl<F> FnProvisioner<F>
where
    F: Fn(&LaneId) -> RecorridoResult<Arc<dyn ElementProvider>> + Send + Sync,
{
    /// Create a provisioner from a closure
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> LaneProvisioner for FnProvisioner<F>
where
    F: Fn(&LaneId) -> RecorridoResult<Arc<dyn ElementProvider>> + Send + Sync,
{
    fn provision(&self, lane: &LaneId) -> RecorridoResult<Arc<dyn ElementProvider>> {
        (self.func)(lane)
    }
}
