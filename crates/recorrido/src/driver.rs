//! ElementProvider - the narrow contract recorrido needs from an automation backend
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  ElementProvider (injected per lane)                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  find(locator)          -> [ElementRef]   (re-resolved per poll) │
//! │  is_actionable(element) -> bool                                  │
//! │  act(element, kind, payload) -> () | ActionRejected              │
//! │  screenshot / tree_dump / log_tail      (failure capture only)   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The core never caches an [`ElementRef`] beyond one poll iteration. A
//! backend (XCUITest, UiAutomator, a web driver, or [`crate::mock::ScriptedApp`])
//! implements this trait and is handed to the scheduler through a
//! [`crate::lane::LaneProvisioner`].

use crate::locator::Locator;
use crate::result::{RecorridoError, RecorridoResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transient handle to a resolved element, valid for one poll iteration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    /// Backend specific element identifier
    pub id: String,
    /// Human readable label for diagnostics
    pub label: Option<String>,
}

impl ElementRef {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
        }
    }

    /// Attach a diagnostic label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label} ({})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Swipe direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeDirection {
    /// Swipe up
    Up,
    /// Swipe down
    Down,
    /// Swipe left
    Left,
    /// Swipe right
    Right,
}

/// Action primitives a provider must support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Single tap
    Tap,
    /// Long press
    LongPress,
    /// Type the payload text
    TypeText,
    /// Clear an editable field
    Clear,
    /// Swipe starting on the element
    Swipe(SwipeDirection),
}

impl ActionKind {
    /// Name used in logs and errors
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Tap => "tap",
            Self::LongPress => "long_press",
            Self::TypeText => "type_text",
            Self::Clear => "clear",
            Self::Swipe(SwipeDirection::Up) => "swipe_up",
            Self::Swipe(SwipeDirection::Down) => "swipe_down",
            Self::Swipe(SwipeDirection::Left) => "swipe_left",
            Self::Swipe(SwipeDirection::Right) => "swipe_right",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Screenshot data with metadata
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// Raw PNG data
    pub data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Screenshot {
    /// Create a new screenshot
    #[must_use]
    pub const fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }
}

/// Element query and action capability injected into each lane
pub trait ElementProvider: Send + Sync {
    /// Resolve a locator to zero or more candidates
    fn find(&self, locator: &Locator) -> RecorridoResult<Vec<ElementRef>>;

    /// Whether the element is visible, enabled and stable
    fn is_actionable(&self, element: &ElementRef) -> bool;

    /// Perform an action on the element
    fn act(
        &self,
        element: &ElementRef,
        action: ActionKind,
        payload: Option<&str>,
    ) -> RecorridoResult<()>;

    /// Read the element's text, if it has any
    fn read_text(&self, element: &ElementRef) -> RecorridoResult<Option<String>> {
        let _ = element;
        Err(RecorridoError::provider("read_text is not supported"))
    }

    /// Capture the current screen
    fn screenshot(&self) -> RecorridoResult<Screenshot> {
        Err(RecorridoError::provider("screenshots are not supported"))
    }

    /// Dump the element tree
    fn tree_dump(&self) -> RecorridoResult<String> {
        Err(RecorridoError::provider("tree dumps are not supported"))
    }

    /// Most recent `lines` lines of the app/device log
    fn log_tail(&self, lines: usize) -> RecorridoResult<Vec<String>> {
        let _ = lines;
        Err(RecorridoError::provider("log capture is not supported"))
    }
}
