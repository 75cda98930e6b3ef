//! Locators: immutable descriptions of how to find an element.
//!
//! A [`Locator`] never holds element state. Every query re-resolves it
//! through the provider, so the same locator can be reused across polls and
//! screens. Equality is structural: two locators built the same way are
//! equal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How an element is identified inside the element tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Selector {
    /// Accessibility identifier (iOS `accessibilityIdentifier`, Android content description)
    AccessibilityId(String),
    /// Visible text
    Text(String),
    /// Platform resource / test identifier
    ResourceId(String),
    /// Class chain or view-type path (e.g. `XCUIElementTypeButton`)
    ClassChain(String),
}

impl Selector {
    /// Short prefix used when rendering the selector
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::AccessibilityId(_) => "~",
            Self::Text(_) => "text=",
            Self::ResourceId(_) => "id=",
            Self::ClassChain(_) => "class=",
        }
    }

    /// The raw selector value
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::AccessibilityId(v)
            | Self::Text(v)
            | Self::ResourceId(v)
            | Self::ClassChain(v) => v,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(t) => write!(f, "text={t:?}"),
            other => write!(f, "{}{}", other.prefix(), other.value()),
        }
    }
}

/// An immutable element locator with an optional parent scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    selector: Selector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<Box<Locator>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
}

impl Locator {
    /// Create a locator from a selector
    #[must_use]
    pub const fn new(selector: Selector) -> Self {
        Self {
            selector,
            scope: None,
            index: None,
        }
    }

    /// Locate by accessibility identifier
    #[must_use]
    pub fn accessibility_id(id: impl Into<String>) -> Self {
        Self::new(Selector::AccessibilityId(id.into()))
    }

    /// Locate by visible text
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Selector::Text(text.into()))
    }

    /// Locate by resource identifier
    #[must_use]
    pub fn resource_id(id: impl Into<String>) -> Self {
        Self::new(Selector::ResourceId(id.into()))
    }

    /// Locate by class chain
    #[must_use]
    pub fn class_chain(chain: impl Into<String>) -> Self {
        Self::new(Selector::ClassChain(chain.into()))
    }

    /// Restrict the search to descendants of `parent`
    #[must_use]
    pub fn within(mut self, parent: Self) -> Self {
        self.scope = Some(Box::new(parent));
        self
    }

    /// Select the `n`th (0-based) candidate instead of the first actionable one
    #[must_use]
    pub const fn nth(mut self, n: usize) -> Self {
        self.index = Some(n);
        self
    }

    /// The selector
    #[must_use]
    pub const fn selector(&self) -> &Selector {
        &self.selector
    }

    /// The parent scope, if any
    #[must_use]
    pub fn scope(&self) -> Option<&Self> {
        self.scope.as_deref()
    }

    /// Candidate index, if pinned
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        self.index
    }

    /// Depth of the scope chain (0 for an unscoped locator)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scope().map_or(0, |s| s.depth() + 1)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scope) = self.scope() {
            write!(f, "{scope} >> ")?;
        }
        write!(f, "{}", self.selector)?;
        if let Some(n) = self.index {
            write!(f, "[{n}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod selector_tests {
        use super::*;

        #[test]
        fn test_display() {
            assert_eq!(Selector::AccessibilityId("ok".into()).to_string(), "~ok");
            assert_eq!(Selector::Text("Sign in".into()).to_string(), "text=\"Sign in\"");
            assert_eq!(Selector::ResourceId("btn".into()).to_string(), "id=btn");
            assert_eq!(
                Selector::ClassChain("Button".into()).to_string(),
                "class=Button"
            );
        }

        #[test]
        fn test_value() {
            assert_eq!(Selector::Text("hello".into()).value(), "hello");
        }
    }

    mod locator_tests {
        use super::*;

        #[test]
        fn test_structural_equality() {
            let a = Locator::accessibility_id("login").within(Locator::resource_id("form"));
            let b = Locator::accessibility_id("login").within(Locator::resource_id("form"));
            assert_eq!(a, b);
            assert_ne!(a, Locator::accessibility_id("login"));
        }

        #[test]
        fn test_builders_do_not_mutate_original() {
            let base = Locator::text("Item");
            let pinned = base.clone().nth(2);
            assert_eq!(base.index(), None);
            assert_eq!(pinned.index(), Some(2));
        }

        #[test]
        fn test_scoped_display() {
            let loc = Locator::text("Delete")
                .within(Locator::accessibility_id("row-3"))
                .nth(0);
            assert_eq!(loc.to_string(), "~row-3 >> text=\"Delete\"[0]");
            assert_eq!(loc.depth(), 1);
        }

        #[test]
        fn test_serde_round_trip_keeps_scope() {
            let loc = Locator::resource_id("email").within(Locator::class_chain("Form"));
            let json = serde_json::to_string(&loc).unwrap();
            let back: Locator = serde_json::from_str(&json).unwrap();
            assert_eq!(loc, back);
        }
    }
}
