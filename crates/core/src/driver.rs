// crates/core/src/driver.rs
//! The `ActionDriver` capability: navigate, inspect and click against a remote
//! page-automation backend.
//!
//! Implementations include:
//! - `autofollow_webdriver::WebDriverSession`: W3C WebDriver over HTTP
//! - `autofollow_core::testing::ScriptedDriver`: in-memory pages for tests (feature `testing`)

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How an element is located on the page.
///
/// Encoded as a one-key map, `{css: ...}` or `{xpath: ...}`, in every format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SelectorRepr", into = "SelectorRepr")]
pub enum Selector {
    Css(String),
    XPath(String),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SelectorRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    xpath: Option<String>,
}

impl TryFrom<SelectorRepr> for Selector {
    type Error = String;

    fn try_from(value: SelectorRepr) -> Result<Self, Self::Error> {
        match (value.css, value.xpath) {
            (Some(css), None) => Ok(Self::Css(css)),
            (None, Some(xpath)) => Ok(Self::XPath(xpath)),
            (None, None) => Err("selector needs a `css` or `xpath` key".into()),
            (Some(_), Some(_)) => Err("selector takes only one of `css` and `xpath`".into()),
        }
    }
}

impl From<Selector> for SelectorRepr {
    fn from(value: Selector) -> Self {
        match value {
            Selector::Css(css) => Self {
                css: Some(css),
                xpath: None,
            },
            Selector::XPath(xpath) => Self {
                css: None,
                xpath: Some(xpath),
            },
        }
    }
}

impl Selector {
    pub fn css(value: impl Into<String>) -> Self {
        Self::Css(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::XPath(value.into())
    }

    /// The raw locator expression, without its strategy.
    pub fn expression(&self) -> &str {
        match self {
            Self::Css(s) | Self::XPath(s) => s,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={s}"),
            Self::XPath(s) => write!(f, "xpath={s}"),
        }
    }
}

/// Opaque reference to an element found by a driver.
///
/// Only meaningful to the driver that produced it, and only while the page it
/// was found on is still loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

/// Opaque handle to a secondary browsing context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(pub String);

/// What a click is aimed at.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Selector(&'a Selector),
    Element(&'a ElementRef),
}

/// Errors raised by an [`ActionDriver`].
///
/// `Timeout` and `Interaction` are recoverable: the caller may skip the item
/// or retry the page. `Session` means the driver can no longer be used.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    #[error("{operation} failed: {message}")]
    Interaction { operation: String, message: String },

    #[error("driver session lost: {0}")]
    Session(String),
}

impl DriverError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn interaction(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Interaction {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True for errors the traversal absorbs locally (skip item / retry page).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Interaction { .. })
    }
}

/// Page-automation primitives used by the traversal engine.
///
/// A driver owns one primary browsing context. `open_context` creates an
/// isolated secondary context and makes it current; `close_context` releases
/// it and returns to the primary one. Callers must pair every successful
/// `open_context` with a `close_context`, on every exit path.
#[async_trait]
pub trait ActionDriver: Send {
    /// Load `url` in the current context.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Replace the value of the input matched by `selector`.
    async fn fill(&mut self, selector: &Selector, text: &str) -> Result<(), DriverError>;

    /// Wait until an element matching `selector` is displayed.
    async fn wait_for_visible(
        &mut self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// All elements currently matching `selector`, in document order.
    async fn query_all(&mut self, selector: &Selector) -> Result<Vec<ElementRef>, DriverError>;

    /// First descendant of `parent` matching `selector`, if any.
    async fn query_within(
        &mut self,
        parent: &ElementRef,
        selector: &Selector,
    ) -> Result<Option<ElementRef>, DriverError>;

    async fn read_attribute(
        &mut self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    async fn click(&mut self, target: Target<'_>) -> Result<(), DriverError>;

    async fn open_context(&mut self) -> Result<ContextId, DriverError>;

    async fn close_context(&mut self, context: ContextId) -> Result<(), DriverError>;

    /// Release the primary context and anything still open.
    async fn shutdown(&mut self) -> Result<(), DriverError>;
}

/// Creates a fresh driver session for each job.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ActionDriver>, DriverError>;

    /// Backend name for logging (e.g. "webdriver", "scripted").
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_serializes_with_strategy_key() {
        let css = serde_json::to_string(&Selector::css(".blog_box")).unwrap();
        assert_eq!(css, r#"{"css":".blog_box"}"#);

        let xpath: Selector = serde_json::from_str(r#"{"xpath":"//a"}"#).unwrap();
        assert_eq!(xpath, Selector::xpath("//a"));
        assert_eq!(xpath.expression(), "//a");
    }

    #[test]
    fn selector_reads_yaml_map_form() {
        let css: Selector = serde_yaml::from_str(r#"{ css: ".card" }"#).unwrap();
        assert_eq!(css, Selector::css(".card"));

        let xpath: Selector = serde_yaml::from_str("xpath: //a[@rel='next']").unwrap();
        assert_eq!(xpath, Selector::xpath("//a[@rel='next']"));
    }

    #[test]
    fn selector_needs_exactly_one_strategy() {
        assert!(serde_json::from_str::<Selector>("{}").is_err());
        assert!(serde_json::from_str::<Selector>(r#"{"css":"a","xpath":"//a"}"#).is_err());
        assert!(serde_json::from_str::<Selector>(r#"{"id":"a"}"#).is_err());
    }

    #[test]
    fn selector_display_names_strategy() {
        assert_eq!(Selector::css("a.bt_iine").to_string(), "css=a.bt_iine");
        assert_eq!(Selector::xpath("//a").to_string(), "xpath=//a");
    }

    #[test]
    fn recoverable_errors() {
        assert!(DriverError::timeout("wait", Duration::from_secs(10)).is_recoverable());
        assert!(DriverError::interaction("click", "not interactable").is_recoverable());
        assert!(!DriverError::Session("gone".into()).is_recoverable());
    }

    #[test]
    fn error_messages_carry_operation() {
        let err = DriverError::timeout("wait_for_visible(css=.blog_box)", Duration::from_secs(10));
        assert!(err.to_string().contains("wait_for_visible(css=.blog_box)"));
        assert!(err.to_string().contains("10s"));
    }
}
