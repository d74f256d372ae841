//! Browser seam: locators, element operations and wait-gated conditions.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// How an element is looked up on the rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "using", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    #[serde(rename = "xpath")]
    XPath(String),
    LinkText(String),
    PartialLinkText(String),
    TagName(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Form control by its `name` attribute.
    pub fn name(name: &str) -> Self {
        Self::Css(format!("[name=\"{name}\"]"))
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self::TagName(tag.into())
    }

    /// W3C WebDriver `using` strategy and value.
    pub fn strategy(&self) -> (&'static str, &str) {
        match self {
            Self::Css(v) => ("css selector", v),
            Self::XPath(v) => ("xpath", v),
            Self::LinkText(v) => ("link text", v),
            Self::PartialLinkText(v) => ("partial link text", v),
            Self::TagName(v) => ("tag name", v),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (using, value) = self.strategy();
        write!(f, "{using} `{value}`")
    }
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("no such element: {0}")]
    NoSuchElement(String),
    #[error("stale element reference")]
    StaleElement,
    #[error("element not interactable: {0}")]
    NotInteractable(String),
    #[error("locator not supported by this browser: {0}")]
    Unsupported(String),
    #[error("webdriver error `{error}`: {message}")]
    Protocol { error: String, message: String },
    #[error("webdriver transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("decoding webdriver response: {0}")]
    Decode(String),
}

impl BrowserError {
    /// Errors a polling wait should swallow and retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoSuchElement(_) | Self::StaleElement | Self::NotInteractable(_)
        )
    }
}

/// A stateful browsing context. One instance is owned by one run.
#[async_trait]
pub trait Browser: Send {
    type Element: Clone + fmt::Debug + Send + Sync;

    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;

    /// All matches, in document order. `scope` restricts the search to descendants.
    async fn find_all(
        &mut self,
        scope: Option<&Self::Element>,
        locator: &Locator,
    ) -> Result<Vec<Self::Element>, BrowserError>;

    async fn click(&mut self, element: &Self::Element) -> Result<(), BrowserError>;

    async fn clear(&mut self, element: &Self::Element) -> Result<(), BrowserError>;

    async fn send_keys(&mut self, element: &Self::Element, text: &str) -> Result<(), BrowserError>;

    async fn text(&mut self, element: &Self::Element) -> Result<String, BrowserError>;

    async fn is_displayed(&mut self, element: &Self::Element) -> Result<bool, BrowserError>;

    async fn is_enabled(&mut self, element: &Self::Element) -> Result<bool, BrowserError>;

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError>;

    async fn page_source(&mut self) -> Result<String, BrowserError>;

    /// End the session. Every handle becomes invalid.
    async fn quit(&mut self) -> Result<(), BrowserError>;

    async fn find_first(
        &mut self,
        scope: Option<&Self::Element>,
        locator: &Locator,
    ) -> Result<Self::Element, BrowserError> {
        self.find_all(scope, locator)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::NoSuchElement(locator.to_string()))
    }
}

/// Opens a fresh, unauthenticated browser. Sessions are never shared between runs.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Browser: Browser;

    async fn launch(&self) -> Result<Self::Browser, BrowserError>;
}

#[derive(Debug, Clone, Copy)]
pub enum Condition<'a> {
    /// First match exists.
    Present(&'a Locator),
    /// First match is displayed and enabled.
    Clickable(&'a Locator),
    /// First match's text contains the needle.
    TextPresent(&'a Locator, &'a str),
}

impl fmt::Display for Condition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present(locator) => write!(f, "presence of {locator}"),
            Self::Clickable(locator) => write!(f, "clickable {locator}"),
            Self::TextPresent(locator, text) => write!(f, "text `{text}` in {locator}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out after {waited:?} waiting for {condition}")]
    Timeout { condition: String, waited: Duration },
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Bounded polling wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitGate {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitGate {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Check at least once, then every `poll_interval` until the deadline.
    pub async fn until<B: Browser>(
        &self,
        browser: &mut B,
        scope: Option<&B::Element>,
        condition: Condition<'_>,
    ) -> Result<B::Element, WaitError> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        loop {
            match check_once(browser, scope, condition).await {
                Ok(Some(element)) => return Ok(element),
                Ok(None) => {}
                Err(err) if err.is_transient() => {}
                Err(err) => return Err(err.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    condition: condition.to_string(),
                    waited: now - started,
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

async fn check_once<B: Browser>(
    browser: &mut B,
    scope: Option<&B::Element>,
    condition: Condition<'_>,
) -> Result<Option<B::Element>, BrowserError> {
    match condition {
        Condition::Present(locator) => Ok(browser.find_all(scope, locator).await?.into_iter().next()),
        Condition::Clickable(locator) => {
            let Some(element) = browser.find_all(scope, locator).await?.into_iter().next() else {
                return Ok(None);
            };
            let ready = browser.is_displayed(&element).await? && browser.is_enabled(&element).await?;
            Ok(ready.then_some(element))
        }
        Condition::TextPresent(locator, needle) => {
            let Some(element) = browser.find_all(scope, locator).await?.into_iter().next() else {
                return Ok(None);
            };
            let text = browser.text(&element).await?;
            Ok(text.contains(needle).then_some(element))
        }
    }
}
