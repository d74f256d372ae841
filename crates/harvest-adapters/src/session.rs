//! Run-scoped browsing session and the errors its stages raise.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::browser::{Browser, BrowserError, WaitError, WaitGate};
use crate::layout::SiteLayout;

/// Wait budgets for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Every login step, including the greeting marker.
    pub auth_wait: Duration,
    /// Menu clicks, subsection tab, detail panes.
    pub step_wait: Duration,
    pub poll_interval: Duration,
    /// Pause before each click and after activating a product.
    pub settle_delay: Duration,
    /// Pause after selecting a subsection, before entries are collected.
    pub render_delay: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            auth_wait: Duration::from_secs(10),
            step_wait: Duration::from_secs(3),
            poll_interval: Duration::from_millis(500),
            settle_delay: Duration::from_secs(1),
            render_delay: Duration::from_secs(2),
        }
    }
}

impl Timeouts {
    /// Short budgets with no pauses, for fixture-driven runs.
    pub fn instant() -> Self {
        Self {
            auth_wait: Duration::from_millis(40),
            step_wait: Duration::from_millis(40),
            poll_interval: Duration::from_millis(5),
            settle_delay: Duration::ZERO,
            render_delay: Duration::ZERO,
        }
    }

    pub fn auth_gate(&self) -> WaitGate {
        WaitGate::new(self.auth_wait, self.poll_interval)
    }

    pub fn step_gate(&self) -> WaitGate {
        WaitGate::new(self.step_wait, self.poll_interval)
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("missing credential: username and password are both required")]
    MissingCredential,
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("navigation step `{step}` did not complete: {source}")]
    NavigationTimeout {
        step: String,
        #[source]
        source: WaitError,
    },
    #[error("browser failure: {0}")]
    Browser(#[from] BrowserError),
}

/// Authenticated, stateful handle to the vendor site. Owned by exactly one run.
pub struct Session<B: Browser> {
    pub(crate) browser: B,
    pub(crate) layout: Arc<SiteLayout>,
    pub(crate) timeouts: Timeouts,
    pub(crate) authenticated: bool,
}

impl<B: Browser> Session<B> {
    pub fn new(browser: B, layout: Arc<SiteLayout>, timeouts: Timeouts) -> Self {
        Self {
            browser,
            layout,
            timeouts,
            authenticated: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn layout(&self) -> &SiteLayout {
        &self.layout
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub(crate) fn require_authenticated(&self) -> Result<(), HarvestError> {
        if self.authenticated {
            Ok(())
        } else {
            Err(HarvestError::NotAuthenticated)
        }
    }

    /// Tear the session down. Teardown failures are logged, never raised.
    pub async fn close(mut self) {
        self.authenticated = false;
        if let Err(err) = self.browser.quit().await {
            warn!(error = %err, "browser teardown failed");
        }
    }
}

pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
