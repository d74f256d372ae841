//! Navigator: fixed menu path from the dashboard to the category listing.

use std::sync::Arc;

use harvest_core::CategorySelector;
use tracing::{debug, info};

use crate::browser::{Browser, Condition, WaitError};
use crate::session::{pause, HarvestError, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavResult {
    pub selector: CategorySelector,
    pub steps_completed: usize,
    /// Text of the last confirmed title marker.
    pub title: Option<String>,
}

impl<B: Browser> Session<B> {
    /// Walk every configured menu step in order. The first step that does not
    /// complete in time ends navigation; callers restart from the top.
    pub async fn navigate_to_category(
        &mut self,
        selector: CategorySelector,
    ) -> Result<NavResult, HarvestError> {
        self.require_authenticated()?;
        let layout = Arc::clone(&self.layout);
        let gate = self.timeouts.step_gate();
        let mut title = None;

        for step in &layout.navigation.steps {
            let failed = |source: WaitError| HarvestError::NavigationTimeout {
                step: step.name.clone(),
                source,
            };

            let target = gate
                .until(&mut self.browser, None, Condition::Clickable(&step.target))
                .await
                .map_err(failed)?;
            pause(self.timeouts.settle_delay).await;
            self.browser
                .click(&target)
                .await
                .map_err(|e| failed(e.into()))?;

            if let Some(confirm) = &step.confirm {
                gate.until(
                    &mut self.browser,
                    None,
                    Condition::TextPresent(&confirm.locator, &confirm.text),
                )
                .await
                .map_err(failed)?;
                title = Some(confirm.text.clone());
            }
            debug!(step = %step.name, "navigation step complete");
        }

        info!(category = %selector, ?title, "navigated to category listing");
        Ok(NavResult {
            selector,
            steps_completed: layout.navigation.steps.len(),
            title,
        })
    }
}
