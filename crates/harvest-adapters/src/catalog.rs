//! Catalog walker: selects the subsection tab and hands out product entries.

use std::sync::Arc;

use harvest_core::CategorySelector;
use tracing::{info, warn};

use crate::browser::{Browser, BrowserError, Condition};
use crate::session::{pause, HarvestError, Session};

/// One clickable product entry. Consumed by [`Session::activate`].
#[derive(Debug)]
pub struct ProductHandle<E> {
    ordinal: usize,
    element: E,
}

impl<E> ProductHandle<E> {
    /// 1-based position within the walk.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

/// Single pass over the entries rendered when the subsection was selected.
#[derive(Debug)]
pub struct CatalogWalk<E> {
    selector: CategorySelector,
    found: usize,
    entries: std::iter::Enumerate<std::vec::IntoIter<E>>,
}

impl<E> CatalogWalk<E> {
    pub fn selector(&self) -> CategorySelector {
        self.selector
    }

    /// Entries found when the walk started.
    pub fn found(&self) -> usize {
        self.found
    }

    pub fn is_empty(&self) -> bool {
        self.found == 0
    }
}

impl<E> Iterator for CatalogWalk<E> {
    type Item = ProductHandle<E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|(index, element)| ProductHandle {
            ordinal: index + 1,
            element,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

/// A product's rendered detail pane. Borrowing the session mutably keeps the
/// next product from being activated until this view is dropped.
pub struct DetailView<'s, B: Browser> {
    pub(crate) session: &'s mut Session<B>,
    pub(crate) ordinal: usize,
}

impl<B: Browser> DetailView<'_, B> {
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl<B: Browser> Session<B> {
    /// Select `selector`'s tab and collect its entries. An empty subsection is
    /// an empty walk, not an error.
    pub async fn enumerate_category(
        &mut self,
        selector: CategorySelector,
    ) -> Result<CatalogWalk<B::Element>, HarvestError> {
        self.require_authenticated()?;
        let layout = Arc::clone(&self.layout);
        let tab_locator = layout.catalog.tab_locator(selector);
        let step = format!("select {selector} subsection");

        let tab = self
            .timeouts
            .step_gate()
            .until(&mut self.browser, None, Condition::Clickable(&tab_locator))
            .await
            .map_err(|source| HarvestError::NavigationTimeout {
                step: step.clone(),
                source,
            })?;
        pause(self.timeouts.settle_delay).await;
        self.browser
            .click(&tab)
            .await
            .map_err(|e| HarvestError::NavigationTimeout {
                step,
                source: e.into(),
            })?;
        pause(self.timeouts.render_delay).await;

        let entries = self
            .browser
            .find_all(None, &layout.catalog.entry_locator(selector))
            .await?;
        if entries.is_empty() {
            warn!(category = %selector, "category has no product entries");
        } else {
            info!(category = %selector, found = entries.len(), "found product entries");
        }

        Ok(CatalogWalk {
            selector,
            found: entries.len(),
            entries: entries.into_iter().enumerate(),
        })
    }

    /// Click an entry so its detail pane renders in place.
    pub async fn activate(
        &mut self,
        handle: ProductHandle<B::Element>,
    ) -> Result<DetailView<'_, B>, BrowserError> {
        pause(self.timeouts.settle_delay).await;
        self.browser.click(&handle.element).await?;
        pause(self.timeouts.settle_delay).await;
        Ok(DetailView {
            session: self,
            ordinal: handle.ordinal,
        })
    }
}
