//! In-process [`Browser`] over static HTML pages, for tests and offline dry runs.
//!
//! Pages are plain HTML files keyed by name. Behaviour is declared on elements:
//!
//! * `data-goto="page"` loads `page` and invalidates every handle.
//! * `data-detail="page"` renders `page` as the detail pane; listing handles stay valid.
//! * `data-goto-valid` / `data-goto-invalid` pick a page depending on whether the
//!   typed inputs match what the site accepts.
//!
//! Elements with `hidden`, `style="display: none"` (or such an ancestor) are not
//! displayed; `disabled` elements are not enabled.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::browser::{Browser, BrowserError, BrowserLauncher, Locator};

/// Served for any URL that does not name a page.
pub const HOME_PAGE: &str = "home";

#[derive(Debug, Clone, Default)]
pub struct FixtureSite {
    pages: HashMap<String, String>,
    accepted: HashMap<String, String>,
}

impl FixtureSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, name: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(name.into(), html.into());
        self
    }

    /// Every `*.html` file in `dir`, keyed by file stem.
    pub fn from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut site = Self::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let html = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            site.pages.insert(name.to_string(), html);
        }
        Ok(site)
    }

    /// Require input `name` to hold exactly `value` for a valid submit.
    pub fn accept_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.accepted.insert(name.into(), value.into());
        self
    }

    pub fn has_page(&self, name: &str) -> bool {
        self.pages.contains_key(name)
    }

    pub fn launcher(self) -> FixtureLauncher {
        FixtureLauncher {
            site: Arc::new(self),
            counters: Arc::new(Counters::default()),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    launches: AtomicUsize,
    operations: AtomicUsize,
    quits: AtomicUsize,
}

/// Hands out fresh browsers over one site. Clones share their counters.
#[derive(Debug, Clone)]
pub struct FixtureLauncher {
    site: Arc<FixtureSite>,
    counters: Arc<Counters>,
}

impl FixtureLauncher {
    pub fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    /// Browser operations issued across every launched browser.
    pub fn operations(&self) -> usize {
        self.counters.operations.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.counters.quits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FixtureLauncher {
    type Browser = FixtureBrowser;

    async fn launch(&self) -> Result<FixtureBrowser, BrowserError> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(FixtureBrowser {
            site: Arc::clone(&self.site),
            counters: Arc::clone(&self.counters),
            page: None,
            page_generation: 0,
            detail: None,
            detail_generation: 0,
            typed: HashMap::new(),
            closed: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Page,
    Detail,
}

/// Position of an element in document order, tied to the render it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureElement {
    slot: Slot,
    generation: u64,
    ordinal: usize,
}

enum ClickAction {
    None,
    Goto(String),
    Detail(String),
    Submit { valid: String, invalid: String },
}

pub struct FixtureBrowser {
    site: Arc<FixtureSite>,
    counters: Arc<Counters>,
    page: Option<String>,
    page_generation: u64,
    detail: Option<String>,
    detail_generation: u64,
    typed: HashMap<String, String>,
    closed: bool,
}

fn elements(document: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    document.root_element().descendants().filter_map(ElementRef::wrap)
}

fn ordinal_of(document: &Html, element: ElementRef<'_>) -> Option<usize> {
    elements(document).position(|e| e.id() == element.id())
}

fn parse_selector(css: &str) -> Result<Selector, BrowserError> {
    Selector::parse(css).map_err(|e| BrowserError::Protocol {
        error: "invalid selector".to_string(),
        message: format!("`{css}`: {e}"),
    })
}

fn select_within<'a>(
    document: &'a Html,
    scope: Option<ElementRef<'a>>,
    selector: &Selector,
) -> Vec<ElementRef<'a>> {
    match scope {
        Some(root) => root.select(selector).filter(|e| e.id() != root.id()).collect(),
        None => document.select(selector).collect(),
    }
}

fn rendered_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn matches<'a>(
    document: &'a Html,
    scope: Option<ElementRef<'a>>,
    locator: &Locator,
) -> Result<Vec<ElementRef<'a>>, BrowserError> {
    Ok(match locator {
        Locator::Css(css) | Locator::TagName(css) => select_within(document, scope, &parse_selector(css)?),
        Locator::LinkText(text) => select_within(document, scope, &parse_selector("a")?)
            .into_iter()
            .filter(|a| rendered_text(*a) == *text)
            .collect(),
        Locator::PartialLinkText(text) => select_within(document, scope, &parse_selector("a")?)
            .into_iter()
            .filter(|a| rendered_text(*a).contains(text.as_str()))
            .collect(),
        Locator::XPath(xpath) => return Err(BrowserError::Unsupported(format!("xpath `{xpath}`"))),
    })
}

fn displayed(element: ElementRef<'_>) -> bool {
    std::iter::successors(Some(element), |e| e.parent().and_then(ElementRef::wrap)).all(|e| {
        let value = e.value();
        value.attr("hidden").is_none()
            && !value
                .attr("style")
                .is_some_and(|style| style.replace(' ', "").contains("display:none"))
    })
}

fn enabled(element: ElementRef<'_>) -> bool {
    element.value().attr("disabled").is_none()
}

fn describe(element: ElementRef<'_>) -> String {
    let value = element.value();
    match value.attr("id").or_else(|| value.attr("name")) {
        Some(id) => format!("<{} {id}>", value.name()),
        None => format!("<{}>", value.name()),
    }
}

fn click_action(element: ElementRef<'_>) -> ClickAction {
    let value = element.value();
    if let Some(page) = value.attr("data-goto") {
        return ClickAction::Goto(page.to_string());
    }
    if let Some(page) = value.attr("data-detail") {
        return ClickAction::Detail(page.to_string());
    }
    match (value.attr("data-goto-valid"), value.attr("data-goto-invalid")) {
        (Some(valid), Some(invalid)) => ClickAction::Submit {
            valid: valid.to_string(),
            invalid: invalid.to_string(),
        },
        _ => ClickAction::None,
    }
}

fn missing_page(name: &str) -> BrowserError {
    BrowserError::Protocol {
        error: "unknown page".to_string(),
        message: format!("fixture site has no page `{name}`"),
    }
}

impl FixtureBrowser {
    fn begin(&mut self) -> Result<(), BrowserError> {
        self.counters.operations.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(BrowserError::Protocol {
                error: "invalid session id".to_string(),
                message: "session has been quit".to_string(),
            });
        }
        Ok(())
    }

    fn html_of(&self, slot: Slot) -> Option<&str> {
        let name = match slot {
            Slot::Page => self.page.as_deref(),
            Slot::Detail => self.detail.as_deref(),
        }?;
        self.site.pages.get(name).map(String::as_str)
    }

    fn generation(&self, slot: Slot) -> u64 {
        match slot {
            Slot::Page => self.page_generation,
            Slot::Detail => self.detail_generation,
        }
    }

    fn load_page(&mut self, name: &str) -> Result<(), BrowserError> {
        if !self.site.has_page(name) {
            return Err(missing_page(name));
        }
        self.page = Some(name.to_string());
        self.page_generation += 1;
        self.detail = None;
        self.detail_generation += 1;
        self.typed.clear();
        Ok(())
    }

    fn load_detail(&mut self, name: &str) -> Result<(), BrowserError> {
        if !self.site.has_page(name) {
            return Err(missing_page(name));
        }
        self.detail = Some(name.to_string());
        self.detail_generation += 1;
        Ok(())
    }

    fn with_element<T>(
        &self,
        element: &FixtureElement,
        read: impl FnOnce(ElementRef<'_>) -> T,
    ) -> Result<T, BrowserError> {
        if element.generation != self.generation(element.slot) {
            return Err(BrowserError::StaleElement);
        }
        let html = self.html_of(element.slot).ok_or(BrowserError::StaleElement)?;
        let document = Html::parse_document(html);
        let node = elements(&document)
            .nth(element.ordinal)
            .ok_or(BrowserError::StaleElement)?;
        Ok(read(node))
    }

    fn find_in(
        &self,
        slot: Slot,
        scope: Option<usize>,
        locator: &Locator,
    ) -> Result<Vec<FixtureElement>, BrowserError> {
        let Some(html) = self.html_of(slot) else {
            return Ok(Vec::new());
        };
        let document = Html::parse_document(html);
        let root = match scope {
            Some(ordinal) => Some(elements(&document).nth(ordinal).ok_or(BrowserError::StaleElement)?),
            None => None,
        };
        let generation = self.generation(slot);
        Ok(matches(&document, root, locator)?
            .into_iter()
            .filter_map(|e| ordinal_of(&document, e))
            .map(|ordinal| FixtureElement {
                slot,
                generation,
                ordinal,
            })
            .collect())
    }

    fn inputs_accepted(&self) -> bool {
        self.site
            .accepted
            .iter()
            .all(|(name, value)| self.typed.get(name) == Some(value))
    }

    fn input_name(&self, element: &FixtureElement) -> Result<String, BrowserError> {
        self.with_element(element, |el| {
            let value = el.value();
            match (value.name(), value.attr("name")) {
                ("input" | "textarea", Some(name)) if enabled(el) => Ok(name.to_string()),
                _ => Err(BrowserError::NotInteractable(describe(el))),
            }
        })?
    }
}

#[async_trait]
impl Browser for FixtureBrowser {
    type Element = FixtureElement;

    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.begin()?;
        let last = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        let name = if self.site.has_page(last) { last } else { HOME_PAGE };
        self.load_page(name)
    }

    async fn find_all(
        &mut self,
        scope: Option<&FixtureElement>,
        locator: &Locator,
    ) -> Result<Vec<FixtureElement>, BrowserError> {
        self.begin()?;
        match scope {
            Some(root) => {
                if root.generation != self.generation(root.slot) {
                    return Err(BrowserError::StaleElement);
                }
                self.find_in(root.slot, Some(root.ordinal), locator)
            }
            None => {
                let mut found = self.find_in(Slot::Page, None, locator)?;
                found.extend(self.find_in(Slot::Detail, None, locator)?);
                Ok(found)
            }
        }
    }

    async fn click(&mut self, element: &FixtureElement) -> Result<(), BrowserError> {
        self.begin()?;
        let (ready, label, action) =
            self.with_element(element, |el| (displayed(el) && enabled(el), describe(el), click_action(el)))?;
        if !ready {
            return Err(BrowserError::NotInteractable(label));
        }
        match action {
            ClickAction::None => Ok(()),
            ClickAction::Goto(page) => self.load_page(&page),
            ClickAction::Detail(page) => self.load_detail(&page),
            ClickAction::Submit { valid, invalid } => {
                let target = if self.inputs_accepted() { valid } else { invalid };
                self.load_page(&target)
            }
        }
    }

    async fn clear(&mut self, element: &FixtureElement) -> Result<(), BrowserError> {
        self.begin()?;
        let name = self.input_name(element)?;
        self.typed.insert(name, String::new());
        Ok(())
    }

    async fn send_keys(&mut self, element: &FixtureElement, text: &str) -> Result<(), BrowserError> {
        self.begin()?;
        let name = self.input_name(element)?;
        self.typed.entry(name).or_default().push_str(text);
        Ok(())
    }

    async fn text(&mut self, element: &FixtureElement) -> Result<String, BrowserError> {
        self.begin()?;
        self.with_element(element, rendered_text)
    }

    async fn is_displayed(&mut self, element: &FixtureElement) -> Result<bool, BrowserError> {
        self.begin()?;
        self.with_element(element, displayed)
    }

    async fn is_enabled(&mut self, element: &FixtureElement) -> Result<bool, BrowserError> {
        self.begin()?;
        self.with_element(element, enabled)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        self.begin()?;
        Ok(format!("fixture-screenshot:{}", self.page.as_deref().unwrap_or("blank")).into_bytes())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        self.begin()?;
        let mut source = self.html_of(Slot::Page).unwrap_or("<html></html>").to_string();
        if let Some(detail) = self.html_of(Slot::Detail) {
            source.push_str(detail);
        }
        Ok(source)
    }

    async fn quit(&mut self) -> Result<(), BrowserError> {
        self.counters.operations.fetch_add(1, Ordering::SeqCst);
        if !self.closed {
            self.closed = true;
            self.counters.quits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
