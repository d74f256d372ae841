//! Browser-driven stages of a harvest: log in, reach the category listing,
//! walk its entries and pull paired rows out of each detail pane.

pub mod auth;
pub mod browser;
pub mod catalog;
pub mod extract;
pub mod fixture;
pub mod layout;
pub mod navigate;
pub mod session;
pub mod webdriver;

pub use auth::{AuthResult, DiagnosticSnapshot};
pub use browser::{Browser, BrowserError, BrowserLauncher, Condition, Locator, WaitError, WaitGate};
pub use catalog::{CatalogWalk, DetailView, ProductHandle};
pub use extract::{pair_rows, ExtractError, Pane, PaneExtraction, PaneMismatch};
pub use fixture::{FixtureBrowser, FixtureElement, FixtureLauncher, FixtureSite};
pub use layout::SiteLayout;
pub use navigate::NavResult;
pub use session::{HarvestError, Session, Timeouts};
pub use webdriver::{WebDriverBrowser, WebDriverConfig, WebDriverLauncher};

pub const CRATE_NAME: &str = "harvest-adapters";
