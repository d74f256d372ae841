//! Where things live on the vendor's pages.
//!
//! The defaults describe the Automann catalog. Any section can be overridden from
//! YAML when the vendor reshuffles its markup.

use std::path::Path;

use anyhow::Context;
use harvest_core::{CategorySelector, ProductField};
use serde::{Deserialize, Serialize};

use crate::browser::Locator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteLayout {
    pub base_url: String,
    pub login: LoginLayout,
    pub navigation: NavigationLayout,
    pub catalog: CatalogLayout,
    pub detail: DetailLayout,
}

impl Default for SiteLayout {
    fn default() -> Self {
        Self {
            base_url: "https://www.automann.com".to_string(),
            login: LoginLayout::default(),
            navigation: NavigationLayout::default(),
            catalog: CatalogLayout::default(),
            detail: DetailLayout::default(),
        }
    }
}

impl SiteLayout {
    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("parsing site layout yaml")
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMarker {
    pub locator: Locator,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginLayout {
    pub open_login: Locator,
    pub username_field: Locator,
    pub password_field: Locator,
    pub submit: Locator,
    /// Only this marker proves a login worked; the absence of an error does not.
    pub greeting: TextMarker,
}

impl Default for LoginLayout {
    fn default() -> Self {
        Self {
            open_login: Locator::css("#navigation > div > a:nth-of-type(2)"),
            username_field: Locator::name("login[username]"),
            password_field: Locator::name("login[password]"),
            submit: Locator::css("button.btn.btn-primary.btn-lg.w-full.mb-2.lg\\:mb-0.lg\\:w-fit"),
            greeting: TextMarker {
                locator: Locator::tag("h3"),
                text: "Hey, ".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavStep {
    pub name: String,
    pub target: Locator,
    #[serde(default)]
    pub confirm: Option<TextMarker>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationLayout {
    pub steps: Vec<NavStep>,
}

impl Default for NavigationLayout {
    fn default() -> Self {
        Self {
            steps: vec![
                NavStep {
                    name: "open product wizard".to_string(),
                    target: Locator::css("#navigation > ul:nth-of-type(2) > li:nth-of-type(5)"),
                    confirm: Some(TextMarker {
                        locator: Locator::css("[data-ui-id=page-title-wrapper]"),
                        text: "Product Wizard".to_string(),
                    }),
                },
                NavStep {
                    name: "open Truck Torque Rods".to_string(),
                    target: Locator::PartialLinkText("Truck Torque Rods".to_string()),
                    confirm: Some(TextMarker {
                        locator: Locator::css("[data-ui-id=page-title-wrapper]"),
                        text: "Truck Torque Rods".to_string(),
                    }),
                },
            ],
        }
    }
}

/// `{position}` and `{label}` are filled from the [`CategorySelector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogLayout {
    pub tab_template: String,
    pub entry_template: String,
}

impl Default for CatalogLayout {
    fn default() -> Self {
        Self {
            tab_template: "#type-container > div > div:nth-of-type(1) > div:nth-of-type(1) \
                           > div:nth-of-type(2) > div > div > div > div > a:nth-of-type({position})"
                .to_string(),
            entry_template: "[data-type1=\"{label}\"]".to_string(),
        }
    }
}

impl CatalogLayout {
    pub fn tab_locator(&self, selector: CategorySelector) -> Locator {
        Locator::Css(
            self.tab_template
                .replace("{position}", &selector.tab_position().to_string()),
        )
    }

    pub fn entry_locator(&self, selector: CategorySelector) -> Locator {
        Locator::Css(self.entry_template.replace("{label}", selector.label()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub field: ProductField,
    pub locator: Locator,
}

impl ColumnLayout {
    fn by_col_id(field: ProductField) -> Self {
        Self {
            field,
            locator: Locator::Css(format!("[col-id=\"{}\"]", field.column())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailLayout {
    /// Leading columns: sku, type1, type2.
    pub left_pane: Locator,
    /// Trailing dimensional columns.
    pub right_pane: Locator,
    pub row_marker: Locator,
    /// Looked up inside a left-pane row.
    pub sku_cell: Locator,
    pub left_columns: Vec<ColumnLayout>,
    pub right_columns: Vec<ColumnLayout>,
}

const PANE_ROOT: &str = "#wizard-wrap > div:nth-of-type(2) > div:nth-of-type(2) > div:nth-of-type(2) \
                         > div:nth-of-type(3) > div:nth-of-type(1) > div";

impl Default for DetailLayout {
    fn default() -> Self {
        Self {
            left_pane: Locator::Css(format!("{PANE_ROOT} > div:nth-of-type(1)")),
            right_pane: Locator::Css(format!("{PANE_ROOT} > div:nth-of-type(2)")),
            row_marker: Locator::css("[row-index]"),
            sku_cell: Locator::tag("a"),
            left_columns: [ProductField::Type1, ProductField::Type2]
                .into_iter()
                .map(ColumnLayout::by_col_id)
                .collect(),
            right_columns: [
                ProductField::CenterToCenter,
                ProductField::SideA,
                ProductField::SideB,
                ProductField::SideABushing,
                ProductField::SideBBushing,
                ProductField::SideAAngle,
                ProductField::SideBAngle,
                ProductField::ShaftDiameter,
            ]
            .into_iter()
            .map(ColumnLayout::by_col_id)
            .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_reads_eleven_cells_per_row() {
        let detail = DetailLayout::default();
        // sku + left columns + right columns
        assert_eq!(1 + detail.left_columns.len() + detail.right_columns.len(), 11);
        assert_eq!(
            detail.right_columns[0].locator,
            Locator::css("[col-id=\"c_to_c\"]")
        );
    }

    #[test]
    fn every_default_menu_step_waits_for_its_page_title() {
        let steps = NavigationLayout::default().steps;
        assert_eq!(steps.len(), 2);
        let titles: Vec<_> = steps
            .iter()
            .map(|step| step.confirm.as_ref().map(|c| c.text.as_str()))
            .collect();
        assert_eq!(titles, [Some("Product Wizard"), Some("Truck Torque Rods")]);
    }

    #[test]
    fn category_locators_are_filled_from_selector() {
        let catalog = CatalogLayout::default();
        assert_eq!(
            catalog.entry_locator(CategorySelector::Cabin),
            Locator::css("[data-type1=\"Cabin\"]")
        );
        let Locator::Css(tab) = catalog.tab_locator(CategorySelector::FullBall) else {
            panic!("tab locator should be css");
        };
        assert!(tab.ends_with("a:nth-of-type(2)"));
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_sections() {
        let layout = SiteLayout::from_yaml_str(
            "base_url: https://staging.example.test\nlogin:\n  greeting:\n    locator: { using: css, value: .hello }\n    text: Welcome\n",
        )
        .expect("layout yaml");
        assert_eq!(layout.base_url, "https://staging.example.test");
        assert_eq!(layout.login.greeting.text, "Welcome");
        assert_eq!(layout.login.username_field, Locator::name("login[username]"));
        assert_eq!(layout.navigation, NavigationLayout::default());
    }
}
