//! Core domain model for the catalog harvester.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "harvest-core";

/// Provenance tag written by the live catalog scrape.
pub const VENDOR_AUTOMANN: &str = "Automann";
/// Provenance tag written by the spreadsheet importer.
pub const VENDOR_ATROBUSHING: &str = "AtroBushing";

/// Login pair supplied at run time. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Catalog subsection harvested by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CategorySelector {
    WithBushing,
    FullBall,
    Cabin,
}

impl CategorySelector {
    pub const ALL: [CategorySelector; 3] = [Self::WithBushing, Self::FullBall, Self::Cabin];

    /// Label the vendor uses both on the subsection tab and in `data-type1`.
    pub fn label(self) -> &'static str {
        match self {
            Self::WithBushing => "With Bushing",
            Self::FullBall => "Full Ball",
            Self::Cabin => "Cabin",
        }
    }

    /// 1-based position of the subsection tab on the category page.
    pub fn tab_position(self) -> usize {
        match self {
            Self::WithBushing => 1,
            Self::FullBall => 2,
            Self::Cabin => 3,
        }
    }
}

impl fmt::Display for CategorySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
#[error("unknown category selector `{0}` (expected with-bushing, full-ball or cabin)")]
pub struct ParseCategoryError(String);

impl FromStr for CategorySelector {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_ascii_lowercase()
            .replace([' ', '_'], "-");
        match normalized.as_str() {
            "with-bushing" => Ok(Self::WithBushing),
            "full-ball" => Ok(Self::FullBall),
            "cabin" => Ok(Self::Cabin),
            _ => Err(ParseCategoryError(s.to_string())),
        }
    }
}

/// Descriptive columns of a product row, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductField {
    Type1,
    Type2,
    CenterToCenter,
    SideA,
    SideB,
    SideABushing,
    SideBBushing,
    SideAAngle,
    SideBAngle,
    ShaftDiameter,
    Notes,
}

impl ProductField {
    pub const ALL: [ProductField; 11] = [
        Self::Type1,
        Self::Type2,
        Self::CenterToCenter,
        Self::SideA,
        Self::SideB,
        Self::SideABushing,
        Self::SideBBushing,
        Self::SideAAngle,
        Self::SideBAngle,
        Self::ShaftDiameter,
        Self::Notes,
    ];

    /// Column name in the shared table. Also the vendor's `col-id` for scraped columns.
    pub fn column(self) -> &'static str {
        match self {
            Self::Type1 => "type1",
            Self::Type2 => "type2",
            Self::CenterToCenter => "c_to_c",
            Self::SideA => "side_a",
            Self::SideB => "side_b",
            Self::SideABushing => "side_a_bushing",
            Self::SideBBushing => "side_b_bushing",
            Self::SideAAngle => "side_a_angle",
            Self::SideBAngle => "side_b_angle",
            Self::ShaftDiameter => "shaft_dia",
            Self::Notes => "notes",
        }
    }
}

/// One persisted catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductRecord {
    pub sku: String,
    pub type1: Option<String>,
    pub type2: Option<String>,
    pub center_to_center: Option<String>,
    pub side_a: Option<String>,
    pub side_b: Option<String>,
    pub side_a_bushing: Option<String>,
    pub side_b_bushing: Option<String>,
    pub side_a_angle: Option<String>,
    pub side_b_angle: Option<String>,
    pub shaft_diameter: Option<String>,
    pub notes: Option<String>,
    pub vendor: String,
}

impl ProductRecord {
    pub fn new(sku: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            vendor: vendor.into(),
            ..Default::default()
        }
    }

    pub fn has_sku(&self) -> bool {
        !self.sku.trim().is_empty()
    }

    pub fn dedup_key(&self) -> (&str, &str) {
        (self.sku.as_str(), self.vendor.as_str())
    }

    pub fn field(&self, field: ProductField) -> Option<&str> {
        self.slot(field).as_deref()
    }

    pub fn set_field(&mut self, field: ProductField, value: Option<String>) {
        *self.slot_mut(field) = value;
    }

    pub fn with_field(mut self, field: ProductField, value: impl Into<String>) -> Self {
        self.set_field(field, Some(value.into()));
        self
    }

    fn slot(&self, field: ProductField) -> &Option<String> {
        match field {
            ProductField::Type1 => &self.type1,
            ProductField::Type2 => &self.type2,
            ProductField::CenterToCenter => &self.center_to_center,
            ProductField::SideA => &self.side_a,
            ProductField::SideB => &self.side_b,
            ProductField::SideABushing => &self.side_a_bushing,
            ProductField::SideBBushing => &self.side_b_bushing,
            ProductField::SideAAngle => &self.side_a_angle,
            ProductField::SideBAngle => &self.side_b_angle,
            ProductField::ShaftDiameter => &self.shaft_diameter,
            ProductField::Notes => &self.notes,
        }
    }

    fn slot_mut(&mut self, field: ProductField) -> &mut Option<String> {
        match field {
            ProductField::Type1 => &mut self.type1,
            ProductField::Type2 => &mut self.type2,
            ProductField::CenterToCenter => &mut self.center_to_center,
            ProductField::SideA => &mut self.side_a,
            ProductField::SideB => &mut self.side_b,
            ProductField::SideABushing => &mut self.side_a_bushing,
            ProductField::SideBBushing => &mut self.side_b_bushing,
            ProductField::SideAAngle => &mut self.side_a_angle,
            ProductField::SideBAngle => &mut self.side_b_angle,
            ProductField::ShaftDiameter => &mut self.shaft_diameter,
            ProductField::Notes => &mut self.notes,
        }
    }
}

/// How the ingest sink treats records whose `(sku, vendor)` already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupPolicy {
    /// Consult stored SKUs first and skip matches (bulk copy).
    SkipExisting,
    /// Write every record and leave duplicates to the store (live scrape).
    #[default]
    WriteUnconditional,
}

impl FromStr for DedupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "skip-existing" | "skip" => Ok(Self::SkipExisting),
            "write-unconditional" | "write" => Ok(Self::WriteUnconditional),
            other => Err(format!("unknown dedup policy `{other}`")),
        }
    }
}

/// Per-run ingest counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub attempted: usize,
    pub skipped: usize,
    pub written: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_selector_parses_labels_and_slugs() {
        assert_eq!("Cabin".parse::<CategorySelector>().unwrap(), CategorySelector::Cabin);
        assert_eq!(
            "with bushing".parse::<CategorySelector>().unwrap(),
            CategorySelector::WithBushing
        );
        assert_eq!("full_ball".parse::<CategorySelector>().unwrap(), CategorySelector::FullBall);
        assert!("axle".parse::<CategorySelector>().is_err());
    }

    #[test]
    fn credential_debug_hides_password() {
        let cred = Credential::new("buyer", "hunter2");
        let rendered = format!("{cred:?}");
        assert!(rendered.contains("buyer"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn incomplete_credentials_are_detected() {
        assert!(!Credential::new("", "x").is_complete());
        assert!(!Credential::new("buyer", "").is_complete());
        assert!(Credential::new("buyer", "x").is_complete());
    }

    #[test]
    fn field_accessors_cover_every_column() {
        let mut record = ProductRecord::new("TR-1", VENDOR_AUTOMANN);
        for (i, field) in ProductField::ALL.iter().enumerate() {
            record.set_field(*field, Some(format!("v{i}")));
        }
        for (i, field) in ProductField::ALL.iter().enumerate() {
            assert_eq!(record.field(*field), Some(format!("v{i}").as_str()));
        }
        assert_eq!(record.center_to_center.as_deref(), Some("v2"));
        assert_eq!(record.shaft_diameter.as_deref(), Some("v9"));
    }

    #[test]
    fn blank_sku_is_not_a_sku() {
        assert!(!ProductRecord::new("  ", VENDOR_AUTOMANN).has_sku());
        assert!(ProductRecord::new("TR-9", VENDOR_AUTOMANN).has_sku());
    }
}
