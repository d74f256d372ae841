//! Row-pairing extractor.
//!
//! A detail view renders one logical table as two independently scrolled panes:
//! the left pane holds sku/type1/type2, the right pane the dimensional columns.
//! Rows are paired by position only; nothing in the markup links row `i` on the
//! left to row `i` on the right.

use std::fmt;
use std::sync::Arc;

use harvest_core::ProductRecord;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

use crate::browser::{Browser, BrowserError, Condition, Locator, WaitError, WaitGate};
use crate::catalog::DetailView;
use crate::layout::{ColumnLayout, DetailLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pane {
    Left,
    Right,
}

impl fmt::Display for Pane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "left",
            Self::Right => "right",
        })
    }
}

/// Errors local to one product's detail view; the run moves on to the next product.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("product could not be activated: {0}")]
    Activation(#[source] BrowserError),
    #[error("{pane} pane never rendered: {source}")]
    PaneNotRendered {
        pane: Pane,
        #[source]
        source: WaitError,
    },
    /// The pane rendered but no row marker appeared inside it in time.
    #[error("{pane} pane rendered no rows: {source}")]
    RowsNotRendered {
        pane: Pane,
        #[source]
        source: WaitError,
    },
    #[error("listing rows of the {pane} pane: {source}")]
    RowScan {
        pane: Pane,
        #[source]
        source: BrowserError,
    },
    #[error("row {row}: cell `{column}` unreadable: {source}")]
    Row {
        row: usize,
        column: String,
        #[source]
        source: BrowserError,
    },
}

/// Row counts of the two panes when they disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaneMismatch {
    pub left: usize,
    pub right: usize,
}

impl PaneMismatch {
    /// Rows of the longer pane that had no partner.
    pub fn unpaired(&self) -> usize {
        self.left.abs_diff(self.right)
    }
}

impl fmt::Display for PaneMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "left pane has {} rows, right pane has {}; {} unpaired",
            self.left,
            self.right,
            self.unpaired()
        )
    }
}

/// Pair the i-th left row with the i-th right row. Pairing stops at the shorter
/// pane; the count difference is returned so it can be reported, not hidden.
pub fn pair_rows<L, R>(left: Vec<L>, right: Vec<R>) -> (Vec<(L, R)>, Option<PaneMismatch>) {
    let mismatch = (left.len() != right.len()).then(|| PaneMismatch {
        left: left.len(),
        right: right.len(),
    });
    (left.into_iter().zip(right).collect(), mismatch)
}

/// Outcome of one detail view.
#[derive(Debug, Default)]
pub struct PaneExtraction {
    /// Records from every row before the first failing one, in row order.
    pub records: Vec<ProductRecord>,
    /// First failure; no row after it was read.
    pub error: Option<ExtractError>,
    pub mismatch: Option<PaneMismatch>,
    /// Rows dropped because the sku cell was empty.
    pub blank_skus: usize,
}

impl PaneExtraction {
    pub fn failed(error: ExtractError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

async fn read_cell<B: Browser>(
    browser: &mut B,
    row: &B::Element,
    locator: &Locator,
) -> Result<String, BrowserError> {
    let cell = browser.find_first(Some(row), locator).await?;
    browser.text(&cell).await
}

async fn read_columns<B: Browser>(
    browser: &mut B,
    row: &B::Element,
    columns: &[ColumnLayout],
    record: &mut ProductRecord,
) -> Result<(), (String, BrowserError)> {
    for column in columns {
        let text = read_cell(browser, row, &column.locator)
            .await
            .map_err(|e| (column.field.column().to_string(), e))?;
        record.set_field(column.field, text_or_none(text));
    }
    Ok(())
}

/// Wait for the first row marker inside `pane`, then list every row it holds.
async fn scan_rows<B: Browser>(
    browser: &mut B,
    gate: WaitGate,
    detail: &DetailLayout,
    pane_element: &B::Element,
    pane: Pane,
) -> Result<Vec<B::Element>, ExtractError> {
    gate.until(browser, Some(pane_element), Condition::Present(&detail.row_marker))
        .await
        .map_err(|source| {
            warn!(%pane, "detail pane rendered without rows");
            ExtractError::RowsNotRendered { pane, source }
        })?;
    browser
        .find_all(Some(pane_element), &detail.row_marker)
        .await
        .map_err(|source| ExtractError::RowScan { pane, source })
}

/// Sku first, then the left columns, then the right columns.
async fn read_row<B: Browser>(
    browser: &mut B,
    detail: &DetailLayout,
    left: &B::Element,
    right: &B::Element,
    record: &mut ProductRecord,
) -> Result<(), (String, BrowserError)> {
    let sku = read_cell(browser, left, &detail.sku_cell)
        .await
        .map_err(|e| ("sku".to_string(), e))?;
    record.sku = sku.trim().to_string();
    read_columns(browser, left, &detail.left_columns, record).await?;
    read_columns(browser, right, &detail.right_columns, record).await
}

impl<B: Browser> DetailView<'_, B> {
    /// Read every paired row into a record tagged with `vendor`, stopping at the
    /// first row with an unreadable cell. Cells are read once, never retried.
    pub async fn extract_records(&mut self, vendor: &str) -> PaneExtraction {
        let span = info_span!("extract_records", product = self.ordinal);
        self.extract_inner(vendor).instrument(span).await
    }

    async fn extract_inner(&mut self, vendor: &str) -> PaneExtraction {
        let session = &mut *self.session;
        let layout = Arc::clone(&session.layout);
        let detail = &layout.detail;
        let gate = session.timeouts.step_gate();
        let browser = &mut session.browser;

        let left_pane = match gate.until(browser, None, Condition::Present(&detail.left_pane)).await {
            Ok(pane) => pane,
            Err(source) => {
                return PaneExtraction::failed(ExtractError::PaneNotRendered { pane: Pane::Left, source })
            }
        };
        let right_pane = match gate.until(browser, None, Condition::Present(&detail.right_pane)).await {
            Ok(pane) => pane,
            Err(source) => {
                return PaneExtraction::failed(ExtractError::PaneNotRendered { pane: Pane::Right, source })
            }
        };

        let left_rows = match scan_rows(browser, gate, detail, &left_pane, Pane::Left).await {
            Ok(rows) => rows,
            Err(err) => return PaneExtraction::failed(err),
        };
        let right_rows = match scan_rows(browser, gate, detail, &right_pane, Pane::Right).await {
            Ok(rows) => rows,
            Err(err) => return PaneExtraction::failed(err),
        };

        let (pairs, mismatch) = pair_rows(left_rows, right_rows);
        if let Some(mismatch) = mismatch {
            warn!(%mismatch, "detail panes are out of step; pairing by position");
        }

        let mut out = PaneExtraction {
            mismatch,
            ..PaneExtraction::default()
        };

        for (index, (left, right)) in pairs.iter().enumerate() {
            let row = index + 1;
            let mut record = ProductRecord::new(String::new(), vendor);

            let read = read_row(browser, detail, left, right, &mut record).await;

            match read {
                Ok(()) if record.has_sku() => {
                    debug!(row, sku = %record.sku, "extracted record");
                    out.records.push(record);
                }
                Ok(()) => {
                    warn!(row, "dropping row with blank sku");
                    out.blank_skus += 1;
                }
                Err((column, source)) => {
                    warn!(row, %column, error = %source, "row extraction failed; abandoning remaining rows");
                    out.error = Some(ExtractError::Row { row, column, source });
                    break;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_panes_pair_index_by_index() {
        let (pairs, mismatch) = pair_rows(vec!["l0", "l1", "l2"], vec!["r0", "r1", "r2"]);
        assert_eq!(pairs, vec![("l0", "r0"), ("l1", "r1"), ("l2", "r2")]);
        assert!(mismatch.is_none());
    }

    #[test]
    fn uneven_panes_pair_the_prefix_and_flag_the_rest() {
        let (pairs, mismatch) = pair_rows(vec![1, 2, 3, 4], vec!['a', 'b']);
        assert_eq!(pairs, vec![(1, 'a'), (2, 'b')]);
        let mismatch = mismatch.expect("mismatch flagged");
        assert_eq!(mismatch, PaneMismatch { left: 4, right: 2 });
        assert_eq!(mismatch.unpaired(), 2);

        let (pairs, mismatch) = pair_rows(Vec::<u8>::new(), vec![1u8]);
        assert!(pairs.is_empty());
        assert_eq!(mismatch, Some(PaneMismatch { left: 0, right: 1 }));
    }

    #[test]
    fn blank_cells_become_none() {
        assert_eq!(text_or_none("  ".into()), None);
        assert_eq!(text_or_none(" 19.5 ".into()), Some("19.5".into()));
    }
}
