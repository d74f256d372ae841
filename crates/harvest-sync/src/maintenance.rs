//! Store-level chores that run without a browser.

use std::fmt;

use harvest_core::{DedupPolicy, IngestStats};
use harvest_storage::{ProductStore, StoreError, VendorCount};
use tracing::info;

use crate::ingest::{ingest, IngestError, IngestOptions};

/// Copy every row of `source` into `target`, skipping `(sku, vendor)` pairs the
/// target already holds. Safe to repeat.
pub async fn copy_between_stores(
    source: &mut dyn ProductStore,
    target: &mut dyn ProductStore,
    batch_size: usize,
) -> Result<IngestStats, IngestError> {
    let records = source.all_records().await.map_err(|source| IngestError {
        stats: IngestStats::default(),
        source,
    })?;
    info!(found = records.len(), "read source products");

    let stats = ingest(
        Some(target),
        records,
        IngestOptions {
            upload_enabled: true,
            batch_size,
            dedup: DedupPolicy::SkipExisting,
        },
    )
    .await?;
    info!(written = stats.written, skipped = stats.skipped, "copy finished");
    Ok(stats)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorSummary {
    pub total: i64,
    pub vendors: Vec<VendorCount>,
}

impl VendorSummary {
    pub fn rows_for(&self, vendor: &str) -> i64 {
        self.vendors
            .iter()
            .filter(|c| c.vendor.as_deref() == Some(vendor))
            .map(|c| c.rows)
            .sum()
    }
}

impl fmt::Display for VendorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total products: {}", self.total)?;
        for count in &self.vendors {
            let vendor = count.vendor.as_deref().unwrap_or("(no vendor)");
            writeln!(f, "- {vendor}: {}", count.rows)?;
        }
        Ok(())
    }
}

pub async fn vendor_summary(store: &mut dyn ProductStore) -> Result<VendorSummary, StoreError> {
    let vendors = store.vendor_counts().await?;
    let total = vendors.iter().map(|c| c.rows).sum();
    Ok(VendorSummary { total, vendors })
}

#[cfg(test)]
mod tests {
    use harvest_core::{ProductRecord, VENDOR_ATROBUSHING, VENDOR_AUTOMANN};
    use harvest_storage::MemoryProductStore;

    use super::*;

    fn row(sku: &str, vendor: &str) -> ProductRecord {
        ProductRecord::new(sku, vendor)
    }

    #[tokio::test]
    async fn copy_skips_rows_the_target_already_has() {
        let mut source = MemoryProductStore::with_rows(vec![
            row("TR-1", VENDOR_AUTOMANN),
            row("TR-2", VENDOR_AUTOMANN),
            row("AB-1", VENDOR_ATROBUSHING),
        ]);
        let mut target = MemoryProductStore::with_rows(vec![row("TR-1", VENDOR_AUTOMANN)]);

        let stats = copy_between_stores(&mut source, &mut target, 2).await.expect("copy");
        assert_eq!(
            stats,
            IngestStats {
                attempted: 3,
                skipped: 1,
                written: 2
            }
        );
        assert_eq!(target.rows().len(), 3);

        let again = copy_between_stores(&mut source, &mut target, 2).await.expect("copy again");
        assert_eq!(again.written, 0);
        assert_eq!(again.skipped, 3);
    }

    #[tokio::test]
    async fn summary_totals_every_vendor() {
        let mut store = MemoryProductStore::with_rows(vec![
            row("TR-1", VENDOR_AUTOMANN),
            row("TR-2", VENDOR_AUTOMANN),
            row("AB-1", VENDOR_ATROBUSHING),
            row("X-1", ""),
        ]);
        let summary = vendor_summary(&mut store).await.expect("summary");
        assert_eq!(summary.total, 4);
        assert_eq!(summary.rows_for(VENDOR_AUTOMANN), 2);
        let text = summary.to_string();
        assert!(text.starts_with("Total products: 4"));
        assert!(text.contains("- (no vendor): 1"));
    }
}
