//! Ingest sink: batches extracted records into a [`ProductStore`].

use std::collections::{HashMap, HashSet};

use harvest_core::{DedupPolicy, IngestStats, ProductRecord};
use harvest_storage::{ProductStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestOptions {
    /// When false nothing reaches the store; records are only counted.
    pub upload_enabled: bool,
    pub batch_size: usize,
    pub dedup: DedupPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            upload_enabled: true,
            batch_size: 100,
            dedup: DedupPolicy::WriteUnconditional,
        }
    }
}

impl IngestOptions {
    pub fn dry_run() -> Self {
        Self {
            upload_enabled: false,
            ..Self::default()
        }
    }
}

/// A store call failed. `stats` holds the counts reached before the failure;
/// batches committed earlier stay committed.
#[derive(Debug, Error)]
#[error("ingest halted after {} written records: {source}", .stats.written)]
pub struct IngestError {
    pub stats: IngestStats,
    #[source]
    pub source: StoreError,
}

/// Streaming sink. Records are pushed one at a time and committed every
/// `batch_size` records; [`IngestSink::finish`] commits the remainder.
///
/// After a store failure the sink is halted and ignores further records.
pub struct IngestSink<'s> {
    store: Option<&'s mut dyn ProductStore>,
    options: IngestOptions,
    stats: IngestStats,
    pending: Vec<ProductRecord>,
    known: HashMap<String, HashSet<String>>,
    halted: bool,
}

impl<'s> IngestSink<'s> {
    pub fn new(store: &'s mut dyn ProductStore, options: IngestOptions) -> Self {
        Self::build(Some(store), options)
    }

    /// A sink with no store behind it. Always a dry run.
    pub fn counting(options: IngestOptions) -> Self {
        if options.upload_enabled {
            warn!("upload requested without a product store; counting records only");
        }
        Self::build(
            None,
            IngestOptions {
                upload_enabled: false,
                ..options
            },
        )
    }

    fn build(store: Option<&'s mut dyn ProductStore>, options: IngestOptions) -> Self {
        let options = IngestOptions {
            batch_size: options.batch_size.max(1),
            ..options
        };
        Self {
            store,
            options,
            stats: IngestStats::default(),
            pending: Vec::with_capacity(options.batch_size.min(1024)),
            known: HashMap::new(),
            halted: false,
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn options(&self) -> IngestOptions {
        self.options
    }

    fn uploading(&self) -> bool {
        self.options.upload_enabled && self.store.is_some()
    }

    fn halt(&mut self, source: StoreError) -> IngestError {
        self.halted = true;
        self.pending.clear();
        IngestError {
            stats: self.stats,
            source,
        }
    }

    pub async fn push(&mut self, record: ProductRecord) -> Result<(), IngestError> {
        if self.halted {
            return Ok(());
        }
        self.stats.attempted += 1;

        if !record.has_sku() {
            warn!(vendor = %record.vendor, "skipping record without sku");
            self.stats.skipped += 1;
            return Ok(());
        }
        if !self.uploading() {
            return Ok(());
        }

        if self.options.dedup == DedupPolicy::SkipExisting && !self.claim(&record).await? {
            debug!(sku = %record.sku, vendor = %record.vendor, "sku already stored; skipping");
            self.stats.skipped += 1;
            return Ok(());
        }

        self.pending.push(record);
        if self.pending.len() >= self.options.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Reserve the record's sku for this run. False when it is already stored
    /// or was staged earlier in the same run.
    async fn claim(&mut self, record: &ProductRecord) -> Result<bool, IngestError> {
        if !self.known.contains_key(&record.vendor) {
            let loaded = match self.store.as_deref_mut() {
                Some(store) => store.existing_skus(&record.vendor).await,
                None => Ok(HashSet::new()),
            };
            let skus = loaded.map_err(|source| self.halt(source))?;
            debug!(vendor = %record.vendor, known = skus.len(), "loaded stored skus");
            self.known.insert(record.vendor.clone(), skus);
        }
        Ok(self
            .known
            .get_mut(&record.vendor)
            .is_some_and(|skus| skus.insert(record.sku.clone())))
    }

    async fn flush(&mut self) -> Result<(), IngestError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let written = match self.store.as_deref_mut() {
            Some(store) => store.write_batch(&batch).await,
            None => return Ok(()),
        };
        match written {
            Ok(()) => {
                self.stats.written += batch.len();
                info!(batch = batch.len(), written = self.stats.written, "committed batch");
                Ok(())
            }
            Err(source) => {
                warn!(batch = batch.len(), error = %source, "batch rolled back; halting ingest");
                Err(self.halt(source))
            }
        }
    }

    /// Commit whatever is still pending and return the final counts.
    pub async fn finish(mut self) -> Result<IngestStats, IngestError> {
        if !self.halted {
            self.flush().await?;
        }
        Ok(self.stats)
    }
}

/// One-shot form of the sink. `store` is never touched when upload is disabled.
pub async fn ingest<I>(
    store: Option<&mut dyn ProductStore>,
    records: I,
    options: IngestOptions,
) -> Result<IngestStats, IngestError>
where
    I: IntoIterator<Item = ProductRecord>,
{
    let mut sink = match store {
        Some(store) if options.upload_enabled => IngestSink::new(store, options),
        _ => IngestSink::counting(IngestOptions {
            upload_enabled: false,
            ..options
        }),
    };
    for record in records {
        sink.push(record).await?;
    }
    sink.finish().await
}

#[cfg(test)]
mod tests {
    use harvest_core::VENDOR_AUTOMANN;
    use harvest_storage::MemoryProductStore;

    use super::*;

    fn records(n: usize) -> Vec<ProductRecord> {
        (0..n)
            .map(|i| ProductRecord::new(format!("TR-{i:05}"), VENDOR_AUTOMANN))
            .collect()
    }

    fn options(batch_size: usize, dedup: DedupPolicy) -> IngestOptions {
        IngestOptions {
            upload_enabled: true,
            batch_size,
            dedup,
        }
    }

    #[tokio::test]
    async fn commits_full_batches_then_the_remainder() {
        let mut store = MemoryProductStore::new();
        let stats = ingest(
            Some(&mut store),
            records(250),
            options(100, DedupPolicy::WriteUnconditional),
        )
        .await
        .expect("ingest");
        assert_eq!(store.committed_batches(), &[100, 100, 50]);
        assert_eq!(
            stats,
            IngestStats {
                attempted: 250,
                skipped: 0,
                written: 250
            }
        );
    }

    #[tokio::test]
    async fn dry_run_never_touches_the_store() {
        let mut store = MemoryProductStore::new();
        let stats = ingest(Some(&mut store), records(42), IngestOptions::dry_run())
            .await
            .expect("ingest");
        assert_eq!(store.calls(), 0);
        assert_eq!(stats.attempted, 42);
        assert_eq!(stats.written, 0);
    }

    #[tokio::test]
    async fn second_pass_with_skip_existing_writes_nothing() {
        let mut store = MemoryProductStore::new();
        let input = records(30);
        let opts = options(10, DedupPolicy::SkipExisting);

        let first = ingest(Some(&mut store), input.clone(), opts).await.expect("first");
        assert_eq!(first.written, 30);

        let second = ingest(Some(&mut store), input.clone(), opts).await.expect("second");
        assert_eq!(second.written, 0);
        assert_eq!(second.skipped, input.len());
        assert_eq!(store.rows().len(), 30);
    }

    #[tokio::test]
    async fn skip_existing_also_drops_repeats_within_one_input() {
        let mut store = MemoryProductStore::new();
        let mut input = records(3);
        input.push(ProductRecord::new("TR-00001", VENDOR_AUTOMANN));
        input.push(ProductRecord::new("TR-00001", "AtroBushing"));
        let stats = ingest(Some(&mut store), input, options(100, DedupPolicy::SkipExisting))
            .await
            .expect("ingest");
        assert_eq!(stats.written, 4);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn write_unconditional_keeps_duplicates() {
        let mut store = MemoryProductStore::with_rows(records(5));
        let stats = ingest(
            Some(&mut store),
            records(5),
            options(100, DedupPolicy::WriteUnconditional),
        )
        .await
        .expect("ingest");
        assert_eq!(stats.written, 5);
        assert_eq!(store.rows().len(), 10);
    }

    #[tokio::test]
    async fn blank_skus_are_counted_as_skipped() {
        let mut store = MemoryProductStore::new();
        let mut input = records(2);
        input.push(ProductRecord::new("   ", VENDOR_AUTOMANN));
        let stats = ingest(
            Some(&mut store),
            input,
            options(100, DedupPolicy::WriteUnconditional),
        )
        .await
        .expect("ingest");
        assert_eq!(
            stats,
            IngestStats {
                attempted: 3,
                skipped: 1,
                written: 2
            }
        );
    }

    #[tokio::test]
    async fn failed_batch_halts_with_partial_counts() {
        let mut store = MemoryProductStore::new().fail_on_batch(2);
        let err = ingest(
            Some(&mut store),
            records(250),
            options(100, DedupPolicy::WriteUnconditional),
        )
        .await
        .expect_err("second batch fails");
        assert_eq!(err.stats.written, 100);
        assert_eq!(err.stats.attempted, 200);
        assert!(matches!(err.source, StoreError::Write { batch_len: 100, .. }));
        assert_eq!(store.committed_batches(), &[100]);
        assert_eq!(store.rows().len(), 100);
    }

    #[tokio::test]
    async fn halted_sink_ignores_later_records() {
        let mut store = MemoryProductStore::new().fail_on_batch(1);
        let mut sink = IngestSink::new(&mut store, options(1, DedupPolicy::WriteUnconditional));
        let mut input = records(2).into_iter();
        assert!(sink.push(input.next().expect("record")).await.is_err());
        sink.push(input.next().expect("record")).await.expect("ignored");
        let stats = sink.finish().await.expect("finish");
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.written, 0);
    }
}
