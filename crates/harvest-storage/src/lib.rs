//! Product table access + diagnostic artifact storage for the harvester.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_core::ProductRecord;
use sha2::{Digest, Sha256};
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{Connection, PgConnection, Row};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "harvest-storage";

/// Table shared with the search service.
pub const PRODUCTS_TABLE: &str = "torque_rods";

static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Content-addressed directory for postmortem snapshots (screenshots, DOM dumps).
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// `<stamp>/<vendor-slug>/<hash>.<ext>`
    pub fn artifact_relative_path(
        captured_at: DateTime<Utc>,
        vendor: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let vendor_dir = slug(vendor);
        let ext = match extension.trim_start_matches('.').trim() {
            "" => "bin",
            ext => ext,
        };
        PathBuf::from(captured_at.format("%Y%m%d_%H%M%S").to_string())
            .join(vendor_dir)
            .join(format!("{content_hash}.{ext}"))
    }

    /// Write a snapshot once; identical bytes captured in the same second share a file.
    pub async fn store_snapshot(
        &self,
        captured_at: DateTime<Utc>,
        vendor: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path =
            Self::artifact_relative_path(captured_at, vendor, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);

        let deduplicated = write_once(&absolute_path, bytes).await?;
        debug!(path = %absolute_path.display(), deduplicated, "stored diagnostic snapshot");

        Ok(StoredArtifact {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated,
        })
    }
}

/// Returns `true` when the target already existed and nothing was written.
async fn write_once(target: &Path, bytes: &[u8]) -> anyhow::Result<bool> {
    let parent = target
        .parent()
        .with_context(|| format!("artifact path {} has no parent", target.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating artifact directory {}", parent.display()))?;

    if fs::try_exists(target)
        .await
        .with_context(|| format!("checking artifact path {}", target.display()))?
    {
        return Ok(true);
    }

    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
    drop(file);

    match fs::rename(&temp_path, target).await {
        Ok(()) => Ok(false),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(&temp_path).await;
            Ok(true)
        }
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err).with_context(|| {
                format!(
                    "renaming temp artifact {} -> {}",
                    temp_path.display(),
                    target.display()
                )
            })
        }
    }
}

fn slug(input: &str) -> String {
    let slug = input
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug.to_string()
    }
}

/// Delay schedule used by callers that choose to retry a whole login.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connecting to product store: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("running product store migrations: {0}")]
    Migrate(#[from] MigrateError),
    #[error("reading product store: {0}")]
    Read(#[source] sqlx::Error),
    #[error("writing batch of {batch_len} records (rolled back): {source}")]
    Write {
        batch_len: usize,
        #[source]
        source: sqlx::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorCount {
    pub vendor: Option<String>,
    pub rows: i64,
}

/// Durable home of harvested product rows.
#[async_trait]
pub trait ProductStore: Send {
    /// SKUs already stored for `vendor` (exact match).
    async fn existing_skus(&mut self, vendor: &str) -> Result<HashSet<String>, StoreError>;

    /// Insert all records in one transaction. Nothing from this call survives a failure.
    async fn write_batch(&mut self, records: &[ProductRecord]) -> Result<(), StoreError>;

    async fn all_records(&mut self) -> Result<Vec<ProductRecord>, StoreError>;

    async fn vendor_counts(&mut self) -> Result<Vec<VendorCount>, StoreError>;
}

/// Single serial Postgres connection, one per run.
#[derive(Debug)]
pub struct PgProductStore {
    conn: PgConnection,
}

const INSERT_PRODUCT_SQL: &str = r#"
    INSERT INTO torque_rods (
        sku, type1, type2, c_to_c, side_a, side_b,
        side_a_bushing, side_b_bushing, side_a_angle, side_b_angle,
        shaft_dia, notes, vendor
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
"#;

impl PgProductStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let conn = PgConnection::connect(database_url)
            .await
            .map_err(StoreError::Connect)?;
        Ok(Self { conn })
    }

    pub async fn migrate(&mut self) -> Result<(), StoreError> {
        MIGRATOR.run(&mut self.conn).await?;
        Ok(())
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await.map_err(StoreError::Connect)
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn existing_skus(&mut self, vendor: &str) -> Result<HashSet<String>, StoreError> {
        let skus: Vec<String> = sqlx::query_scalar(
            "SELECT sku FROM torque_rods WHERE vendor = $1 AND sku IS NOT NULL",
        )
        .bind(vendor)
        .fetch_all(&mut self.conn)
        .await
        .map_err(StoreError::Read)?;
        Ok(skus.into_iter().collect())
    }

    async fn write_batch(&mut self, records: &[ProductRecord]) -> Result<(), StoreError> {
        let batch_len = records.len();
        let span = info_span!("write_batch", batch_len);
        async move {
            let write_err = |source| StoreError::Write { batch_len, source };
            let mut tx = self.conn.begin().await.map_err(write_err)?;
            for record in records {
                sqlx::query(INSERT_PRODUCT_SQL)
                    .bind(&record.sku)
                    .bind(&record.type1)
                    .bind(&record.type2)
                    .bind(&record.center_to_center)
                    .bind(&record.side_a)
                    .bind(&record.side_b)
                    .bind(&record.side_a_bushing)
                    .bind(&record.side_b_bushing)
                    .bind(&record.side_a_angle)
                    .bind(&record.side_b_angle)
                    .bind(&record.shaft_diameter)
                    .bind(&record.notes)
                    .bind(&record.vendor)
                    .execute(&mut *tx)
                    .await
                    .map_err(write_err)?;
            }
            tx.commit().await.map_err(write_err)
        }
        .instrument(span)
        .await
    }

    async fn all_records(&mut self) -> Result<Vec<ProductRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sku, type1, type2, c_to_c, side_a, side_b,
                   side_a_bushing, side_b_bushing, side_a_angle, side_b_angle,
                   shaft_dia, notes, vendor
              FROM torque_rods
             ORDER BY id
            "#,
        )
        .fetch_all(&mut self.conn)
        .await
        .map_err(StoreError::Read)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let text = |column: &str| -> Result<Option<String>, StoreError> {
                row.try_get::<Option<String>, _>(column)
                    .map_err(StoreError::Read)
            };
            out.push(ProductRecord {
                sku: text("sku")?.unwrap_or_default(),
                type1: text("type1")?,
                type2: text("type2")?,
                center_to_center: text("c_to_c")?,
                side_a: text("side_a")?,
                side_b: text("side_b")?,
                side_a_bushing: text("side_a_bushing")?,
                side_b_bushing: text("side_b_bushing")?,
                side_a_angle: text("side_a_angle")?,
                side_b_angle: text("side_b_angle")?,
                shaft_diameter: text("shaft_dia")?,
                notes: text("notes")?,
                vendor: text("vendor")?.unwrap_or_default(),
            });
        }
        Ok(out)
    }

    async fn vendor_counts(&mut self) -> Result<Vec<VendorCount>, StoreError> {
        let rows = sqlx::query(
            "SELECT vendor, COUNT(*) AS row_count FROM torque_rods GROUP BY vendor ORDER BY vendor",
        )
        .fetch_all(&mut self.conn)
        .await
        .map_err(StoreError::Read)?;

        rows.into_iter()
            .map(|row| {
                Ok(VendorCount {
                    vendor: row.try_get("vendor").map_err(StoreError::Read)?,
                    rows: row.try_get("row_count").map_err(StoreError::Read)?,
                })
            })
            .collect()
    }
}

/// In-process store that records every committed batch. Used by tests and dry tooling.
#[derive(Debug, Default)]
pub struct MemoryProductStore {
    rows: Vec<ProductRecord>,
    committed_batches: Vec<usize>,
    batch_attempts: usize,
    fail_on_batch: Option<usize>,
    calls: usize,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<ProductRecord>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Make the `n`-th `write_batch` call (1-based) fail and roll back.
    pub fn fail_on_batch(mut self, n: usize) -> Self {
        self.fail_on_batch = Some(n);
        self
    }

    pub fn rows(&self) -> &[ProductRecord] {
        &self.rows
    }

    pub fn committed_batches(&self) -> &[usize] {
        &self.committed_batches
    }

    /// Number of trait calls that reached the store.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn existing_skus(&mut self, vendor: &str) -> Result<HashSet<String>, StoreError> {
        self.calls += 1;
        Ok(self
            .rows
            .iter()
            .filter(|r| r.vendor == vendor)
            .map(|r| r.sku.clone())
            .collect())
    }

    async fn write_batch(&mut self, records: &[ProductRecord]) -> Result<(), StoreError> {
        self.calls += 1;
        self.batch_attempts += 1;
        if self.fail_on_batch == Some(self.batch_attempts) {
            return Err(StoreError::Write {
                batch_len: records.len(),
                source: sqlx::Error::Protocol(format!(
                    "injected failure on batch {}",
                    self.batch_attempts
                )),
            });
        }
        self.rows.extend_from_slice(records);
        self.committed_batches.push(records.len());
        Ok(())
    }

    async fn all_records(&mut self) -> Result<Vec<ProductRecord>, StoreError> {
        self.calls += 1;
        Ok(self.rows.clone())
    }

    async fn vendor_counts(&mut self) -> Result<Vec<VendorCount>, StoreError> {
        self.calls += 1;
        let mut counts: BTreeMap<Option<String>, i64> = BTreeMap::new();
        for row in &self.rows {
            let vendor = (!row.vendor.is_empty()).then(|| row.vendor.clone());
            *counts.entry(vendor).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(vendor, rows)| VendorCount { vendor, rows })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::{VENDOR_ATROBUSHING, VENDOR_AUTOMANN};
    use tempfile::tempdir;

    #[test]
    fn artifact_hashing_is_stable() {
        let hash = ArtifactStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn artifact_paths_are_grouped_by_stamp_and_vendor() {
        let captured_at = DateTime::parse_from_rfc3339("2026-02-24T12:00:05Z")
            .expect("ts")
            .with_timezone(&Utc);
        let path = ArtifactStore::artifact_relative_path(captured_at, "Automann", "abc", ".png");
        assert_eq!(path, PathBuf::from("20260224_120005/automann/abc.png"));

        let fallback = ArtifactStore::artifact_relative_path(captured_at, "  ", "abc", "");
        assert_eq!(fallback, PathBuf::from("20260224_120005/unknown/abc.bin"));
    }

    #[tokio::test]
    async fn identical_snapshots_share_one_file() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let captured_at = Utc::now();

        let first = store
            .store_snapshot(captured_at, VENDOR_AUTOMANN, "html", b"<html>login</html>")
            .await
            .expect("first store");
        let second = store
            .store_snapshot(captured_at, VENDOR_AUTOMANN, "html", b"<html>login</html>")
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert_eq!(
            std::fs::read(&first.absolute_path).expect("read back"),
            b"<html>login</html>"
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn memory_store_rolls_back_the_failing_batch_only() {
        let mut store = MemoryProductStore::new().fail_on_batch(2);
        let first = vec![ProductRecord::new("A", VENDOR_AUTOMANN)];
        let second = vec![
            ProductRecord::new("B", VENDOR_AUTOMANN),
            ProductRecord::new("C", VENDOR_AUTOMANN),
        ];

        store.write_batch(&first).await.expect("first batch");
        let err = store.write_batch(&second).await.expect_err("second batch fails");

        assert!(matches!(err, StoreError::Write { batch_len: 2, .. }));
        assert_eq!(store.rows().len(), 1);
        assert_eq!(store.committed_batches(), &[1]);
    }

    #[tokio::test]
    async fn memory_store_reports_vendor_counts_and_skus() {
        let mut store = MemoryProductStore::with_rows(vec![
            ProductRecord::new("A", VENDOR_AUTOMANN),
            ProductRecord::new("B", VENDOR_AUTOMANN),
            ProductRecord::new("A", VENDOR_ATROBUSHING),
        ]);

        let skus = store.existing_skus(VENDOR_AUTOMANN).await.expect("skus");
        assert_eq!(skus.len(), 2);

        let counts = store.vendor_counts().await.expect("counts");
        assert_eq!(
            counts,
            vec![
                VendorCount {
                    vendor: Some(VENDOR_ATROBUSHING.to_string()),
                    rows: 1
                },
                VendorCount {
                    vendor: Some(VENDOR_AUTOMANN.to_string()),
                    rows: 2
                },
            ]
        );
    }
}
