//! One harvest run: login, navigate, walk the category, extract, ingest.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use harvest_adapters::{
    Browser, BrowserError, BrowserLauncher, DiagnosticSnapshot, ExtractError, HarvestError, PaneExtraction,
    PaneMismatch, Session,
};
use harvest_core::{CategorySelector, Credential, IngestStats};
use harvest_storage::{ArtifactStore, ProductStore};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::HarvestConfig;
use crate::ingest::{IngestError, IngestSink};

/// Run-terminating failures. Product-local problems never become one of these.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("upload is enabled but no product store was supplied")]
    MissingStore,
    #[error("could not open a browser session: {0}")]
    Launch(#[source] BrowserError),
    #[error(transparent)]
    Harvest(#[from] HarvestError),
    #[error(transparent)]
    Storage(#[from] IngestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    Configuration,
    MissingCredential,
    AuthenticationFailed,
    NotAuthenticated,
    NavigationTimeout,
    Browser,
    Storage,
}

impl RunError {
    pub fn kind(&self) -> FatalKind {
        match self {
            Self::MissingStore => FatalKind::Configuration,
            Self::Launch(_) => FatalKind::Browser,
            Self::Harvest(HarvestError::MissingCredential) => FatalKind::MissingCredential,
            Self::Harvest(HarvestError::AuthenticationFailed { .. }) => FatalKind::AuthenticationFailed,
            Self::Harvest(HarvestError::NotAuthenticated) => FatalKind::NotAuthenticated,
            Self::Harvest(HarvestError::NavigationTimeout { .. }) => FatalKind::NavigationTimeout,
            Self::Harvest(HarvestError::Browser(_)) => FatalKind::Browser,
            Self::Storage(_) => FatalKind::Storage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FatalError {
    pub kind: FatalKind,
    pub message: String,
}

impl From<&RunError> for FatalError {
    fn from(err: &RunError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Where a failed login's snapshot ended up.
#[derive(Debug, Clone, Serialize)]
pub struct StoredDiagnostic {
    pub captured_at: DateTime<Utc>,
    pub reason: String,
    pub screenshot: Option<PathBuf>,
    pub page_source: Option<PathBuf>,
}

/// Something that went wrong inside one product's detail view.
#[derive(Debug, Clone, Serialize)]
pub struct ProductIssue {
    pub product: usize,
    pub records_kept: usize,
    pub error: Option<String>,
    pub mismatch: Option<PaneMismatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub run_id: Uuid,
    pub vendor: String,
    pub category: CategorySelector,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub login_attempts: usize,
    pub products_found: usize,
    /// Detail views read to the end without a row error.
    pub products_extracted: usize,
    pub records_extracted: usize,
    pub row_errors: usize,
    pub pane_mismatches: usize,
    pub blank_skus: usize,
    pub issues: Vec<ProductIssue>,
    pub stats: IngestStats,
    pub fatal: Option<FatalError>,
    pub diagnostics: Vec<StoredDiagnostic>,
}

impl HarvestReport {
    fn begin(config: &HarvestConfig) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            vendor: config.vendor.clone(),
            category: config.category,
            started_at: now,
            finished_at: now,
            login_attempts: 0,
            products_found: 0,
            products_extracted: 0,
            records_extracted: 0,
            row_errors: 0,
            pane_mismatches: 0,
            blank_skus: 0,
            issues: Vec::new(),
            stats: IngestStats::default(),
            fatal: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
    }

    fn record_extraction(&mut self, product: usize, extraction: &PaneExtraction) {
        self.records_extracted += extraction.records.len();
        self.blank_skus += extraction.blank_skus;
        if extraction.mismatch.is_some() {
            self.pane_mismatches += 1;
        }
        match &extraction.error {
            None => self.products_extracted += 1,
            Some(ExtractError::Row { .. }) => self.row_errors += 1,
            Some(_) => {}
        }
        if extraction.error.is_some() || extraction.mismatch.is_some() {
            self.issues.push(ProductIssue {
                product,
                records_kept: extraction.records.len(),
                error: extraction.error.as_ref().map(ToString::to_string),
                mismatch: extraction.mismatch,
            });
        }
    }
}

/// Run one harvest end to end. Always returns a report; a run-terminating
/// failure is recorded in [`HarvestReport::fatal`] next to the counts reached.
pub async fn run_harvest<L: BrowserLauncher>(
    launcher: &L,
    store: Option<&mut dyn ProductStore>,
    config: HarvestConfig,
    credential: &Credential,
    artifacts: &ArtifactStore,
) -> HarvestReport {
    let mut report = HarvestReport::begin(&config);
    let span = info_span!(
        "harvest",
        run_id = %report.run_id,
        vendor = %config.vendor,
        category = %config.category
    );

    let outcome = harvest(launcher, store, &config, credential, artifacts, &mut report)
        .instrument(span)
        .await;
    if let Err(err) = outcome {
        error!(run_id = %report.run_id, error = %err, "harvest run failed");
        report.fatal = Some(FatalError::from(&err));
    }
    report.finished_at = Utc::now();
    info!(
        run_id = %report.run_id,
        attempted = report.stats.attempted,
        skipped = report.stats.skipped,
        written = report.stats.written,
        "harvest run finished"
    );
    report
}

async fn harvest<L: BrowserLauncher>(
    launcher: &L,
    store: Option<&mut dyn ProductStore>,
    config: &HarvestConfig,
    credential: &Credential,
    artifacts: &ArtifactStore,
    report: &mut HarvestReport,
) -> Result<(), RunError> {
    if config.ingest.upload_enabled && store.is_none() {
        return Err(RunError::MissingStore);
    }
    if !credential.is_complete() {
        return Err(HarvestError::MissingCredential.into());
    }

    let mut session = login(launcher, config, credential, artifacts, report).await?;
    let outcome = walk_category(&mut session, store, config, report).await;
    session.close().await;
    outcome
}

/// Each attempt gets a fresh browser; a failed attempt's session is closed
/// before the backoff delay.
async fn login<L: BrowserLauncher>(
    launcher: &L,
    config: &HarvestConfig,
    credential: &Credential,
    artifacts: &ArtifactStore,
    report: &mut HarvestReport,
) -> Result<Session<L::Browser>, RunError> {
    let layout = Arc::new(config.layout.clone());
    let attempts = config.login_attempts.max(1);
    let mut last_reason = String::from("no login attempt was made");

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = config.login_backoff.delay_for_attempt(attempt - 1);
            info!(attempt = attempt + 1, ?delay, "retrying login with a fresh session");
            tokio::time::sleep(delay).await;
        }
        report.login_attempts += 1;

        let browser = launcher.launch().await.map_err(RunError::Launch)?;
        let mut session = Session::new(browser, Arc::clone(&layout), config.timeouts);
        let auth = match session.authenticate(credential).await {
            Ok(auth) => auth,
            Err(err) => {
                session.close().await;
                return Err(err.into());
            }
        };
        if auth.success {
            return Ok(session);
        }

        if let Some(snapshot) = &auth.diagnostics {
            report
                .diagnostics
                .push(persist_diagnostics(artifacts, &config.vendor, snapshot).await);
        }
        last_reason = auth.reason.unwrap_or_else(|| "unknown".to_string());
        warn!(attempt = attempt + 1, reason = %last_reason, "login attempt failed");
        session.close().await;
    }

    Err(HarvestError::AuthenticationFailed { reason: last_reason }.into())
}

async fn persist_diagnostics(
    artifacts: &ArtifactStore,
    vendor: &str,
    snapshot: &DiagnosticSnapshot,
) -> StoredDiagnostic {
    let mut stored = StoredDiagnostic {
        captured_at: snapshot.captured_at,
        reason: snapshot.reason.clone(),
        screenshot: None,
        page_source: None,
    };
    if let Some(bytes) = &snapshot.screenshot {
        match artifacts.store_snapshot(snapshot.captured_at, vendor, "png", bytes).await {
            Ok(artifact) => stored.screenshot = Some(artifact.absolute_path),
            Err(err) => warn!(error = %err, "could not persist login screenshot"),
        }
    }
    if let Some(html) = &snapshot.page_source {
        match artifacts
            .store_snapshot(snapshot.captured_at, vendor, "html", html.as_bytes())
            .await
        {
            Ok(artifact) => stored.page_source = Some(artifact.absolute_path),
            Err(err) => warn!(error = %err, "could not persist login page source"),
        }
    }
    stored
}

async fn walk_category<B: Browser>(
    session: &mut Session<B>,
    store: Option<&mut dyn ProductStore>,
    config: &HarvestConfig,
    report: &mut HarvestReport,
) -> Result<(), RunError> {
    session.navigate_to_category(config.category).await?;
    let walk = session.enumerate_category(config.category).await?;
    report.products_found = walk.found();

    let mut sink = match store {
        Some(store) => IngestSink::new(store, config.ingest),
        None => IngestSink::counting(config.ingest),
    };

    for handle in walk {
        let product = handle.ordinal();
        let extraction = async {
            match session.activate(handle).await {
                Ok(mut view) => view.extract_records(&config.vendor).await,
                Err(err) => {
                    warn!(error = %err, "could not open product detail");
                    PaneExtraction::failed(ExtractError::Activation(err))
                }
            }
        }
        .instrument(info_span!("product", product))
        .await;

        report.record_extraction(product, &extraction);
        for record in extraction.records {
            if let Err(err) = sink.push(record).await {
                report.stats = err.stats;
                return Err(err.into());
            }
        }
        report.stats = sink.stats();
    }

    match sink.finish().await {
        Ok(stats) => {
            report.stats = stats;
            Ok(())
        }
        Err(err) => {
            report.stats = err.stats;
            Err(err.into())
        }
    }
}
