use std::path::PathBuf;
use std::time::Duration;

use harvest_adapters::layout::{NavStep, NavigationLayout};
use harvest_adapters::{FixtureLauncher, FixtureSite, Locator, SiteLayout, Timeouts};
use harvest_core::{CategorySelector, Credential, DedupPolicy, IngestStats, VENDOR_AUTOMANN};
use harvest_storage::{ArtifactStore, BackoffPolicy, MemoryProductStore};
use harvest_sync::{run_harvest, write_reports, FatalKind, HarvestConfig, IngestOptions};

const USERNAME: &str = "buyer@example.test";
const PASSWORD: &str = "correct horse";

fn launcher() -> FixtureLauncher {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/automann");
    FixtureSite::from_dir(dir)
        .expect("fixture site")
        .accept_input("login[username]", USERNAME)
        .accept_input("login[password]", PASSWORD)
        .launcher()
}

fn config(category: CategorySelector) -> HarvestConfig {
    HarvestConfig {
        category,
        timeouts: Timeouts::instant(),
        login_backoff: BackoffPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
        ingest: IngestOptions {
            upload_enabled: true,
            batch_size: 100,
            dedup: DedupPolicy::WriteUnconditional,
        },
        ..HarvestConfig::default()
    }
}

fn credential() -> Credential {
    Credential::new(USERNAME, PASSWORD)
}

#[tokio::test]
async fn with_bushing_run_writes_every_extracted_record() {
    let launcher = launcher();
    let tmp = tempfile::tempdir().expect("tempdir");
    let artifacts = ArtifactStore::new(tmp.path());
    let mut store = MemoryProductStore::new();

    let report = run_harvest(
        &launcher,
        Some(&mut store),
        config(CategorySelector::WithBushing),
        &credential(),
        &artifacts,
    )
    .await;

    assert!(report.is_success(), "unexpected failure: {:?}", report.fatal);
    assert_eq!(report.vendor, VENDOR_AUTOMANN);
    assert_eq!(report.login_attempts, 1);
    assert_eq!(report.products_found, 2);
    assert_eq!(report.products_extracted, 1);
    assert_eq!(report.records_extracted, 3);
    assert_eq!(report.row_errors, 1);
    assert_eq!(report.blank_skus, 1);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].product, 2);
    assert_eq!(
        report.stats,
        IngestStats {
            attempted: 3,
            skipped: 0,
            written: 3
        }
    );

    let skus: Vec<_> = store.rows().iter().map(|r| r.sku.as_str()).collect();
    assert_eq!(skus, ["TR-10041", "TR-10042", "TR-20011"]);
    assert_eq!(store.committed_batches(), &[3]);
    assert_eq!(launcher.launches(), 1);
    assert_eq!(launcher.quits(), 1);
}

#[tokio::test]
async fn pane_mismatch_is_reported_not_hidden() {
    let launcher = launcher();
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut store = MemoryProductStore::new();

    let report = run_harvest(
        &launcher,
        Some(&mut store),
        config(CategorySelector::FullBall),
        &credential(),
        &ArtifactStore::new(tmp.path()),
    )
    .await;

    assert!(report.is_success());
    assert_eq!(report.pane_mismatches, 1);
    let mismatch = report.issues[0].mismatch.expect("mismatch recorded");
    assert_eq!((mismatch.left, mismatch.right), (3, 2));
    assert_eq!(report.stats.written, 2);
}

#[tokio::test]
async fn empty_category_reports_zero_counts() {
    let launcher = launcher();
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut store = MemoryProductStore::new();

    let report = run_harvest(
        &launcher,
        Some(&mut store),
        config(CategorySelector::Cabin),
        &credential(),
        &ArtifactStore::new(tmp.path()),
    )
    .await;

    assert!(report.is_success());
    assert_eq!(report.products_found, 0);
    assert_eq!(report.stats.attempted, 0);
    assert_eq!(report.stats.written, 0);
    assert_eq!(store.calls(), 0);
    assert_eq!(launcher.quits(), 1);
}

#[tokio::test]
async fn dry_run_counts_without_a_store() {
    let launcher = launcher();
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = HarvestConfig {
        ingest: IngestOptions::dry_run(),
        ..config(CategorySelector::WithBushing)
    };

    let report = run_harvest(&launcher, None, config, &credential(), &ArtifactStore::new(tmp.path())).await;

    assert!(report.is_success());
    assert_eq!(report.stats.attempted, 3);
    assert_eq!(report.stats.written, 0);
}

#[tokio::test]
async fn upload_without_a_store_fails_before_any_browsing() {
    let launcher = launcher();
    let tmp = tempfile::tempdir().expect("tempdir");

    let report = run_harvest(
        &launcher,
        None,
        config(CategorySelector::WithBushing),
        &credential(),
        &ArtifactStore::new(tmp.path()),
    )
    .await;

    assert!(!report.is_success());
    let fatal = report.fatal.expect("fatal");
    assert_eq!(fatal.kind, FatalKind::Configuration);
    assert!(fatal.message.contains("no product store"));
    assert_eq!(report.stats, IngestStats::default());
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn missing_credential_never_opens_a_browser() {
    let launcher = launcher();
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut store = MemoryProductStore::new();

    let report = run_harvest(
        &launcher,
        Some(&mut store),
        config(CategorySelector::WithBushing),
        &Credential::new("", "x"),
        &ArtifactStore::new(tmp.path()),
    )
    .await;

    let fatal = report.fatal.expect("fatal");
    assert_eq!(fatal.kind, FatalKind::MissingCredential);
    assert_eq!(launcher.launches(), 0);
    assert_eq!(launcher.operations(), 0);
    assert_eq!(report.stats, IngestStats::default());
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn rejected_logins_retry_with_fresh_sessions_and_keep_diagnostics() {
    let launcher = launcher();
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = HarvestConfig {
        login_attempts: 2,
        ingest: IngestOptions::dry_run(),
        ..config(CategorySelector::WithBushing)
    };

    let report = run_harvest(
        &launcher,
        None,
        config,
        &Credential::new(USERNAME, "wrong"),
        &ArtifactStore::new(tmp.path()),
    )
    .await;

    let fatal = report.fatal.clone().expect("fatal");
    assert_eq!(fatal.kind, FatalKind::AuthenticationFailed);
    assert_eq!(report.login_attempts, 2);
    assert_eq!(launcher.launches(), 2);
    assert_eq!(launcher.quits(), 2);
    assert_eq!(report.diagnostics.len(), 2);
    for diagnostic in &report.diagnostics {
        let screenshot = diagnostic.screenshot.as_ref().expect("screenshot stored");
        let html = diagnostic.page_source.as_ref().expect("page source stored");
        assert!(screenshot.starts_with(tmp.path()) && screenshot.exists());
        assert_eq!(html.extension().and_then(|e| e.to_str()), Some("html"));
        assert!(html.exists());
    }
}

#[tokio::test]
async fn storage_failure_halts_the_run_and_still_closes_the_browser() {
    let launcher = launcher();
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut store = MemoryProductStore::new().fail_on_batch(1);
    let config = HarvestConfig {
        ingest: IngestOptions {
            batch_size: 2,
            ..IngestOptions::default()
        },
        ..config(CategorySelector::WithBushing)
    };

    let report = run_harvest(&launcher, Some(&mut store), config, &credential(), &ArtifactStore::new(tmp.path())).await;

    let fatal = report.fatal.clone().expect("fatal");
    assert_eq!(fatal.kind, FatalKind::Storage);
    assert_eq!(report.stats.attempted, 2);
    assert_eq!(report.stats.written, 0);
    assert_eq!(report.products_found, 2);
    assert!(store.rows().is_empty());
    assert_eq!(launcher.quits(), 1);
}

#[tokio::test]
async fn navigation_timeout_is_fatal_and_named() {
    let launcher = launcher();
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = HarvestConfig {
        layout: SiteLayout {
            navigation: NavigationLayout {
                steps: vec![NavStep {
                    name: "open parts finder".to_string(),
                    target: Locator::css("#parts-finder"),
                    confirm: None,
                }],
            },
            ..SiteLayout::default()
        },
        ingest: IngestOptions::dry_run(),
        ..config(CategorySelector::WithBushing)
    };

    let report = run_harvest(&launcher, None, config, &credential(), &ArtifactStore::new(tmp.path())).await;

    let fatal = report.fatal.clone().expect("fatal");
    assert_eq!(fatal.kind, FatalKind::NavigationTimeout);
    assert!(fatal.message.contains("open parts finder"));
    assert_eq!(launcher.quits(), 1);
}

#[tokio::test]
async fn reports_land_under_the_run_id() {
    let launcher = launcher();
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = HarvestConfig {
        ingest: IngestOptions::dry_run(),
        ..config(CategorySelector::FullBall)
    };
    let report = run_harvest(
        &launcher,
        None,
        config,
        &credential(),
        &ArtifactStore::new(tmp.path().join("artifacts")),
    )
    .await;

    let dir = write_reports(&tmp.path().join("reports"), &report)
        .await
        .expect("write reports");
    assert!(dir.ends_with(report.run_id.to_string()));

    let json: serde_json::Value = serde_json::from_slice(
        &std::fs::read(dir.join("harvest_report.json")).expect("report json"),
    )
    .expect("valid json");
    assert_eq!(json["category"], "full-ball");
    assert_eq!(json["pane_mismatches"], 1);

    let brief = std::fs::read_to_string(dir.join("harvest_brief.md")).expect("brief");
    assert!(brief.contains("Pane mismatches: 1"));
    assert!(brief.contains("left pane has 3 rows, right pane has 2"));
}
