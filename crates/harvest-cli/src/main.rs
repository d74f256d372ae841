use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use harvest_adapters::WebDriverLauncher;
use harvest_core::{CategorySelector, DedupPolicy};
use harvest_storage::{ArtifactStore, PgProductStore, ProductStore};
use harvest_sync::{
    copy_between_stores, credential_from_env, run_harvest, vendor_summary, write_reports, HarvestConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "harvest-cli")]
#[command(about = "Torque rod catalog harvester")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Log in, walk one category and ingest every row found.
    Harvest(HarvestArgs),
    /// Create the product table if it is missing.
    Migrate,
    /// Copy all products from one database into another, skipping rows it already has.
    Copy {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },
    /// Print row counts per vendor.
    Vendors,
    /// Run the product search API.
    Serve,
}

#[derive(Debug, Default, Args)]
struct HarvestArgs {
    /// cabin, with-bushing or full-ball
    #[arg(long)]
    category: Option<CategorySelector>,
    /// Extract and count rows without writing them.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    batch_size: Option<usize>,
    /// write-unconditional or skip-existing
    #[arg(long)]
    dedup: Option<DedupPolicy>,
    /// YAML site layout replacing the built-in selectors.
    #[arg(long)]
    layout: Option<PathBuf>,
    #[arg(long)]
    login_attempts: Option<usize>,
}

impl HarvestArgs {
    fn apply(self, mut config: HarvestConfig) -> HarvestConfig {
        if let Some(category) = self.category {
            config.category = category;
        }
        if self.dry_run {
            config.ingest.upload_enabled = false;
        }
        if let Some(batch_size) = self.batch_size {
            config.ingest.batch_size = batch_size;
        }
        if let Some(dedup) = self.dedup {
            config.ingest.dedup = dedup;
        }
        if self.layout.is_some() {
            config.layout_path = self.layout;
        }
        if let Some(attempts) = self.login_attempts {
            config.login_attempts = attempts;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let cli = Cli::parse();
    match cli
        .command
        .unwrap_or_else(|| Commands::Harvest(HarvestArgs::default()))
    {
        Commands::Harvest(args) => harvest(args).await?,
        Commands::Migrate => {
            let config = HarvestConfig::from_env()?;
            let mut store = PgProductStore::connect(&config.database_url).await?;
            store.migrate().await?;
            store.close().await?;
            println!("migrations applied");
        }
        Commands::Copy { from, to, batch_size } => {
            let mut source = PgProductStore::connect(&from).await.context("connecting to source")?;
            let mut target = PgProductStore::connect(&to).await.context("connecting to target")?;
            target.migrate().await?;
            let stats = copy_between_stores(&mut source, &mut target, batch_size).await?;
            println!(
                "copy complete: attempted={} skipped={} written={}",
                stats.attempted, stats.skipped, stats.written
            );
            source.close().await?;
            target.close().await?;
        }
        Commands::Vendors => {
            let config = HarvestConfig::from_env()?;
            let mut store = PgProductStore::connect(&config.database_url).await?;
            let summary = vendor_summary(&mut store).await?;
            print!("{summary}");
            store.close().await?;
        }
        Commands::Serve => harvest_web::serve_from_env().await?,
    }

    Ok(())
}

async fn harvest(args: HarvestArgs) -> Result<()> {
    let config = args.apply(HarvestConfig::from_env()?).resolve_layout()?;
    let credential = credential_from_env();
    let launcher = WebDriverLauncher::new(config.webdriver())?;
    let artifacts = ArtifactStore::new(config.artifacts_dir.clone());
    let reports_root = config.reports_dir();

    let mut store = if config.ingest.upload_enabled {
        let mut store = PgProductStore::connect(&config.database_url).await?;
        store.migrate().await?;
        Some(store)
    } else {
        info!("dry run; nothing will be written");
        None
    };

    let report = run_harvest(
        &launcher,
        store.as_mut().map(|s| s as &mut dyn ProductStore),
        config,
        &credential,
        &artifacts,
    )
    .await;

    if let Some(store) = store {
        if let Err(err) = store.close().await {
            warn!(error = %err, "closing product store failed");
        }
    }

    let reports_dir = write_reports(&reports_root, &report).await?;
    println!(
        "harvest {}: run_id={} category={} products={} records={} written={} reports={}",
        if report.is_success() { "complete" } else { "failed" },
        report.run_id,
        report.category,
        report.products_found,
        report.records_extracted,
        report.stats.written,
        reports_dir.display()
    );

    if let Some(fatal) = report.fatal {
        bail!("harvest failed: {}", fatal.message);
    }
    Ok(())
}
