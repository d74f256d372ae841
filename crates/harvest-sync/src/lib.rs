//! Harvest orchestration: run configuration, ingest sink, the end-to-end run
//! and its reports, plus store maintenance.

pub mod config;
pub mod ingest;
pub mod maintenance;
pub mod pipeline;
pub mod report;

pub use config::{credential_from_env, HarvestConfig};
pub use ingest::{ingest, IngestError, IngestOptions, IngestSink};
pub use maintenance::{copy_between_stores, vendor_summary, VendorSummary};
pub use pipeline::{run_harvest, FatalError, FatalKind, HarvestReport, ProductIssue, RunError, StoredDiagnostic};
pub use report::{render_brief, write_reports};

pub const CRATE_NAME: &str = "harvest-sync";
