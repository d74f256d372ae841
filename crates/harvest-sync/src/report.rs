use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::fs;

use crate::pipeline::HarvestReport;

/// Write `<reports_root>/<run_id>/harvest_report.json` and a markdown brief next to it.
pub async fn write_reports(reports_root: &Path, report: &HarvestReport) -> anyhow::Result<PathBuf> {
    let reports_dir = reports_root.join(report.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let json = serde_json::to_vec_pretty(report).context("serializing harvest report")?;
    fs::write(reports_dir.join("harvest_report.json"), json)
        .await
        .context("writing harvest_report.json")?;

    fs::write(reports_dir.join("harvest_brief.md"), render_brief(report))
        .await
        .context("writing harvest_brief.md")?;

    Ok(reports_dir)
}

pub fn render_brief(report: &HarvestReport) -> String {
    let status = match &report.fatal {
        None => "completed".to_string(),
        Some(fatal) => format!("failed ({})", fatal.message),
    };
    let mut brief = format!(
        "# Harvest Brief\n\n- Run ID: `{}`\n- Vendor: {}\n- Category: {}\n- Started: {}\n- Finished: {}\n- Status: {}\n- Login attempts: {}\n\n## Extraction\n- Products found: {}\n- Products read cleanly: {}\n- Records extracted: {}\n- Row errors: {}\n- Pane mismatches: {}\n- Blank SKUs dropped: {}\n\n## Ingest\n- Attempted: {}\n- Skipped: {}\n- Written: {}\n",
        report.run_id,
        report.vendor,
        report.category,
        report.started_at,
        report.finished_at,
        status,
        report.login_attempts,
        report.products_found,
        report.products_extracted,
        report.records_extracted,
        report.row_errors,
        report.pane_mismatches,
        report.blank_skus,
        report.stats.attempted,
        report.stats.skipped,
        report.stats.written,
    );

    if report.products_found == 0 && report.fatal.is_none() {
        brief.push_str("\nThe category listed no products.\n");
    }

    if !report.issues.is_empty() {
        brief.push_str("\n## Product Issues\n");
        for issue in &report.issues {
            let mut line = format!("- product {}: kept {} records", issue.product, issue.records_kept);
            if let Some(mismatch) = &issue.mismatch {
                line.push_str(&format!("; {mismatch}"));
            }
            if let Some(error) = &issue.error {
                line.push_str(&format!("; {error}"));
            }
            brief.push_str(&line);
            brief.push('\n');
        }
    }

    if !report.diagnostics.is_empty() {
        brief.push_str("\n## Login Diagnostics\n");
        for diagnostic in &report.diagnostics {
            brief.push_str(&format!("- {}: {}\n", diagnostic.captured_at, diagnostic.reason));
            for path in diagnostic.screenshot.iter().chain(diagnostic.page_source.iter()) {
                brief.push_str(&format!("  - `{}`\n", path.display()));
            }
        }
    }
    brief
}
