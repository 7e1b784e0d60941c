//! JSON run reports.
//!
//! A report bundles the [`CrawlSummary`] of every source crawled in one run
//! with a few totals, and is written under a directory named after the local
//! date:
//!
//! ```text
//! report_dir/
//! └── 2026-10-16/
//!     └── crawl_083015.json
//! ```

use crate::models::CrawlSummary;
use crate::utils::ensure_writable_dir;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// Everything one multi-source run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub total_saved: usize,
    pub total_duplicates: usize,
    /// Names of sources whose run ended degraded.
    pub partial_sources: Vec<String>,
    pub sources: Vec<CrawlSummary>,
}

impl RunReport {
    pub fn new(summaries: &[CrawlSummary]) -> Self {
        Self {
            generated_at: Utc::now(),
            total_saved: summaries.iter().map(|s| s.saved).sum(),
            total_duplicates: summaries.iter().map(|s| s.duplicates_skipped).sum(),
            partial_sources: summaries
                .iter()
                .filter(|s| s.partial)
                .map(|s| s.source.clone())
                .collect(),
            sources: summaries.to_vec(),
        }
    }
}

/// Write a [`RunReport`] for `summaries` below `report_dir`.
///
/// # Arguments
///
/// * `summaries` - One summary per crawled source
/// * `report_dir` - Base directory for reports
///
/// # Returns
///
/// Path of the written file: `{report_dir}/{date}/crawl_{HHMMSS}.json`.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir))]
pub async fn write_run_report(
    summaries: &[CrawlSummary],
    report_dir: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let report = RunReport::new(summaries);
    let json = serde_json::to_string_pretty(&report)?;

    let now = Local::now();
    let dated_dir = format!(
        "{}/{}",
        report_dir.trim_end_matches('/'),
        now.date_naive()
    );
    if let Err(e) = ensure_writable_dir(&dated_dir).await {
        error!(%dated_dir, error = %e, "Report directory is not writable");
        return Err(e);
    }

    let path = PathBuf::from(&dated_dir).join(format!("crawl_{}.json", now.format("%H%M%S")));
    fs::write(&path, json).await?;
    info!(path = %path.display(), sources = summaries.len(), "Wrote run report");
    Ok(path)
}
