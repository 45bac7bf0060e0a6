//! Metrics export.
//!
//! Serializes final accumulator snapshots to CSV and JSON files in a
//! timestamped run folder. Formatting stops at plain serialization; styling
//! and presentation belong to downstream consumers.

use crate::aggregate::AccumulatorSnapshot;
use crate::error::Result;
use crate::pipeline::RunStats;
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// One CSV row: a single category within one accumulator.
#[derive(Debug, Serialize)]
struct MetricRow<'a> {
    key: &'a str,
    name: &'a str,
    category: &'static str,
    publication_count: u64,
    citation_sum: u64,
    total_publications: u64,
    total_citations: u64,
}

/// Create the timestamped output folder for one run.
pub fn create_run_folder(output_dir: &Path, label: &str) -> Result<PathBuf> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let safe_label: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect::<String>()
        .trim()
        .replace(' ', "_");
    let folder = output_dir.join(format!("{}_{}", timestamp, safe_label));
    std::fs::create_dir_all(&folder)?;
    Ok(folder)
}

/// Write author metrics, department metrics, and run counters into `folder`.
pub fn export_all(
    folder: &Path,
    authors: &[AccumulatorSnapshot],
    departments: &[AccumulatorSnapshot],
    stats: &RunStats,
) -> Result<()> {
    save_metric_csv(&folder.join("author_metrics.csv"), authors)?;
    save_metric_csv(&folder.join("department_metrics.csv"), departments)?;
    save_json(&folder.join("author_metrics.json"), authors)?;
    save_json(&folder.join("department_metrics.json"), departments)?;
    save_json(&folder.join("run_stats.json"), stats)?;
    info!(
        authors = authors.len(),
        departments = departments.len(),
        folder = %folder.display(),
        "Exported metrics"
    );
    Ok(())
}

/// Save accumulator snapshots as per-category CSV rows.
fn save_metric_csv(path: &Path, snapshots: &[AccumulatorSnapshot]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_path(path)?;

    for snapshot in snapshots {
        for category in &snapshot.categories {
            wtr.serialize(MetricRow {
                key: &snapshot.key,
                name: &snapshot.display_name,
                category: category.category.as_str(),
                publication_count: category.publication_count,
                citation_sum: category.citation_sum,
                total_publications: snapshot.total_publications,
                total_citations: snapshot.total_citations,
            })?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Save any serializable payload as pretty-printed JSON.
fn save_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(data)?;
    std::fs::write(path, content)?;
    Ok(())
}
