//! Persisted hand-off files between the fetch and analysis steps, and
//! towards external charting tools.
//!
//! Every collection can be written as a JSON array or as CSV with a fixed
//! header row. Reading either form back yields field-for-field equal records.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::pr::types::PrState;
use crate::pr::{FetchOutcome, NormalizedPullRequest, RepoId};
use crate::stats::MonthlyStatistic;

#[derive(Debug, Error)]
pub enum InterchangeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Column order of PR detail CSV files.
pub const PR_COLUMNS: &[&str] = &[
    "number",
    "title",
    "author",
    "state",
    "created_at",
    "merged_at",
    "time_to_merge_days",
    "additions",
    "deletions",
    "changed_files",
    "commits",
];

/// Column order of the `pr_details` CSV: every record field followed by
/// derived columns for spreadsheet use. Readers ignore the derived columns.
pub const DETAIL_COLUMNS: &[&str] = &[
    "number",
    "title",
    "author",
    "state",
    "created_at",
    "merged_at",
    "time_to_merge_days",
    "additions",
    "deletions",
    "changed_files",
    "commits",
    "time_to_merge_hours",
    "total_changes",
];

/// Column order of monthly statistics CSV files.
pub const MONTHLY_COLUMNS: &[&str] = &[
    "month",
    "merged_pr_count",
    "avg_time_to_merge_days",
    "avg_time_to_merge_hours",
    "unique_authors",
    "prs_per_person",
    "median_total_changes",
    "median_changed_files",
];

/// One `pr_details` CSV row. Write-only; read back as [`NormalizedPullRequest`].
#[derive(Serialize)]
struct DetailRow<'a> {
    number: u64,
    title: &'a str,
    author: &'a str,
    state: PrState,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
    time_to_merge_days: Option<f64>,
    additions: Option<u64>,
    deletions: Option<u64>,
    changed_files: Option<u64>,
    commits: Option<u64>,
    time_to_merge_hours: Option<f64>,
    total_changes: Option<u64>,
}

impl<'a> From<&'a NormalizedPullRequest> for DetailRow<'a> {
    fn from(pr: &'a NormalizedPullRequest) -> Self {
        DetailRow {
            number: pr.number,
            title: &pr.title,
            author: &pr.author,
            state: pr.state,
            created_at: pr.created_at,
            merged_at: pr.merged_at,
            time_to_merge_days: pr.time_to_merge_days,
            additions: pr.additions,
            deletions: pr.deletions,
            changed_files: pr.changed_files,
            commits: pr.commits,
            time_to_merge_hours: pr.time_to_merge_days.map(|days| days * 24.0),
            total_changes: pr.total_changes(),
        }
    }
}

/// The file written by the fetch step and read by the analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrDataset {
    pub repository: String,
    pub fetched_at: DateTime<Utc>,
    /// False when the fetch stopped early; see `interruption`
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interruption: Option<String>,
    pub pull_requests: Vec<NormalizedPullRequest>,
}

impl PrDataset {
    pub fn from_outcome(repo: &RepoId, outcome: &FetchOutcome, fetched_at: DateTime<Utc>) -> Self {
        PrDataset {
            repository: repo.to_string(),
            fetched_at,
            complete: outcome.is_complete(),
            interruption: outcome.interruption().map(ToString::to_string),
            pull_requests: outcome.records().to_vec(),
        }
    }
}

/// Paths of the files written by [`save_statistics`].
#[derive(Debug, Clone)]
pub struct OutputFiles {
    pub monthly_csv: PathBuf,
    pub monthly_json: PathBuf,
    pub details_csv: PathBuf,
    pub details_json: PathBuf,
}

impl OutputFiles {
    /// File names carry a `.partial` marker when built from an incomplete dataset.
    pub fn in_dir(dir: &Path, partial: bool) -> Self {
        let name = |stem: &str, ext: &str| {
            if partial {
                dir.join(format!("{}.partial.{}", stem, ext))
            } else {
                dir.join(format!("{}.{}", stem, ext))
            }
        };
        OutputFiles {
            monthly_csv: name("monthly_statistics", "csv"),
            monthly_json: name("monthly_statistics", "json"),
            details_csv: name("pr_details", "csv"),
            details_json: name("pr_details", "json"),
        }
    }

    pub fn all(&self) -> [&Path; 4] {
        [
            &self.monthly_csv,
            &self.monthly_json,
            &self.details_csv,
            &self.details_json,
        ]
    }
}

pub fn write_dataset(path: &Path, dataset: &PrDataset) -> Result<(), InterchangeError> {
    write_json(path, dataset)
}

pub fn read_dataset(path: &Path) -> Result<PrDataset, InterchangeError> {
    read_json(path)
}

/// Write `value` as pretty-printed JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), InterchangeError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, InterchangeError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Write `rows` as CSV under `headers`.
///
/// The header row is always written, so an empty collection still yields a
/// well-formed file. `headers` must list the serialized field names in order.
pub fn write_csv<T: Serialize>(
    path: &Path,
    headers: &[&str],
    rows: &[T],
) -> Result<(), InterchangeError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(headers)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, InterchangeError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<Result<Vec<T>, _>>()?;
    Ok(rows)
}

/// Write monthly statistics and PR details in both CSV and JSON form.
#[instrument(skip(stats, details), fields(months = stats.len(), details = details.len()))]
pub fn save_statistics(
    output_dir: &Path,
    stats: &[MonthlyStatistic],
    details: &[&NormalizedPullRequest],
    partial: bool,
) -> Result<OutputFiles, InterchangeError> {
    fs::create_dir_all(output_dir)?;
    let files = OutputFiles::in_dir(output_dir, partial);

    write_csv(&files.monthly_csv, MONTHLY_COLUMNS, stats)?;
    write_json(&files.monthly_json, stats)?;
    let rows: Vec<DetailRow> = details.iter().map(|&pr| DetailRow::from(pr)).collect();
    write_csv(&files.details_csv, DETAIL_COLUMNS, &rows)?;
    write_json(&files.details_json, details)?;

    for path in files.all() {
        debug!(path = %path.display(), "wrote output file");
    }
    info!(dir = %output_dir.display(), partial, "saved statistics");
    Ok(files)
}
