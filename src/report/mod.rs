pub mod types;

pub use types::{Report, Trend, TrendDirection};

use crate::pr::{FetchOutcome, RepoId};
use crate::stats::MonthlyStatistic;
use colored::Colorize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Build a Report from monthly statistics.
pub fn build(
    months: Vec<MonthlyStatistic>,
    records_analyzed: usize,
    repository: Option<String>,
    partial: bool,
) -> Report {
    let merge_trend = linear_trend(
        &months
            .iter()
            .map(|m| m.merged_pr_count as f64)
            .collect::<Vec<_>>(),
    );
    Report {
        repository,
        records_analyzed,
        partial,
        months,
        merge_trend,
    }
}

/// Least-squares fit of `values` against their index.
fn linear_trend(values: &[f64]) -> Option<Trend> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let (mut covariance, mut variance) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        covariance += dx * (y - mean_y);
        variance += dx * dx;
    }
    Some(Trend {
        slope: covariance / variance,
    })
}

/// Output the report to terminal (default) or to a markdown file.
#[instrument(skip(report), fields(months = report.months.len(), partial = report.partial))]
pub fn output(report: &Report, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing report to terminal");
            print_terminal_report(report);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing report to file");
            write_markdown_report(report, path)
        }
    }
}

/// Print fetch counters and, for an incomplete fetch, why it stopped.
pub fn print_fetch_summary(repo: &RepoId, outcome: &FetchOutcome) {
    let summary = outcome.summary();
    println!();
    println!("{} {}", "Fetched".bold(), repo.to_string().bold());
    println!(
        "Seen: {} | Included: {} | Excluded by label: {} | Duplicates: {} | Malformed: {}",
        summary.seen, summary.included, summary.excluded, summary.duplicates, summary.malformed
    );
    if summary.enrichment_failed > 0 || summary.enrichment_skipped > 0 {
        println!(
            "Diff stats unavailable: {} failed, {} skipped",
            summary.enrichment_failed.to_string().yellow(),
            summary.enrichment_skipped.to_string().yellow()
        );
    }
    match outcome.interruption() {
        None => println!("Status: {}", "COMPLETE".green().bold()),
        Some(reason) => println!("Status: {} ({})", "INCOMPLETE".red().bold(), reason),
    }
    println!();
}

fn title(report: &Report) -> String {
    match &report.repository {
        Some(repo) => format!("{} PR statistics", repo),
        None => "PR statistics".to_string(),
    }
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

/// One row per month: month, merged, avg days, authors, PRs/person,
/// median changes, median files.
fn table_rows(report: &Report) -> Vec<[String; 7]> {
    report
        .months
        .iter()
        .map(|m| {
            [
                m.month.to_string(),
                m.merged_pr_count.to_string(),
                fmt_opt(m.avg_time_to_merge_days, 2),
                m.unique_authors.to_string(),
                fmt_opt(m.prs_per_person, 2),
                fmt_opt(m.median_total_changes, 1),
                fmt_opt(m.median_changed_files, 1),
            ]
        })
        .collect()
}

const HEADERS: [&str; 7] = [
    "Month",
    "Merged",
    "Avg days to merge",
    "Authors",
    "PRs/person",
    "Median changes",
    "Median files",
];

fn print_terminal_report(report: &Report) {
    println!();
    println!("═══ {} ═══", title(report).bold());
    println!("PRs analyzed: {} | Months: {}", report.records_analyzed, report.months.len());
    if report.partial {
        println!("{}", "Built from an INCOMPLETE fetch".red().bold());
    }
    println!();

    if report.months.is_empty() {
        println!("  No merged PRs in range.");
        println!();
        return;
    }

    let rows = table_rows(report);
    let widths: Vec<usize> = (0..HEADERS.len())
        .map(|i| {
            rows.iter()
                .map(|r| r[i].len())
                .chain(std::iter::once(HEADERS[i].len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header = HEADERS
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{:>w$}", h, w = w))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", header.bold());
    for row in &rows {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:>w$}", c, w = w))
            .collect::<Vec<_>>()
            .join("  ");
        println!("{}", line);
    }
    println!();

    if let Some(trend) = report.merge_trend {
        println!(
            "═══ Merged PR trend: {} ({:+.2} per month) ═══",
            colorize_trend(trend.direction()),
            trend.slope
        );
        println!();
    }
}

fn write_markdown_report(report: &Report, path: &Path) -> Result<(), ReportError> {
    let mut md = String::new();
    md.push_str(&format!("# {}\n\n", title(report)));
    md.push_str(&format!(
        "**PRs analyzed:** {} | **Months:** {}\n\n",
        report.records_analyzed,
        report.months.len()
    ));
    if report.partial {
        md.push_str("> **Warning:** built from an incomplete fetch.\n\n");
    }

    if report.months.is_empty() {
        md.push_str("No merged PRs in range.\n");
    } else {
        md.push_str(&format!("| {} |\n", HEADERS.join(" | ")));
        md.push_str(&format!("|{}\n", "---:|".repeat(HEADERS.len())));
        for row in table_rows(report) {
            md.push_str(&format!("| {} |\n", row.join(" | ")));
        }
        md.push('\n');
    }

    if let Some(trend) = report.merge_trend {
        md.push_str(&format!(
            "## Merged PR trend: {} ({:+.2} per month)\n",
            trend.direction(),
            trend.slope
        ));
    }

    std::fs::write(path, md)?;
    Ok(())
}

fn colorize_trend(direction: TrendDirection) -> colored::ColoredString {
    match direction {
        TrendDirection::Rising => "RISING".green().bold(),
        TrendDirection::Flat => "FLAT".yellow().bold(),
        TrendDirection::Falling => "FALLING".red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pr::fetch::FetchSummary;
    use crate::stats::Month;

    fn month(m: u32, merged: u64) -> MonthlyStatistic {
        MonthlyStatistic {
            month: Month::new(2024, m).unwrap(),
            merged_pr_count: merged,
            avg_time_to_merge_days: Some(2.0),
            avg_time_to_merge_hours: Some(48.0),
            unique_authors: 2,
            prs_per_person: Some(merged as f64 / 2.0),
            median_total_changes: Some(150.0),
            median_changed_files: None,
        }
    }

    #[test]
    fn test_linear_trend() {
        let trend = linear_trend(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((trend.slope - 1.0).abs() < 1e-9);

        let flat = linear_trend(&[5.0, 5.0, 5.0]).unwrap();
        assert_eq!(flat.slope, 0.0);
        assert_eq!(flat.direction(), TrendDirection::Flat);

        assert!(linear_trend(&[3.0]).is_none());
        assert!(linear_trend(&[]).is_none());
    }

    #[test]
    fn test_build_report() {
        let report = build(vec![month(1, 3), month(2, 6)], 12, Some("org/repo".to_string()), false);
        assert_eq!(report.records_analyzed, 12);
        assert_eq!(report.months.len(), 2);
        assert_eq!(report.merge_trend.unwrap().direction(), TrendDirection::Rising);
    }

    #[test]
    fn test_build_report_single_month_has_no_trend() {
        let report = build(vec![month(1, 3)], 3, None, false);
        assert!(report.merge_trend.is_none());
    }

    #[test]
    fn test_write_markdown_report() {
        let report = build(vec![month(1, 3), month(2, 1)], 4, Some("org/repo".to_string()), true);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.md");
        write_markdown_report(&report, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# org/repo PR statistics"));
        assert!(content.contains("**PRs analyzed:** 4"));
        assert!(content.contains("incomplete fetch"));
        assert!(content.contains("| 2024-01 | 3 | 2.00 | 2 | 1.50 | 150.0 | - |"));
        assert!(content.contains("## Merged PR trend: FALLING (-2.00 per month)"));
    }

    #[test]
    fn test_empty_markdown_report() {
        let report = build(vec![], 0, None, false);
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.md");
        output(&report, Some(&path)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# PR statistics"));
        assert!(content.contains("No merged PRs in range."));
    }

    #[test]
    fn test_terminal_output_does_not_panic() {
        let report = build(vec![month(1, 3), month(2, 4)], 7, None, true);
        output(&report, None).unwrap();
        output(&build(vec![], 0, None, false), None).unwrap();
    }

    #[test]
    fn test_fetch_summary_does_not_panic() {
        let repo = RepoId {
            owner: "org".to_string(),
            name: "repo".to_string(),
        };
        let outcome = FetchOutcome::Complete {
            records: vec![],
            summary: FetchSummary {
                seen: 3,
                excluded: 1,
                included: 2,
                enrichment_failed: 1,
                ..Default::default()
            },
        };
        print_fetch_summary(&repo, &outcome);
    }
}
