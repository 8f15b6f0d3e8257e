pub mod types;

pub use types::{Month, MonthlyStatistic};

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

use crate::pr::NormalizedPullRequest;

/// Date window and time zone for one aggregation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Earliest creation date kept, inclusive
    pub cutoff_date: Option<NaiveDate>,
    /// Latest creation date kept, inclusive
    pub end_date: Option<NaiveDate>,
    /// Offset used to turn timestamps into calendar dates and months
    pub utc_offset: FixedOffset,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        AggregateOptions {
            cutoff_date: None,
            end_date: None,
            utc_offset: Utc.fix(),
        }
    }
}

/// Buckets merged pull requests by merge month and computes [`MonthlyStatistic`]s.
///
/// The date window applies to `created_at`, not `merged_at`: a PR created
/// before the cutoff is dropped even if it merged inside the window.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    options: AggregateOptions,
}

impl Aggregator {
    pub fn new(options: AggregateOptions) -> Self {
        Aggregator { options }
    }

    pub fn options(&self) -> &AggregateOptions {
        &self.options
    }

    /// Whether the local creation date of `pr` lies inside the window.
    pub fn in_window(&self, pr: &NormalizedPullRequest) -> bool {
        let created = pr.created_at.with_timezone(&self.options.utc_offset).date_naive();
        self.options.cutoff_date.map_or(true, |cutoff| created >= cutoff)
            && self.options.end_date.map_or(true, |end| created <= end)
    }

    /// Records inside the date window, merged or not, in input order.
    pub fn filter<'a>(&self, records: &'a [NormalizedPullRequest]) -> Vec<&'a NormalizedPullRequest> {
        records.iter().filter(|pr| self.in_window(pr)).collect()
    }

    /// One statistic per month with at least one merge, oldest first.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn aggregate(&self, records: &[NormalizedPullRequest]) -> Vec<MonthlyStatistic> {
        let mut months: BTreeMap<Month, Vec<&NormalizedPullRequest>> = BTreeMap::new();
        for pr in self.filter(records) {
            let Some(merged_at) = pr.merged_at else {
                continue;
            };
            let month = Month::of(&merged_at.with_timezone(&self.options.utc_offset));
            months.entry(month).or_default().push(pr);
        }
        debug!(months = months.len(), "grouped merged pull requests");

        months
            .into_iter()
            .map(|(month, prs)| monthly_statistic(month, &prs))
            .collect()
    }
}

fn monthly_statistic(month: Month, prs: &[&NormalizedPullRequest]) -> MonthlyStatistic {
    let merged_pr_count = prs.len() as u64;
    let unique_authors = prs
        .iter()
        .map(|pr| pr.author.as_str())
        .collect::<BTreeSet<_>>()
        .len() as u64;

    let merge_days: Vec<f64> = prs.iter().filter_map(|pr| pr.time_to_merge_days).collect();
    let avg_time_to_merge_days = mean(&merge_days);

    let prs_per_person = if unique_authors > 0 {
        Some(merged_pr_count as f64 / unique_authors as f64)
    } else {
        None
    };

    MonthlyStatistic {
        month,
        merged_pr_count,
        avg_time_to_merge_days,
        avg_time_to_merge_hours: avg_time_to_merge_days.map(|days| days * 24.0),
        unique_authors,
        prs_per_person,
        median_total_changes: median(
            prs.iter()
                .filter_map(|pr| pr.total_changes())
                .map(|n| n as f64)
                .collect(),
        ),
        median_changed_files: median(
            prs.iter()
                .filter_map(|pr| pr.changed_files)
                .map(|n| n as f64)
                .collect(),
        ),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
