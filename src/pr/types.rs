use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// A repository identifier in `owner/name` form.
/// Constructed by parse_repo() in pr/mod.rs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// PR state filter passed to the listing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    All,
    #[default]
    Merged,
    Open,
    Closed,
}

impl fmt::Display for StateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateFilter::All => write!(f, "all"),
            StateFilter::Merged => write!(f, "merged"),
            StateFilter::Open => write!(f, "open"),
            StateFilter::Closed => write!(f, "closed"),
        }
    }
}

/// State of a single normalized pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// A pull request as returned by the remote listing, before validation.
///
/// Every field the remote may omit is optional here; validation happens
/// in [`NormalizedPullRequest::from_raw`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPullRequest {
    pub number: Option<u64>,
    pub title: Option<String>,
    /// Author login; None for deleted accounts
    pub author: Option<String>,
    /// ISO 8601 timestamp, kept as text so a bad value only drops this record
    pub created_at: Option<String>,
    pub merged_at: Option<String>,
    pub state: Option<String>,
    pub labels: Vec<String>,
}

/// Diff statistics for a single pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffStats {
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
    pub commits: Option<u64>,
}

/// Reason a raw record was dropped during normalization.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedRecord {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unrecognized state `{0}`")]
    InvalidState(String),

    #[error("invalid timestamp in `{field}`: {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("merged_at {merged_at} precedes created_at {created_at}")]
    MergedBeforeCreated {
        created_at: DateTime<Utc>,
        merged_at: DateTime<Utc>,
    },
}

/// The durable unit handed from retrieval to aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPullRequest {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub state: PrState,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    /// `merged_at - created_at` in fractional days
    pub time_to_merge_days: Option<f64>,
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
    pub changed_files: Option<u64>,
    pub commits: Option<u64>,
}

impl NormalizedPullRequest {
    /// Validate a raw record and derive `time_to_merge_days`.
    /// Diff fields start absent; see [`NormalizedPullRequest::with_diff_stats`].
    pub fn from_raw(raw: &RawPullRequest) -> Result<Self, MalformedRecord> {
        let number = raw.number.ok_or(MalformedRecord::MissingField("number"))?;
        let created_at = parse_timestamp(
            "created_at",
            raw.created_at
                .as_deref()
                .ok_or(MalformedRecord::MissingField("created_at"))?,
        )?;
        let merged_at = raw
            .merged_at
            .as_deref()
            .map(|value| parse_timestamp("merged_at", value))
            .transpose()?;

        if let Some(merged_at) = merged_at {
            if merged_at < created_at {
                return Err(MalformedRecord::MergedBeforeCreated {
                    created_at,
                    merged_at,
                });
            }
        }

        let state = match (merged_at, raw.state.as_deref()) {
            (Some(_), _) => PrState::Merged,
            (None, Some(s)) if s.eq_ignore_ascii_case("open") => PrState::Open,
            (None, Some(s)) if s.eq_ignore_ascii_case("closed") => PrState::Closed,
            // A "merged" state without a merge timestamp cannot be bucketed.
            (None, Some(s)) if s.eq_ignore_ascii_case("merged") => {
                return Err(MalformedRecord::MissingField("merged_at"))
            }
            (None, Some(s)) => return Err(MalformedRecord::InvalidState(s.to_string())),
            (None, None) => return Err(MalformedRecord::MissingField("state")),
        };

        let time_to_merge_days = merged_at
            .map(|merged_at| (merged_at - created_at).num_milliseconds() as f64 / MILLIS_PER_DAY);

        Ok(NormalizedPullRequest {
            number,
            title: raw.title.clone().unwrap_or_default(),
            author: raw.author.clone().unwrap_or_else(|| "unknown".to_string()),
            state,
            created_at,
            merged_at,
            time_to_merge_days,
            additions: None,
            deletions: None,
            changed_files: None,
            commits: None,
        })
    }

    pub fn with_diff_stats(mut self, stats: DiffStats) -> Self {
        self.additions = Some(stats.additions);
        self.deletions = Some(stats.deletions);
        self.changed_files = Some(stats.changed_files);
        self.commits = stats.commits;
        self
    }

    /// `additions + deletions`, only when both are known and the sum fits.
    pub fn total_changes(&self) -> Option<u64> {
        self.additions?.checked_add(self.deletions?)
    }
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, MalformedRecord> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| MalformedRecord::InvalidTimestamp {
            field,
            value: value.to_string(),
        })
}
