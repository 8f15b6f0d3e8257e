use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::enrich::DiffEnricher;
use super::filter::LabelFilter;
use super::source::PullRequestSource;
use super::types::{NormalizedPullRequest, RawPullRequest, RepoId, StateFilter};
use super::PrError;

pub const DEFAULT_LIMIT: usize = 10_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_DIFF_CONCURRENCY: usize = 8;
/// GitHub's maximum page size for the pulls listing
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Everything the retrieval stage needs to know about one run.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub labels: LabelFilter,
    pub include_diff_stats: bool,
    /// Maximum number of raw records to pull from the listing
    pub limit: usize,
    pub state: StateFilter,
    /// Overall wall-clock budget for every remote call of the run
    pub timeout: Duration,
    pub diff_concurrency: usize,
    pub page_size: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            labels: LabelFilter::default(),
            include_diff_stats: true,
            limit: DEFAULT_LIMIT,
            state: StateFilter::default(),
            timeout: DEFAULT_TIMEOUT,
            diff_concurrency: DEFAULT_DIFF_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Counters reported to the operator after a fetch.
///
/// `seen == duplicates + malformed + excluded + included` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub seen: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub excluded: usize,
    pub included: usize,
    pub enrichment_failed: usize,
    pub enrichment_skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Listing,
    Enrichment,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStage::Listing => write!(f, "listing"),
            FetchStage::Enrichment => write!(f, "enrichment"),
        }
    }
}

/// Why a fetch stopped before finishing.
#[derive(Debug, Error)]
pub enum Interruption {
    #[error("timed out after {}s during {stage}", .elapsed.as_secs())]
    Timeout { stage: FetchStage, elapsed: Duration },

    #[error("{stage} aborted: {source}")]
    Remote {
        stage: FetchStage,
        #[source]
        source: PrError,
    },
}

impl Interruption {
    pub fn stage(&self) -> FetchStage {
        match self {
            Interruption::Timeout { stage, .. } | Interruption::Remote { stage, .. } => *stage,
        }
    }
}

/// Result of a fetch. Partial results are never discarded.
#[derive(Debug)]
pub enum FetchOutcome {
    Complete {
        records: Vec<NormalizedPullRequest>,
        summary: FetchSummary,
    },
    Incomplete {
        records: Vec<NormalizedPullRequest>,
        summary: FetchSummary,
        reason: Interruption,
    },
}

impl FetchOutcome {
    pub fn records(&self) -> &[NormalizedPullRequest] {
        match self {
            FetchOutcome::Complete { records, .. } | FetchOutcome::Incomplete { records, .. } => {
                records
            }
        }
    }

    pub fn summary(&self) -> &FetchSummary {
        match self {
            FetchOutcome::Complete { summary, .. } | FetchOutcome::Incomplete { summary, .. } => {
                summary
            }
        }
    }

    pub fn interruption(&self) -> Option<&Interruption> {
        match self {
            FetchOutcome::Complete { .. } => None,
            FetchOutcome::Incomplete { reason, .. } => Some(reason),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, FetchOutcome::Complete { .. })
    }
}

/// Drives pagination, label filtering, deduplication, normalization and
/// optional diff enrichment against a [`PullRequestSource`].
pub struct Fetcher<'a, S: PullRequestSource + ?Sized> {
    source: &'a S,
    options: FetchOptions,
}

#[derive(Default)]
struct ListingState {
    numbers: HashSet<u64>,
    summary: FetchSummary,
    records: Vec<NormalizedPullRequest>,
}

impl<'a, S: PullRequestSource + ?Sized> Fetcher<'a, S> {
    pub fn new(source: &'a S, options: FetchOptions) -> Self {
        Fetcher { source, options }
    }

    #[instrument(skip(self, repo), fields(repo = %repo, state = %self.options.state, limit = self.options.limit))]
    pub async fn fetch(&self, repo: &RepoId) -> FetchOutcome {
        let started = Instant::now();
        let deadline = started + self.options.timeout;

        let mut state = ListingState::default();
        let listing = self.list(repo, started, deadline, &mut state).await;
        let ListingState {
            mut summary,
            records,
            ..
        } = state;

        if let Err(reason) = listing {
            warn!(stage = %reason.stage(), error = %reason, normalized = records.len(), "listing stopped early");
            return FetchOutcome::Incomplete {
                records,
                summary,
                reason,
            };
        }
        info!(
            seen = summary.seen,
            included = summary.included,
            excluded = summary.excluded,
            duplicates = summary.duplicates,
            malformed = summary.malformed,
            "listing complete"
        );

        if !self.options.include_diff_stats || records.is_empty() {
            return FetchOutcome::Complete { records, summary };
        }

        let report = DiffEnricher::new(self.options.diff_concurrency)
            .enrich_all(self.source, repo, records, deadline)
            .await;
        summary.enrichment_failed = report.failed;
        summary.enrichment_skipped = report.skipped;
        info!(
            failed = report.failed,
            skipped = report.skipped,
            "diff enrichment complete"
        );

        if report.skipped > 0 {
            return FetchOutcome::Incomplete {
                records: report.records,
                summary,
                reason: Interruption::Timeout {
                    stage: FetchStage::Enrichment,
                    elapsed: started.elapsed(),
                },
            };
        }
        FetchOutcome::Complete {
            records: report.records,
            summary,
        }
    }

    async fn list(
        &self,
        repo: &RepoId,
        started: Instant,
        deadline: Instant,
        state: &mut ListingState,
    ) -> Result<(), Interruption> {
        // Page size stays fixed across pages so page offsets line up.
        let per_page = (self.options.page_size.max(1) as usize).min(self.options.limit.max(1)) as u32;
        let mut requested = HashSet::new();
        let mut page = 1;

        loop {
            let remaining = self.options.limit.saturating_sub(state.summary.seen);
            if remaining == 0 {
                debug!("reached fetch limit");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Interruption::Timeout {
                    stage: FetchStage::Listing,
                    elapsed: started.elapsed(),
                });
            }

            requested.insert(page);
            let fetched = tokio::time::timeout_at(
                deadline,
                self.source.list_page(repo, self.options.state, page, per_page),
            )
            .await
            .map_err(|_| Interruption::Timeout {
                stage: FetchStage::Listing,
                elapsed: started.elapsed(),
            })?
            .map_err(|source| Interruption::Remote {
                stage: FetchStage::Listing,
                source,
            })?;
            debug!(page, records = fetched.records.len(), next = ?fetched.next, "received page");

            for raw in fetched.records.into_iter().take(remaining) {
                state.summary.seen += 1;
                self.accept(raw, state);
            }

            match fetched.next {
                Some(next) if !requested.contains(&next) => page = next,
                Some(next) => {
                    warn!(page = next, "source pointed back at an already fetched page, stopping");
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }

    fn accept(&self, raw: RawPullRequest, state: &mut ListingState) {
        let Some(number) = raw.number else {
            state.summary.malformed += 1;
            debug!("dropping record without a number");
            return;
        };
        if !state.numbers.insert(number) {
            state.summary.duplicates += 1;
            debug!(pr = number, "dropping duplicate record");
            return;
        }
        if !self.options.labels.include(&raw) {
            state.summary.excluded += 1;
            debug!(pr = number, labels = ?raw.labels, "excluded by label filter");
            return;
        }
        match NormalizedPullRequest::from_raw(&raw) {
            Ok(pr) => {
                state.summary.included += 1;
                state.records.push(pr);
            }
            Err(reason) => {
                state.summary.malformed += 1;
                warn!(pr = number, %reason, "dropping malformed record");
            }
        }
    }
}
