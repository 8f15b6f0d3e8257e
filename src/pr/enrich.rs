use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::source::PullRequestSource;
use super::types::{NormalizedPullRequest, RepoId};

/// Outcome of enriching a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichStatus {
    Enriched,
    /// The remote call failed; the record keeps absent diff fields.
    Failed,
    /// The deadline passed before the call could start or finish.
    Skipped,
}

#[derive(Debug, Default)]
pub struct EnrichReport {
    /// Records in input order, enriched where possible
    pub records: Vec<NormalizedPullRequest>,
    pub failed: usize,
    pub skipped: usize,
}

/// Populates diff statistics with a bounded number of concurrent requests.
#[derive(Debug, Clone, Copy)]
pub struct DiffEnricher {
    concurrency: usize,
}

impl DiffEnricher {
    pub fn new(concurrency: usize) -> Self {
        DiffEnricher {
            concurrency: concurrency.max(1),
        }
    }

    /// Enrich every record. Never fails: per-record errors are counted.
    ///
    /// Output order matches input order whatever order the calls finish in.
    #[instrument(skip(self, source, repo, records, deadline), fields(repo = %repo, records = records.len(), concurrency = self.concurrency))]
    pub async fn enrich_all<S>(
        &self,
        source: &S,
        repo: &RepoId,
        records: Vec<NormalizedPullRequest>,
        deadline: Instant,
    ) -> EnrichReport
    where
        S: PullRequestSource + ?Sized,
    {
        let results: Vec<(NormalizedPullRequest, EnrichStatus)> = stream::iter(records)
            .map(|record| self.enrich(source, repo, record, deadline))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = EnrichReport {
            records: Vec::with_capacity(results.len()),
            ..Default::default()
        };
        for (record, status) in results {
            match status {
                EnrichStatus::Enriched => {}
                EnrichStatus::Failed => report.failed += 1,
                EnrichStatus::Skipped => report.skipped += 1,
            }
            report.records.push(record);
        }
        debug!(failed = report.failed, skipped = report.skipped, "diff enrichment finished");
        report
    }

    pub async fn enrich<S>(
        &self,
        source: &S,
        repo: &RepoId,
        record: NormalizedPullRequest,
        deadline: Instant,
    ) -> (NormalizedPullRequest, EnrichStatus)
    where
        S: PullRequestSource + ?Sized,
    {
        if Instant::now() >= deadline {
            return (record, EnrichStatus::Skipped);
        }

        match tokio::time::timeout_at(deadline, source.fetch_diff_stats(repo, record.number)).await {
            Ok(Ok(stats)) => (record.with_diff_stats(stats), EnrichStatus::Enriched),
            Ok(Err(err)) => {
                warn!(pr = record.number, transient = err.is_transient(), error = %err, "diff enrichment failed, keeping record without diff stats");
                (record, EnrichStatus::Failed)
            }
            Err(_) => {
                debug!(pr = record.number, "diff enrichment cut off by deadline");
                (record, EnrichStatus::Skipped)
            }
        }
    }
}
