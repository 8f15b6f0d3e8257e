use async_trait::async_trait;

use super::types::{DiffStats, RawPullRequest, RepoId, StateFilter};
use super::PrError;

/// One page of a listing query.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RawPullRequest>,
    /// Page number to request next, or None at end of results
    pub next: Option<u32>,
}

/// Remote source of pull request data (GitHub, or a fake in tests).
///
/// Implementations are untrusted: pages may overlap, arrive out of order,
/// or carry records with missing fields. Callers must cope with all three.
#[async_trait]
pub trait PullRequestSource: Send + Sync {
    /// Fetch page `page` (1-based) of pull requests in `state`.
    async fn list_page(
        &self,
        repo: &RepoId,
        state: StateFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page, PrError>;

    /// Fetch additions/deletions/changed-files/commits for one pull request.
    async fn fetch_diff_stats(&self, repo: &RepoId, number: u64) -> Result<DiffStats, PrError>;
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory source serving pre-built pages.
    ///
    /// Pages are served in order regardless of `per_page`. Diff stats are
    /// derived from the PR number unless the number is marked as failing.
    #[derive(Default)]
    pub struct FakeSource {
        pub pages: Vec<Result<Vec<RawPullRequest>, PrErrorKind>>,
        pub failing_diffs: HashSet<u64>,
        pub diff_delay: HashMap<u64, Duration>,
        pub list_delay: Option<Duration>,
        pub list_calls: AtomicUsize,
        pub diff_calls: AtomicUsize,
        pub requested_per_page: Mutex<Vec<u32>>,
    }

    /// PrError is not Clone, so pages store the kind of failure to produce.
    #[derive(Debug, Clone, Copy)]
    pub enum PrErrorKind {
        Transient,
        Fatal,
    }

    impl FakeSource {
        pub fn with_pages(pages: Vec<Vec<RawPullRequest>>) -> Self {
            FakeSource {
                pages: pages.into_iter().map(Ok).collect(),
                ..Default::default()
            }
        }

        pub fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }

        pub fn diff_calls(&self) -> usize {
            self.diff_calls.load(Ordering::SeqCst)
        }
    }

    /// A PR created on 2024-01-10 and merged a day later.
    pub fn merged_pr(number: u64, author: &str, labels: &[&str]) -> RawPullRequest {
        RawPullRequest {
            number: Some(number),
            title: Some(format!("PR {}", number)),
            author: Some(author.to_string()),
            created_at: Some("2024-01-10T00:00:00Z".to_string()),
            merged_at: Some("2024-01-11T00:00:00Z".to_string()),
            state: Some("closed".to_string()),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[async_trait]
    impl PullRequestSource for FakeSource {
        async fn list_page(
            &self,
            _repo: &RepoId,
            _state: StateFilter,
            page: u32,
            per_page: u32,
        ) -> Result<Page, PrError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut requested) = self.requested_per_page.lock() {
                requested.push(per_page);
            }
            if let Some(delay) = self.list_delay {
                tokio::time::sleep(delay).await;
            }

            let index = page.saturating_sub(1) as usize;
            let records = match self.pages.get(index) {
                None => return Ok(Page::default()),
                Some(Ok(records)) => records.clone(),
                Some(Err(PrErrorKind::Transient)) => {
                    return Err(PrError::Transient {
                        status: Some(502),
                        message: "bad gateway".to_string(),
                    })
                }
                Some(Err(PrErrorKind::Fatal)) => {
                    return Err(PrError::Fatal {
                        status: Some(401),
                        message: "bad credentials".to_string(),
                    })
                }
            };
            let next = (index + 1 < self.pages.len()).then_some(page + 1);
            Ok(Page { records, next })
        }

        async fn fetch_diff_stats(&self, _repo: &RepoId, number: u64) -> Result<DiffStats, PrError> {
            self.diff_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.diff_delay.get(&number) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing_diffs.contains(&number) {
                return Err(PrError::Fatal {
                    status: Some(404),
                    message: format!("pull request {} not found", number),
                });
            }
            Ok(DiffStats {
                additions: number * 10,
                deletions: number,
                changed_files: number % 5 + 1,
                commits: Some(1),
            })
        }
    }
}
