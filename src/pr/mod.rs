pub mod enrich;
pub mod fetch;
pub mod filter;
pub mod github;
pub mod source;
pub mod types;

pub use fetch::{FetchOptions, FetchOutcome, Fetcher};
pub use types::{NormalizedPullRequest, RepoId, StateFilter};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrError {
    #[error("Invalid repository: '{0}'. Expected format: 'owner/repo' (e.g., 'octocat/hello-world')")]
    InvalidRepo(String),

    #[error("GitHub token not found in config or environment")]
    MissingToken,

    #[error("transient remote error{}: {message}", status_suffix(.status))]
    Transient { status: Option<u16>, message: String },

    #[error("remote error{}: {message}", status_suffix(.status))]
    Fatal { status: Option<u16>, message: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl PrError {
    /// Whether a retry could plausibly succeed (network, rate limit, 5xx).
    pub fn is_transient(&self) -> bool {
        matches!(self, PrError::Transient { .. })
    }
}

impl From<reqwest::Error> for PrError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_decode() {
            PrError::Decode(err.to_string())
        } else if err.is_timeout() || err.is_connect() || err.is_request() {
            PrError::Transient {
                status,
                message: err.to_string(),
            }
        } else {
            PrError::Fatal {
                status,
                message: err.to_string(),
            }
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Parse and validate an `owner/name` repository identifier.
///
/// The owner allows `[A-Za-z0-9_-]`, the name additionally allows `.`.
pub fn parse_repo(repo: &str) -> Result<RepoId, PrError> {
    let invalid = || PrError::InvalidRepo(repo.to_string());
    let (owner, name) = repo.split_once('/').ok_or_else(invalid)?;

    let owner_ok = !owner.is_empty()
        && owner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    let name_ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if !owner_ok || !name_ok {
        return Err(invalid());
    }

    Ok(RepoId {
        owner: owner.to_string(),
        name: name.to_string(),
    })
}
