use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, LINK, USER_AGENT};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::source::{Page, PullRequestSource};
use super::types::{DiffStats, RawPullRequest, RepoId, StateFilter};
use super::PrError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// [`PullRequestSource`] backed by the GitHub REST API.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Deserialize)]
struct User {
    login: Option<String>,
}

#[derive(Deserialize)]
struct Label {
    name: Option<String>,
}

/// One element of `GET /repos/{owner}/{repo}/pulls`.
/// Every field is optional so a single odd record cannot fail the page.
#[derive(Deserialize)]
struct PullListItem {
    number: Option<u64>,
    title: Option<String>,
    user: Option<User>,
    created_at: Option<String>,
    merged_at: Option<String>,
    state: Option<String>,
    #[serde(default)]
    labels: Vec<Label>,
}

/// The diff-related subset of `GET /repos/{owner}/{repo}/pulls/{number}`.
#[derive(Deserialize)]
struct PullDetail {
    additions: u64,
    deletions: u64,
    changed_files: u64,
    commits: Option<u64>,
}

impl From<PullListItem> for RawPullRequest {
    fn from(item: PullListItem) -> Self {
        RawPullRequest {
            number: item.number,
            title: item.title,
            author: item.user.and_then(|u| u.login),
            created_at: item.created_at,
            merged_at: item.merged_at,
            state: item.state,
            labels: item.labels.into_iter().filter_map(|l| l.name).collect(),
        }
    }
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        GitHubClient {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header(USER_AGENT, "pr-stats")
            .header(ACCEPT, "application/vnd.github+json")
            .bearer_auth(&self.token)
    }
}

#[async_trait]
impl PullRequestSource for GitHubClient {
    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn list_page(
        &self,
        repo: &RepoId,
        state: StateFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page, PrError> {
        let url = format!("{}/repos/{}/{}/pulls", self.api_url, repo.owner, repo.name);
        let query = [
            ("state", rest_state(state).to_string()),
            ("sort", "created".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];

        debug!("fetching pull request page from GitHub API");
        let response = check_status(self.get(&url).query(&query).send().await?)?;
        let has_next = has_next_link(response.headers());
        let items = response.json::<Vec<PullListItem>>().await?;
        let fetched = items.len();

        let records = items
            .into_iter()
            .map(RawPullRequest::from)
            .filter(|pr| state != StateFilter::Merged || pr.merged_at.is_some())
            .collect::<Vec<_>>();
        debug!(fetched, kept = records.len(), has_next, "received pull request page");

        Ok(Page {
            records,
            next: (has_next && fetched > 0).then_some(page + 1),
        })
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn fetch_diff_stats(&self, repo: &RepoId, number: u64) -> Result<DiffStats, PrError> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            self.api_url, repo.owner, repo.name, number
        );
        let detail = check_status(self.get(&url).send().await?)?
            .json::<PullDetail>()
            .await?;
        Ok(DiffStats {
            additions: detail.additions,
            deletions: detail.deletions,
            changed_files: detail.changed_files,
            commits: detail.commits,
        })
    }
}

/// The REST listing has no `merged` state; merged PRs are a subset of closed.
fn rest_state(state: StateFilter) -> &'static str {
    match state {
        StateFilter::All => "all",
        StateFilter::Merged | StateFilter::Closed => "closed",
        StateFilter::Open => "open",
    }
}

fn has_next_link(headers: &HeaderMap) -> bool {
    headers
        .get(LINK)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|link| link.split(',').any(|part| part.contains("rel=\"next\"")))
}

fn check_status(response: Response) -> Result<Response, PrError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let rate_limited = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");
    Err(classify_status(status, rate_limited))
}

fn classify_status(status: StatusCode, rate_limited: bool) -> PrError {
    let code = Some(status.as_u16());
    match status {
        StatusCode::TOO_MANY_REQUESTS => PrError::Transient {
            status: code,
            message: "rate limited".to_string(),
        },
        StatusCode::FORBIDDEN if rate_limited => PrError::Transient {
            status: code,
            message: "API rate limit exceeded".to_string(),
        },
        StatusCode::UNAUTHORIZED => PrError::Fatal {
            status: code,
            message: "authentication failed, check the GitHub token".to_string(),
        },
        StatusCode::NOT_FOUND => PrError::Fatal {
            status: code,
            message: "repository or pull request not found".to_string(),
        },
        s if s.is_server_error() => PrError::Transient {
            status: code,
            message: s.canonical_reason().unwrap_or("server error").to_string(),
        },
        s => PrError::Fatal {
            status: code,
            message: s.canonical_reason().unwrap_or("request rejected").to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LIST_PAYLOAD: &str = r#"[
        {
            "number": 42,
            "title": "Add OAuth2 login flow",
            "user": {"login": "alice"},
            "created_at": "2024-01-05T10:00:00Z",
            "merged_at": "2024-01-06T10:00:00Z",
            "state": "closed",
            "labels": [{"name": "feature"}, {"name": "auth"}]
        },
        {
            "number": 43,
            "title": "Ghost PR",
            "user": null,
            "created_at": "2024-01-07T10:00:00Z",
            "merged_at": null,
            "state": "closed",
            "labels": []
        },
        {
            "title": "No number"
        }
    ]"#;

    #[test]
    fn test_decode_list_payload() {
        let items: Vec<PullListItem> = serde_json::from_str(LIST_PAYLOAD).unwrap();
        let raw: Vec<RawPullRequest> = items.into_iter().map(RawPullRequest::from).collect();

        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].number, Some(42));
        assert_eq!(raw[0].author.as_deref(), Some("alice"));
        assert_eq!(raw[0].labels, vec!["feature", "auth"]);
        assert_eq!(raw[0].merged_at.as_deref(), Some("2024-01-06T10:00:00Z"));
        assert!(raw[1].author.is_none());
        assert!(raw[1].merged_at.is_none());
        assert!(raw[2].number.is_none());
        assert!(raw[2].labels.is_empty());
    }

    #[test]
    fn test_decode_detail_payload() {
        let detail: PullDetail = serde_json::from_str(
            r#"{"number": 42, "additions": 320, "deletions": 45, "changed_files": 7, "commits": 3}"#,
        )
        .unwrap();
        assert_eq!(detail.additions, 320);
        assert_eq!(detail.deletions, 45);
        assert_eq!(detail.changed_files, 7);
        assert_eq!(detail.commits, Some(3));
    }

    #[test]
    fn test_rest_state_mapping() {
        assert_eq!(rest_state(StateFilter::Merged), "closed");
        assert_eq!(rest_state(StateFilter::Closed), "closed");
        assert_eq!(rest_state(StateFilter::Open), "open");
        assert_eq!(rest_state(StateFilter::All), "all");
    }

    #[test]
    fn test_has_next_link() {
        let mut headers = HeaderMap::new();
        assert!(!has_next_link(&headers));

        headers.insert(
            LINK,
            HeaderValue::from_static(
                r#"<https://api.github.com/repositories/1/pulls?page=2>; rel="next", <https://api.github.com/repositories/1/pulls?page=5>; rel="last""#,
            ),
        );
        assert!(has_next_link(&headers));

        headers.insert(
            LINK,
            HeaderValue::from_static(r#"<https://api.github.com/repositories/1/pulls?page=1>; rel="prev""#),
        );
        assert!(!has_next_link(&headers));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, false).is_transient());
        assert!(classify_status(StatusCode::FORBIDDEN, true).is_transient());
        assert!(!classify_status(StatusCode::FORBIDDEN, false).is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, false).is_transient());
        assert!(!classify_status(StatusCode::NOT_FOUND, false).is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, false).is_transient());
    }

    fn repo() -> RepoId {
        RepoId {
            owner: "org".to_string(),
            name: "repo".to_string(),
        }
    }

    async fn mock_get(server: &MockServer, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_list_page_query_and_merged_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/org/repo/pulls"))
            .and(query_param("state", "closed"))
            .and(query_param("sort", "created"))
            .and(query_param("direction", "desc"))
            .and(query_param("per_page", "2"))
            .and(query_param("page", "1"))
            .and(header("authorization", "Bearer secret"))
            .and(header("user-agent", "pr-stats"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(LIST_PAYLOAD)
                    .insert_header(
                        "link",
                        r#"<https://api.github.com/repositories/1/pulls?page=2>; rel="next""#,
                    ),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), "secret");
        let page = client
            .list_page(&repo(), StateFilter::Merged, 1, 2)
            .await
            .unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].number, Some(42));
        assert_eq!(page.next, Some(2));
    }

    #[tokio::test]
    async fn test_list_page_all_keeps_unmerged_and_stops_without_next() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/org/repo/pulls"))
            .and(query_param("state", "all"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LIST_PAYLOAD))
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), "secret");
        let page = client.list_page(&repo(), StateFilter::All, 3, 100).await.unwrap();
        assert_eq!(page.records.len(), 3);
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn test_empty_page_ends_listing_even_with_next_link() {
        let server = MockServer::start().await;
        mock_get(
            &server,
            "/repos/org/repo/pulls",
            ResponseTemplate::new(200)
                .set_body_string("[]")
                .insert_header("link", r#"<https://example.com/pulls?page=9>; rel="next""#),
        )
        .await;

        let client = GitHubClient::new(server.uri(), "secret");
        let page = client.list_page(&repo(), StateFilter::Open, 8, 100).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn test_error_statuses_are_classified() {
        let cases = [
            (ResponseTemplate::new(401), Some(401), false),
            (ResponseTemplate::new(404), Some(404), false),
            (ResponseTemplate::new(422), Some(422), false),
            (ResponseTemplate::new(403), Some(403), false),
            (
                ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"),
                Some(403),
                true,
            ),
            (ResponseTemplate::new(429), Some(429), true),
            (ResponseTemplate::new(502), Some(502), true),
        ];

        for (response, expected_status, transient) in cases {
            let server = MockServer::start().await;
            mock_get(&server, "/repos/org/repo/pulls", response).await;

            let client = GitHubClient::new(server.uri(), "secret");
            let err = client
                .list_page(&repo(), StateFilter::Merged, 1, 100)
                .await
                .unwrap_err();
            assert_eq!(err.is_transient(), transient, "{:?}", err);
            match err {
                PrError::Transient { status, .. } | PrError::Fatal { status, .. } => {
                    assert_eq!(status, expected_status)
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_diff_stats() {
        let server = MockServer::start().await;
        mock_get(
            &server,
            "/repos/org/repo/pulls/42",
            ResponseTemplate::new(200).set_body_string(
                r#"{"number": 42, "additions": 320, "deletions": 45, "changed_files": 7, "commits": 3}"#,
            ),
        )
        .await;

        let client = GitHubClient::new(server.uri(), "secret");
        let stats = client.fetch_diff_stats(&repo(), 42).await.unwrap();
        assert_eq!(
            stats,
            DiffStats {
                additions: 320,
                deletions: 45,
                changed_files: 7,
                commits: Some(3),
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_diff_stats_missing_field_is_decode_error() {
        let server = MockServer::start().await;
        mock_get(
            &server,
            "/repos/org/repo/pulls/7",
            ResponseTemplate::new(200).set_body_string(r#"{"number": 7, "additions": 1}"#),
        )
        .await;

        let client = GitHubClient::new(server.uri(), "secret");
        let err = client.fetch_diff_stats(&repo(), 7).await.unwrap_err();
        assert!(matches!(err, PrError::Decode(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_fetch_diff_stats_not_found() {
        let server = MockServer::start().await;
        mock_get(&server, "/repos/org/repo/pulls/7", ResponseTemplate::new(404)).await;

        let client = GitHubClient::new(server.uri(), "secret");
        let err = client.fetch_diff_stats(&repo(), 7).await.unwrap_err();
        assert!(matches!(err, PrError::Fatal { status: Some(404), .. }));
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = GitHubClient::new("https://ghe.example.com/api/v3/", "token");
        assert_eq!(client.api_url, "https://ghe.example.com/api/v3");
    }
}
