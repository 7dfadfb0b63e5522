//! GitHub issue tracker over the REST v3 API.
//!
//! One instance targets one `owner/name` repository with one token. The
//! shared `reqwest::Client` carries the per-request timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::{IssueListQuery, IssueTracker, NewIssue, TrackerIssue, TrackerIssueState};
use crate::error::TrackerError;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const USER_AGENT: &str = "triage/0.1";
const ACCEPT_HEADER: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// Page size used when a listing has no explicit limit.
const DEFAULT_PER_PAGE: u32 = 100;

#[derive(Clone)]
pub struct GitHubTracker {
    client: reqwest::Client,
    api_base: String,
    repository: String,
    token: String,
}

impl std::fmt::Debug for GitHubTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubTracker")
            .field("api_base", &self.api_base)
            .field("repository", &self.repository)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl GitHubTracker {
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        repository: &str,
        token: &str,
    ) -> Result<Self, TrackerError> {
        let valid_repo = repository
            .split_once('/')
            .is_some_and(|(owner, name)| {
                !owner.is_empty() && !name.is_empty() && !name.contains('/')
            });
        if !valid_repo {
            return Err(TrackerError::Configuration(format!(
                "repository must be 'owner/name', got '{repository}'"
            )));
        }
        if token.is_empty() {
            return Err(TrackerError::Configuration("empty tracker token".to_string()));
        }
        Url::parse(api_base)
            .map_err(|err| TrackerError::Configuration(format!("invalid api base: {err}")))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, TrackerError> {
        Url::parse(&format!("{}{}", self.api_base, path))
            .map_err(|err| TrackerError::Configuration(err.to_string()))
    }

    fn issues_path(&self) -> String {
        format!("/repos/{}/issues", self.repository)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        issue_number: Option<i64>,
    ) -> Result<Response, TrackerError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", ACCEPT_HEADER)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            if let Some(number) = issue_number {
                return Err(TrackerError::NotFound(number));
            }
        }

        let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::FORBIDDEN
                && response
                    .headers()
                    .get("X-RateLimit-Remaining")
                    .and_then(|h| h.to_str().ok())
                    == Some("0"));
        if rate_limited {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            warn!(
                repository = %self.repository,
                retry_after = ?retry_after,
                "Rate limited by GitHub API"
            );
            return Err(TrackerError::RateLimited { retry_after });
        }

        let body = response.text().await.unwrap_or_default();
        debug!(repository = %self.repository, status = status.as_u16(), "GitHub API error");
        Err(TrackerError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, TrackerError> {
        response
            .json::<T>()
            .await
            .map_err(|err| TrackerError::Malformed(err.to_string()))
    }
}

#[async_trait]
impl IssueTracker for GitHubTracker {
    async fn create_issue(&self, issue: NewIssue) -> Result<TrackerIssue, TrackerError> {
        let url = self.url(&self.issues_path())?;
        let request = self.client.post(url).json(&json!({
            "title": issue.title,
            "body": issue.body,
            "labels": issue.labels,
        }));
        let payload: GitHubIssuePayload = Self::json(self.send(request, None).await?).await?;
        payload.try_into()
    }

    async fn get_issue(&self, number: i64) -> Result<TrackerIssue, TrackerError> {
        let url = self.url(&format!("{}/{number}", self.issues_path()))?;
        let response = self.send(self.client.get(url), Some(number)).await?;
        let payload: GitHubIssuePayload = Self::json(response).await?;
        payload.try_into()
    }

    async fn update_issue_state(
        &self,
        number: i64,
        state: TrackerIssueState,
    ) -> Result<TrackerIssue, TrackerError> {
        let url = self.url(&format!("{}/{number}", self.issues_path()))?;
        let mut body = json!({ "state": state.as_str() });
        if state == TrackerIssueState::Closed {
            body["state_reason"] = json!("completed");
        }
        let response = self
            .send(self.client.patch(url).json(&body), Some(number))
            .await?;
        let payload: GitHubIssuePayload = Self::json(response).await?;
        payload.try_into()
    }

    async fn add_comment(&self, number: i64, body: &str) -> Result<(), TrackerError> {
        let url = self.url(&format!("{}/{number}/comments", self.issues_path()))?;
        self.send(
            self.client.post(url).json(&json!({ "body": body })),
            Some(number),
        )
        .await?;
        Ok(())
    }

    async fn search_issues(&self, text: &str) -> Result<Vec<TrackerIssue>, TrackerError> {
        let phrase = text.replace('"', " ");
        let mut url = self.url("/search/issues")?;
        url.query_pairs_mut()
            .append_pair(
                "q",
                &format!("\"{}\" repo:{} is:issue", phrase.trim(), self.repository),
            )
            .append_pair("per_page", &DEFAULT_PER_PAGE.to_string());

        let response = self.send(self.client.get(url), None).await?;
        let payload: SearchResponse = Self::json(response).await?;
        payload
            .items
            .into_iter()
            .filter(|item| item.pull_request.is_none())
            .map(TrackerIssue::try_from)
            .collect()
    }

    async fn list_issues(&self, query: &IssueListQuery) -> Result<Vec<TrackerIssue>, TrackerError> {
        let per_page = query.limit.unwrap_or(DEFAULT_PER_PAGE).clamp(1, 100);
        let mut url = self.url(&self.issues_path())?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair(
                    "state",
                    query.state.map(TrackerIssueState::as_str).unwrap_or("all"),
                )
                .append_pair("sort", "created")
                .append_pair("direction", "desc")
                .append_pair("per_page", &per_page.to_string());
            if !query.labels.is_empty() {
                pairs.append_pair("labels", &query.labels.join(","));
            }
            // `since` filters on update time, a superset of the creation filter.
            if let Some(since) = query.created_since {
                pairs.append_pair("since", &since.to_rfc3339());
            }
        }

        let response = self.send(self.client.get(url), None).await?;
        let payload: Vec<GitHubIssuePayload> = Self::json(response).await?;

        let mut issues = Vec::with_capacity(payload.len());
        for item in payload {
            if item.pull_request.is_some() {
                continue;
            }
            let number = item.number;
            let issue = match TrackerIssue::try_from(item) {
                Ok(issue) => issue,
                Err(err) => {
                    warn!(issue_number = number, error = %err, "Skipping unreadable issue in listing");
                    continue;
                }
            };
            if query
                .created_since
                .is_some_and(|since| issue.created_at < since)
            {
                continue;
            }
            issues.push(issue);
        }
        Ok(issues)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GitHubLabel {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GitHubIssuePayload {
    number: i64,
    html_url: String,
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<GitHubIssuePayload>,
}

impl TryFrom<GitHubIssuePayload> for TrackerIssue {
    type Error = TrackerError;

    fn try_from(payload: GitHubIssuePayload) -> Result<Self, Self::Error> {
        let state = match payload.state.as_str() {
            "open" => TrackerIssueState::Open,
            "closed" => TrackerIssueState::Closed,
            other => {
                return Err(TrackerError::Malformed(format!(
                    "unknown issue state '{other}'"
                )));
            }
        };

        Ok(TrackerIssue {
            number: payload.number,
            url: payload.html_url,
            title: payload.title,
            body: payload.body,
            state,
            labels: payload.labels.into_iter().map(|label| label.name).collect(),
            created_at: payload.created_at,
            updated_at: payload.updated_at,
            closed_at: payload.closed_at,
        })
    }
}
