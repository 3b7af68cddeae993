//! [`WorkflowControl`] over the GitHub REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{StatusCode, Url};
use runs::{
    ConfigError, DispatchError, FetchError, GitRef, ObservedRun, OwnerName, RepositoryName,
    RetryPolicy, RunConclusion, RunId, RunStatus, Timestamp, WorkflowControl, WorkflowId,
    WorkflowInputs,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::GitHubConfig;

const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";
const MEDIA_TYPE: &str = "application/vnd.github+json";

/// GitHub Actions client used by the dispatcher and the monitor.
#[derive(Debug, Clone)]
pub struct GitHubActionsClient {
    http: reqwest::Client,
    api_url: Url,
}

impl GitHubActionsClient {
    /// Builds a client with authentication and API-version headers preset.
    pub fn new(config: &GitHubConfig) -> Result<Self, ConfigError> {
        let api_url = Url::parse(&config.api_url).map_err(|e| ConfigError::Invalid {
            key: "GITHUB_API_URL".to_string(),
            message: e.to_string(),
        })?;
        if api_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                key: "GITHUB_API_URL".to_string(),
                message: format!("'{api_url}' cannot be used as a base URL"),
            });
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token)).map_err(|_| {
            ConfigError::Invalid {
                key: "GITHUB_TOKEN".to_string(),
                message: "token contains characters not allowed in a header".to_string(),
            }
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static(MEDIA_TYPE));
        headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("actions-relay/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: "GITHUB_API_URL".to_string(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, api_url })
    }

    /// `{api}/repos/{owner}/{repo}/actions/workflows/{id}/{leaf}`
    fn workflow_url(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        leaf: &str,
    ) -> Url {
        let mut url = self.api_url.clone();
        let id = workflow_id.to_string();
        // cannot_be_a_base() was rejected in new(), so segments are available.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "repos",
                owner.as_str(),
                repo.as_str(),
                "actions",
                "workflows",
                id.as_str(),
                leaf,
            ]);
        }
        url
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct DispatchBody<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    inputs: &'a WorkflowInputs,
}

#[derive(Debug, Deserialize)]
struct RunsPage {
    #[serde(default)]
    workflow_runs: Vec<RunPayload>,
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    id: u64,
    status: Option<String>,
    conclusion: Option<String>,
    run_started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl RunPayload {
    fn into_observed(self) -> ObservedRun {
        let status = match self.status.as_deref() {
            Some(raw) => RunStatus::from_platform(raw).unwrap_or_else(|| {
                debug!(run_id = self.id, status = raw, "Unknown run status, treating as queued");
                RunStatus::Queued
            }),
            None => RunStatus::Queued,
        };
        ObservedRun {
            id: RunId::new(self.id),
            status,
            conclusion: self.conclusion.as_deref().map(RunConclusion::from_platform),
            started_at: self.run_started_at.as_deref().and_then(Timestamp::parse_rfc3339),
        }
    }
}

// ---------------------------------------------------------------------------
// Port implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl WorkflowControl for GitHubActionsClient {
    #[instrument(skip(self, inputs), fields(owner = %owner, repo = %repo, workflow_id = %workflow_id, git_ref = %git_ref))]
    async fn dispatch(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        git_ref: &GitRef,
        inputs: &WorkflowInputs,
    ) -> Result<(), DispatchError> {
        let url = self.workflow_url(owner, repo, workflow_id, "dispatches");
        let body = DispatchBody {
            git_ref: git_ref.as_str(),
            inputs,
        };

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(DispatchError::Rejected {
            status: status.as_u16(),
            message: error_message(&text),
        })
    }

    #[instrument(skip(self), fields(owner = %owner, repo = %repo, workflow_id = %workflow_id))]
    async fn list_runs(
        &self,
        owner: &OwnerName,
        repo: &RepositoryName,
        workflow_id: WorkflowId,
        page_size: u8,
    ) -> Result<Vec<ObservedRun>, FetchError> {
        let url = self.workflow_url(owner, repo, workflow_id, "runs");
        let response = self
            .http
            .get(url)
            .query(&[("per_page", page_size.to_string())])
            .send()
            .await
            .map_err(|e| FetchError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry = retry_policy(status, response.headers(), chrono::Utc::now().timestamp());
            let text = response.text().await.unwrap_or_default();
            if let Some(after) = retry.min_delay() {
                warn!(status = status.as_u16(), ?after, "GitHub asked to back off");
            }
            return Err(FetchError {
                status: Some(status.as_u16()),
                message: error_message(&text),
                retry,
            });
        }

        let page: RunsPage = response.json().await.map_err(|e| FetchError {
            status: Some(status.as_u16()),
            message: format!("invalid runs payload: {e}"),
            retry: RetryPolicy::Retryable { after: None },
        })?;

        Ok(page
            .workflow_runs
            .into_iter()
            .map(RunPayload::into_observed)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extracts GitHub's `message` field, falling back to the raw body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Derives a back-off hint from a failed list-runs response.
///
/// Primary rate limits report `x-ratelimit-remaining: 0` with an epoch
/// `x-ratelimit-reset`; secondary limits send `retry-after` in seconds.
fn retry_policy(status: StatusCode, headers: &HeaderMap, now_epoch: i64) -> RetryPolicy {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
        if let Some(secs) = header("retry-after") {
            return RetryPolicy::Retryable {
                after: Some(Duration::from_secs(secs.max(0) as u64)),
            };
        }
        if header("x-ratelimit-remaining") == Some(0) {
            let wait = header("x-ratelimit-reset").map(|reset| (reset - now_epoch).max(0) as u64);
            return RetryPolicy::Retryable {
                after: wait.map(Duration::from_secs),
            };
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return RetryPolicy::Retryable { after: None };
        }
        return RetryPolicy::NonRetryable;
    }

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        RetryPolicy::Retryable { after: None }
    } else {
        RetryPolicy::NonRetryable
    }
}
