// Direct REST backend adapters
// Each logical operation maps to a specific verb/path/body against the
// target service; used as the fallback when the tool endpoint is down

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::auth::TokenRecord;

use super::adapter::{
    classify_request_error, optional_str, optional_u64, require_str, BackendAdapter,
};
use super::operation::{
    BackendCallResult, BackendFailure, ServiceKind, ToolOperation, ToolPayload,
};

/// Default page size for search operations when the payload does not say
const DEFAULT_MAX_RESULTS: u64 = 20;

/// Send a prepared request and parse the response body
///
/// Shared by both REST adapters: non-success statuses go through the shared
/// classification rule, and bodyless success responses (204 on update) come
/// back as `{"updated": true}` so callers always get a JSON payload.
async fn execute(request: reqwest::RequestBuilder) -> BackendCallResult {
    let response = request.send().await.map_err(classify_request_error)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendFailure::status(status.as_u16(), body));
    }

    if status.as_u16() == 204 {
        return Ok(json!({"updated": true}));
    }

    let text = response
        .text()
        .await
        .map_err(|e| BackendFailure::transport(e.to_string()))?;
    if text.is_empty() {
        return Ok(json!({"updated": true}));
    }

    serde_json::from_str(&text)
        .map_err(|e| BackendFailure::protocol(format!("unparseable response body: {}", e)))
}

fn join_url(base: &str, path: &str) -> Result<Url, BackendFailure> {
    let full = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    Url::parse(&full).map_err(|e| BackendFailure::protocol(format!("bad url '{}': {}", full, e)))
}

fn bearer(
    request: reqwest::RequestBuilder,
    token: Option<&TokenRecord>,
) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.header("Authorization", token.authorization_header()),
        None => request,
    }
}

/// Direct REST adapter for the issue tracker (Jira-shaped API)
pub struct TrackerRestAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl TrackerRestAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        TrackerRestAdapter {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl BackendAdapter for TrackerRestAdapter {
    fn id(&self) -> &str {
        "tracker-rest"
    }

    async fn invoke(
        &self,
        operation: ToolOperation,
        payload: &ToolPayload,
        token: Option<&TokenRecord>,
    ) -> BackendCallResult {
        if operation.service() != ServiceKind::IssueTracker {
            return Err(BackendFailure::protocol(format!(
                "tracker adapter cannot service {}",
                operation
            )));
        }

        debug!(adapter = self.id(), operation = %operation, "rest request");

        let request = match operation {
            ToolOperation::SearchIssues => {
                let query = require_str(payload, "query")?;
                let max_results =
                    optional_u64(payload, "max_results").unwrap_or(DEFAULT_MAX_RESULTS);
                let mut url = join_url(&self.base_url, "rest/api/2/search")?;
                url.query_pairs_mut()
                    .append_pair("jql", query)
                    .append_pair("maxResults", &max_results.to_string());
                self.client.get(url)
            }
            ToolOperation::GetIssue => {
                let id = require_str(payload, "id")?;
                let path = format!("rest/api/2/issue/{}", urlencoding::encode(id));
                let mut url = join_url(&self.base_url, &path)?;
                if optional_str(payload, "expand").is_some() {
                    url.query_pairs_mut()
                        .append_pair("expand", payload["expand"].as_str().unwrap_or_default());
                }
                self.client.get(url)
            }
            ToolOperation::CreateIssue => {
                let project = require_str(payload, "project")?;
                let summary = require_str(payload, "summary")?;
                let description = optional_str(payload, "description").unwrap_or_default();
                let issue_type = optional_str(payload, "type").unwrap_or("Task");
                let url = join_url(&self.base_url, "rest/api/2/issue")?;
                self.client.post(url).json(&json!({
                    "fields": {
                        "project": {"key": project},
                        "summary": summary,
                        "description": description,
                        "issuetype": {"name": issue_type},
                    }
                }))
            }
            ToolOperation::UpdateIssue => {
                let id = require_str(payload, "id")?;
                let fields = payload
                    .get("fields")
                    .cloned()
                    .ok_or_else(|| BackendFailure::protocol("missing argument 'fields'"))?;
                let path = format!("rest/api/2/issue/{}", urlencoding::encode(id));
                let url = join_url(&self.base_url, &path)?;
                self.client.put(url).json(&json!({"fields": fields}))
            }
            ToolOperation::AddComment => {
                let id = require_str(payload, "id")?;
                let body = require_str(payload, "body")?;
                let path = format!("rest/api/2/issue/{}/comment", urlencoding::encode(id));
                let url = join_url(&self.base_url, &path)?;
                self.client.post(url).json(&json!({"body": body}))
            }
            _ => unreachable!("service check above"),
        };

        execute(bearer(request.timeout(self.timeout), token)).await
    }
}

/// Direct REST adapter for the code host (GitHub-shaped API)
pub struct CodeHostRestAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CodeHostRestAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        CodeHostRestAdapter {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl BackendAdapter for CodeHostRestAdapter {
    fn id(&self) -> &str {
        "codehost-rest"
    }

    async fn invoke(
        &self,
        operation: ToolOperation,
        payload: &ToolPayload,
        token: Option<&TokenRecord>,
    ) -> BackendCallResult {
        if operation.service() != ServiceKind::CodeHost {
            return Err(BackendFailure::protocol(format!(
                "code host adapter cannot service {}",
                operation
            )));
        }

        debug!(adapter = self.id(), operation = %operation, "rest request");

        let request = match operation {
            ToolOperation::ListCommits => {
                let owner = require_str(payload, "owner")?;
                let repo = require_str(payload, "repo")?;
                let path = format!("repos/{}/{}/commits", owner, repo);
                let mut url = join_url(&self.base_url, &path)?;
                if let Some(since) = optional_str(payload, "since") {
                    url.query_pairs_mut().append_pair("since", since);
                }
                if let Some(until) = optional_str(payload, "until") {
                    url.query_pairs_mut().append_pair("until", until);
                }
                self.client.get(url)
            }
            ToolOperation::GetFileContents => {
                let owner = require_str(payload, "owner")?;
                let repo = require_str(payload, "repo")?;
                let file_path = require_str(payload, "path")?;
                let path = format!("repos/{}/{}/contents/{}", owner, repo, file_path);
                self.client.get(join_url(&self.base_url, &path)?)
            }
            ToolOperation::SearchRepositories => {
                let query = require_str(payload, "query")?;
                let mut url = join_url(&self.base_url, "search/repositories")?;
                url.query_pairs_mut().append_pair("q", query);
                self.client.get(url)
            }
            _ => unreachable!("service check above"),
        };

        let request = request
            .timeout(self.timeout)
            .header("Accept", "application/vnd.github+json");
        execute(bearer(request, token)).await
    }
}
