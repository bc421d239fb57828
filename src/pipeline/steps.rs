// The nine investigation steps
//
// Each step reads prior attributes, performs its gateway and reasoning
// calls, and returns the JSON value the executor stores under the step's
// name. Steps hold no state of their own.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::gateway::{ToolOperation, ToolPayload};
use crate::models::{StepDescriptor, WorkflowState};
use crate::{InvestigationError, Result};

use super::context::{BoundStep, Step, StepContext, TargetStep};

/// Most log lines carried into the evidence bundle
const MAX_LOG_LINES: usize = 50;

/// Build a tool payload from key/value pairs
fn payload(pairs: &[(&str, Value)]) -> ToolPayload {
    let mut map = ToolPayload::new();
    for (key, value) in pairs {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

/// Split an `owner/repo` target into its halves
fn split_repo(target: &str) -> Result<(&str, &str)> {
    target.split_once('/').ok_or_else(|| {
        InvestigationError::Internal(format!("malformed repository target '{}'", target))
    })
}

/// String list under `key` in a step attribute, empty when absent
fn string_list(state: &WorkflowState, step: &str, key: &str) -> Vec<String> {
    state
        .attribute(step)
        .and_then(|v| v.get(key))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Repository targets resolved for the fan-out steps
fn repository_targets(state: &WorkflowState) -> Vec<String> {
    string_list(state, "identify_repositories", "repositories")
}

/// Fetch the incident ticket and parse it into structured fields
///
/// The ticket fetch is load-bearing; the reasoning pass that classifies
/// severity and implicated services is not - unparseable output falls back
/// to `"unknown"` severity and an empty service list.
pub struct ParseTicket;

#[async_trait]
impl Step for ParseTicket {
    async fn run(&self, ctx: &StepContext, state: &WorkflowState) -> Result<Value> {
        let issue = ctx
            .call_tool(
                ToolOperation::GetIssue,
                payload(&[
                    ("id", json!(state.incident_id)),
                    ("expand", json!("comments")),
                ]),
            )
            .await?;

        let title = issue
            .get("fields")
            .and_then(|f| f.get("summary"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let description = issue
            .get("fields")
            .and_then(|f| f.get("description"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let comments: Vec<String> = issue
            .get("fields")
            .and_then(|f| f.get("comment"))
            .and_then(|c| c.get("comments"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| c.get("body").and_then(Value::as_str).map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let prompt = format!(
            "Classify this incident ticket. Respond with JSON containing \
             \"severity\" (one of low, medium, high, critical, unknown) and \
             \"services\" (array of implicated service names).\n\n\
             Title: {}\nDescription: {}",
            title, description
        );
        let classified = ctx
            .reason_structured(&prompt, json!({"severity": "unknown", "services": []}))
            .await?;

        let severity = classified
            .get("severity")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let services = classified
            .get("services")
            .cloned()
            .filter(Value::is_array)
            .unwrap_or_else(|| json!([]));

        info!(incident = %state.incident_id, severity = %severity, "ticket parsed");
        Ok(json!({
            "title": title,
            "description": description,
            "comments": comments,
            "severity": severity,
            "services": services,
        }))
    }
}

/// Identify the repositories implicated by the incident
///
/// Searches the code host for candidates, then asks the reasoning engine to
/// keep only the relevant ones. When the selection cannot be parsed, all
/// candidates are kept rather than dropping to nothing.
pub struct IdentifyRepositories;

#[async_trait]
impl Step for IdentifyRepositories {
    async fn run(&self, ctx: &StepContext, state: &WorkflowState) -> Result<Value> {
        let parsed = state
            .attribute("parse_ticket")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let services = string_list(state, "parse_ticket", "services");
        let title = parsed
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let query = if services.is_empty() {
            title.to_string()
        } else {
            services.join(" ")
        };

        let search = ctx
            .call_tool(
                ToolOperation::SearchRepositories,
                payload(&[("query", json!(query))]),
            )
            .await?;

        let candidates: Vec<String> = search
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|r| r.get("full_name").and_then(Value::as_str).map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        if candidates.is_empty() {
            info!(incident = %state.incident_id, "no candidate repositories found");
            return Ok(json!({"repositories": []}));
        }

        let prompt = format!(
            "An incident titled {:?} implicates services {:?}. From these \
             candidate repositories, select the ones most likely involved. \
             Respond with JSON: {{\"repositories\": [\"owner/repo\", ...]}}.\n\
             Candidates: {:?}",
            title, services, candidates
        );
        let selected = ctx
            .reason_structured(&prompt, json!({"repositories": candidates.clone()}))
            .await?;

        let mut repositories: Vec<String> = selected
            .get("repositories")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .filter(|name| candidates.iter().any(|c| c == name))
                    .collect()
            })
            .unwrap_or_default();
        if repositories.is_empty() {
            repositories = candidates;
        }

        info!(
            incident = %state.incident_id,
            repositories = repositories.len(),
            "repositories identified"
        );
        Ok(json!({"repositories": repositories}))
    }
}

/// Discover candidate source paths in one repository
pub struct DiscoverPaths;

#[async_trait]
impl TargetStep for DiscoverPaths {
    async fn run_target(
        &self,
        ctx: &StepContext,
        _state: &WorkflowState,
        target: &str,
    ) -> Result<Value> {
        let (owner, repo) = split_repo(target)?;

        let listing = ctx
            .call_tool(
                ToolOperation::GetFileContents,
                payload(&[
                    ("owner", json!(owner)),
                    ("repo", json!(repo)),
                    ("path", json!("")),
                ]),
            )
            .await?;

        // A directory listing is an array of entries; a single file comes
        // back as an object with a `path`
        let paths: Vec<String> = match &listing {
            Value::Array(entries) => entries
                .iter()
                .filter_map(|e| e.get("path").and_then(Value::as_str).map(String::from))
                .collect(),
            other => other
                .get("path")
                .and_then(Value::as_str)
                .map(|p| vec![p.to_string()])
                .unwrap_or_default(),
        };

        debug!(repository = %target, paths = paths.len(), "paths discovered");
        Ok(json!({"paths": paths}))
    }
}

/// Mine log evidence out of the ticket text
///
/// Incident tickets routinely carry pasted stack traces and log excerpts;
/// this step pulls the lines that look like log output so the analysis
/// steps see evidence instead of prose.
pub struct GatherLogs;

const LOG_MARKERS: &[&str] = &["ERROR", "WARN", "FATAL", "Exception", "Traceback", "panic"];

#[async_trait]
impl Step for GatherLogs {
    async fn run(&self, _ctx: &StepContext, state: &WorkflowState) -> Result<Value> {
        let parsed = state
            .attribute("parse_ticket")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let mut corpus = String::new();
        if let Some(description) = parsed.get("description").and_then(Value::as_str) {
            corpus.push_str(description);
            corpus.push('\n');
        }
        if let Some(comments) = parsed.get("comments").and_then(Value::as_array) {
            for comment in comments {
                if let Some(body) = comment.as_str() {
                    corpus.push_str(body);
                    corpus.push('\n');
                }
            }
        }

        let logs: Vec<String> = corpus
            .lines()
            .filter(|line| LOG_MARKERS.iter().any(|marker| line.contains(marker)))
            .map(|line| line.trim().to_string())
            .take(MAX_LOG_LINES)
            .collect();

        info!(incident = %state.incident_id, lines = logs.len(), "log evidence gathered");
        Ok(json!({"logs": logs}))
    }
}

/// List recent commits for one repository
pub struct GatherCommits;

#[async_trait]
impl TargetStep for GatherCommits {
    async fn run_target(
        &self,
        ctx: &StepContext,
        _state: &WorkflowState,
        target: &str,
    ) -> Result<Value> {
        let (owner, repo) = split_repo(target)?;
        let until = Utc::now();
        let since = until - ChronoDuration::days(ctx.config.commit_lookback_days);

        let listing = ctx
            .call_tool(
                ToolOperation::ListCommits,
                payload(&[
                    ("owner", json!(owner)),
                    ("repo", json!(repo)),
                    ("since", json!(since.to_rfc3339())),
                    ("until", json!(until.to_rfc3339())),
                ]),
            )
            .await?;

        let commits: Vec<Value> = listing
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| {
                        json!({
                            "sha": entry.get("sha").cloned().unwrap_or(Value::Null),
                            "message": entry
                                .pointer("/commit/message")
                                .cloned()
                                .unwrap_or(Value::Null),
                            "author": entry
                                .pointer("/commit/author/name")
                                .cloned()
                                .unwrap_or(Value::Null),
                            "date": entry
                                .pointer("/commit/author/date")
                                .cloned()
                                .unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        debug!(repository = %target, commits = commits.len(), "commits gathered");
        Ok(json!({"commits": commits}))
    }
}

/// Correlate recent commits with the gathered log evidence
pub struct AnalyzeCommits;

#[async_trait]
impl Step for AnalyzeCommits {
    async fn run(&self, ctx: &StepContext, state: &WorkflowState) -> Result<Value> {
        let commits = state
            .attribute("gather_commits")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let logs = state
            .attribute("gather_logs")
            .cloned()
            .unwrap_or_else(|| json!({"logs": []}));

        let prompt = format!(
            "Correlate these recent commits with the incident's log evidence \
             and identify the commits most likely related to the failure. \
             Respond with JSON: {{\"findings\": [{{\"repository\": \"...\", \
             \"sha\": \"...\", \"reason\": \"...\"}}]}}.\n\n\
             Commits by repository: {}\n\nLog evidence: {}",
            commits, logs
        );
        let analysis = ctx
            .reason_structured(&prompt, json!({"findings": []}))
            .await?;

        let findings = analysis
            .get("findings")
            .cloned()
            .filter(Value::is_array)
            .unwrap_or_else(|| json!([]));

        info!(
            incident = %state.incident_id,
            findings = findings.as_array().map_or(0, Vec::len),
            "commit analysis complete"
        );
        Ok(json!({"findings": findings}))
    }
}

/// Produce the root-cause record
///
/// Mandatory: a failure here fails the run. Unparseable reasoning output
/// still resolves to the documented low-confidence record so the ticket
/// write-back has something honest to report.
pub struct SummarizeRca;

#[async_trait]
impl Step for SummarizeRca {
    async fn run(&self, ctx: &StepContext, state: &WorkflowState) -> Result<Value> {
        let parsed = state
            .attribute("parse_ticket")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let findings = state
            .attribute("analyze_commits")
            .cloned()
            .unwrap_or_else(|| json!({"findings": []}));
        let logs = state
            .attribute("gather_logs")
            .cloned()
            .unwrap_or_else(|| json!({"logs": []}));

        let prompt = format!(
            "Write a root-cause analysis for this incident. Respond with \
             JSON: {{\"summary\": \"...\", \"confidence\": 0.0-1.0, \
             \"contributing_factors\": [\"...\"]}}.\n\n\
             Ticket: {}\nSuspect commits: {}\nLog evidence: {}",
            parsed, findings, logs
        );
        let rca = ctx
            .reason_structured(
                &prompt,
                json!({
                    "summary": "Root cause undetermined; insufficient evidence.",
                    "confidence": 0.0,
                    "contributing_factors": [],
                }),
            )
            .await?;

        info!(incident = %state.incident_id, "root-cause record produced");
        Ok(rca)
    }
}

/// Turn the root-cause record into concrete action items
///
/// Mandatory. An empty or unparseable item list degrades to a single
/// generic triage item; the run never finishes with zero recommendations.
pub struct SummarizeActions;

fn default_actions() -> Value {
    json!({
        "action_items": [{
            "description": "Manually triage this incident; automated analysis was inconclusive.",
            "priority": "high",
        }]
    })
}

#[async_trait]
impl Step for SummarizeActions {
    async fn run(&self, ctx: &StepContext, state: &WorkflowState) -> Result<Value> {
        let rca = state
            .attribute("summarize_rca")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let prompt = format!(
            "Given this root-cause analysis, list the follow-up action items. \
             Respond with JSON: {{\"action_items\": [{{\"description\": \
             \"...\", \"priority\": \"low|medium|high\"}}]}}.\n\nRCA: {}",
            rca
        );
        let summarized = ctx.reason_structured(&prompt, default_actions()).await?;

        let items = summarized
            .get("action_items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if items.is_empty() {
            warn!(incident = %state.incident_id, "no action items produced, substituting triage item");
            return Ok(default_actions());
        }

        info!(incident = %state.incident_id, items = items.len(), "action items summarized");
        Ok(json!({"action_items": items}))
    }
}

/// Write the investigation results back to the tracker
///
/// Mandatory and last. Posting the report comment is the load-bearing
/// write; the field update afterwards is best-effort.
pub struct UpdateTicket;

impl UpdateTicket {
    fn render_report(state: &WorkflowState) -> String {
        let rca = state
            .attribute("summarize_rca")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let actions = state
            .attribute("summarize_actions")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let findings = state
            .attribute("analyze_commits")
            .and_then(|v| v.get("findings"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut report = String::from("h2. Automated Investigation Report\n\n");

        report.push_str("h3. Root Cause\n");
        report.push_str(rca.get("summary").and_then(Value::as_str).unwrap_or(
            "Root cause undetermined; insufficient evidence.",
        ));
        report.push('\n');
        if let Some(confidence) = rca.get("confidence").and_then(Value::as_f64) {
            report.push_str(&format!("Confidence: {:.0}%\n", confidence * 100.0));
        }
        if let Some(factors) = rca.get("contributing_factors").and_then(Value::as_array) {
            if !factors.is_empty() {
                report.push_str("\nh3. Contributing Factors\n");
                for factor in factors {
                    if let Some(text) = factor.as_str() {
                        report.push_str(&format!("* {}\n", text));
                    }
                }
            }
        }

        if !findings.is_empty() {
            report.push_str("\nh3. Suspect Commits\n");
            for finding in &findings {
                let sha = finding.get("sha").and_then(Value::as_str).unwrap_or("?");
                let repository = finding
                    .get("repository")
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                let reason = finding.get("reason").and_then(Value::as_str).unwrap_or("");
                report.push_str(&format!("* {} @ {}: {}\n", repository, sha, reason));
            }
        }

        report.push_str("\nh3. Action Items\n");
        if let Some(items) = actions.get("action_items").and_then(Value::as_array) {
            for item in items {
                let description = item
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                let priority = item.get("priority").and_then(Value::as_str).unwrap_or("medium");
                report.push_str(&format!("* ({}) {}\n", priority, description));
            }
        }

        report
    }
}

#[async_trait]
impl Step for UpdateTicket {
    async fn run(&self, ctx: &StepContext, state: &WorkflowState) -> Result<Value> {
        let report = Self::render_report(state);

        let comment = ctx
            .call_tool(
                ToolOperation::AddComment,
                payload(&[
                    ("id", json!(state.incident_id)),
                    ("body", json!(report)),
                ]),
            )
            .await?;

        // Label update is best-effort; a rejected field edit must not undo
        // the successfully posted report
        let fields_updated = match ctx
            .call_tool(
                ToolOperation::UpdateIssue,
                payload(&[
                    ("id", json!(state.incident_id)),
                    ("fields", json!({"labels": ["auto-rca"]})),
                ]),
            )
            .await
        {
            Ok(_) => true,
            Err(error) => {
                warn!(incident = %state.incident_id, "ticket field update failed: {}", error);
                false
            }
        };

        info!(incident = %state.incident_id, fields_updated, "ticket updated");
        Ok(json!({"comment": comment, "fields_updated": fields_updated}))
    }
}

/// The full investigation pipeline, in execution order
pub fn investigation_pipeline() -> Vec<BoundStep> {
    vec![
        BoundStep::sequential(
            StepDescriptor::sequential("parse_ticket", &[]),
            Arc::new(ParseTicket),
        ),
        BoundStep::sequential(
            StepDescriptor::sequential("identify_repositories", &["parse_ticket"]),
            Arc::new(IdentifyRepositories),
        ),
        BoundStep::fan_out(
            StepDescriptor::fan_out(
                "discover_paths",
                &["identify_repositories"],
                repository_targets,
            ),
            Arc::new(DiscoverPaths),
        ),
        BoundStep::sequential(
            StepDescriptor::sequential("gather_logs", &["parse_ticket"]),
            Arc::new(GatherLogs),
        ),
        BoundStep::fan_out(
            StepDescriptor::fan_out(
                "gather_commits",
                &["identify_repositories"],
                repository_targets,
            ),
            Arc::new(GatherCommits),
        ),
        BoundStep::sequential(
            StepDescriptor::sequential("analyze_commits", &["gather_commits"]),
            Arc::new(AnalyzeCommits),
        ),
        BoundStep::sequential(
            StepDescriptor::sequential("summarize_rca", &["parse_ticket"]),
            Arc::new(SummarizeRca),
        ),
        BoundStep::sequential(
            StepDescriptor::sequential("summarize_actions", &["summarize_rca"]),
            Arc::new(SummarizeActions),
        ),
        BoundStep::sequential(
            StepDescriptor::sequential("update_ticket", &["summarize_rca", "summarize_actions"]),
            Arc::new(UpdateTicket),
        ),
    ]
}
