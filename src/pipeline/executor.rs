// Workflow executor
//
// Drives the fixed step list against one WorkflowState. Steps are isolated:
// a failure is recorded and the pipeline moves on, so every run ends with
// the most complete record the backends allowed. Only a wiring defect or a
// failed mandatory tail step turns the whole run into a failure.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::models::{InvestigationStatus, StepKind, WorkflowState};
use crate::{InvestigationError, Result};

use super::context::{BoundStep, StepContext, StepHandler};
use super::fanout::FanoutCoordinator;
use super::steps::investigation_pipeline;

/// The steps whose failure fails the run
const MANDATORY_STEPS: &[&str] = &["summarize_rca", "summarize_actions", "update_ticket"];

/// Runs the investigation pipeline over one incident
pub struct WorkflowExecutor {
    steps: Vec<BoundStep>,
    ctx: Arc<StepContext>,
    fanout: FanoutCoordinator,
}

impl WorkflowExecutor {
    /// Executor over the standard nine-step pipeline
    pub fn new(ctx: Arc<StepContext>) -> Self {
        let fanout = FanoutCoordinator::new(ctx.config.fanout_timeout);
        WorkflowExecutor {
            steps: investigation_pipeline(),
            ctx,
            fanout,
        }
    }

    /// Executor over a custom step list
    pub fn with_steps(ctx: Arc<StepContext>, steps: Vec<BoundStep>) -> Self {
        let fanout = FanoutCoordinator::new(ctx.config.fanout_timeout);
        WorkflowExecutor { steps, ctx, fanout }
    }

    /// Run the pipeline for one incident and return the final state
    pub async fn run_investigation(&self, incident_id: &str) -> WorkflowState {
        let mut state = WorkflowState::new(incident_id);
        let mut wiring_defect = false;
        info!(incident = %incident_id, run = %state.run_id, "investigation started");

        for step in &self.steps {
            let name = step.descriptor.name.as_str();

            if self.ctx.cancel.is_cancelled() {
                warn!(step = name, "run cancelled before step");
                state.record_failure(name);
                break;
            }

            if let Some(attribute) = step.descriptor.missing_input(&state) {
                state.record_failure(name);
                if state.step_failed(attribute) {
                    // Upstream failed legitimately; this is a cascade, not
                    // a mis-wired pipeline
                    warn!(step = name, "step skipped: upstream '{}' failed", attribute);
                } else {
                    let defect = InvestigationError::MissingInput {
                        step: name.to_string(),
                        attribute: attribute.to_string(),
                    };
                    error!(step = name, "step skipped: {}", defect);
                    wiring_defect = true;
                }
                continue;
            }

            match self.run_step(step, &state).await {
                Ok(output) => {
                    state.record_success(name, output);
                    state.status = step_status(name).unwrap_or(state.status);
                    info!(step = name, status = %state.status, "step completed");
                }
                Err(InvestigationError::Cancelled) => {
                    warn!(step = name, "run cancelled during step");
                    state.record_failure(name);
                    break;
                }
                Err(error) => {
                    warn!(step = name, "step failed: {}", error);
                    state.record_failure(name);
                }
            }
        }

        let mandatory_failed = MANDATORY_STEPS.iter().any(|s| state.step_failed(s));
        if wiring_defect || mandatory_failed {
            state.status = InvestigationStatus::Failed;
        }

        info!(
            incident = %incident_id,
            run = %state.run_id,
            status = %state.status,
            completed = state.completed_steps.len(),
            failed = state.failed_steps.len(),
            "investigation finished"
        );
        state
    }

    /// Run one step, sequential or fan-out, and produce its output value
    async fn run_step(&self, step: &BoundStep, state: &WorkflowState) -> Result<serde_json::Value> {
        match (&step.handler, &step.descriptor.kind) {
            (StepHandler::Sequential(handler), _) => handler.run(&self.ctx, state).await,
            (StepHandler::FanOut(handler), StepKind::FanOut { resolver }) => {
                let targets = resolver(state);
                let merged = self
                    .fanout
                    .run_parallel(self.ctx.clone(), state, handler.clone(), targets)
                    .await;

                // The step fails only when every target failed; a partial
                // result is still a result
                if !merged.is_empty() && merged.values().all(|o| !o.is_success()) {
                    return Err(InvestigationError::Internal(format!(
                        "all {} fan-out targets of '{}' failed",
                        merged.len(),
                        step.descriptor.name
                    )));
                }
                Ok(serde_json::to_value(merged)?)
            }
            (StepHandler::FanOut(_), StepKind::Sequential) => {
                Err(InvestigationError::Internal(format!(
                    "step '{}' bound as fan-out but declared sequential",
                    step.descriptor.name
                )))
            }
        }
    }
}

/// Pipeline position reached after a step completes
fn step_status(step: &str) -> Option<InvestigationStatus> {
    match step {
        "parse_ticket" => Some(InvestigationStatus::Parsing),
        "identify_repositories" => Some(InvestigationStatus::RepoIdentified),
        "discover_paths" => Some(InvestigationStatus::PathDiscovered),
        "gather_logs" | "gather_commits" | "analyze_commits" => {
            Some(InvestigationStatus::Analyzing)
        }
        "summarize_rca" => Some(InvestigationStatus::RCAComplete),
        "summarize_actions" => Some(InvestigationStatus::ActionsSummarized),
        "update_ticket" => Some(InvestigationStatus::TicketUpdated),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    use crate::config::PilotConfig;
    use crate::gateway::dispatch::tests::{Script, ScriptedAdapter};
    use crate::gateway::{BackendFailure, ToolGateway, ToolOperation};
    use crate::models::StepDescriptor;
    use crate::pipeline::context::Step;
    use crate::pipeline::reasoning::tests::CannedReasoning;

    fn issue_fixture() -> Value {
        json!({
            "key": "IR-1",
            "fields": {
                "summary": "Checkout API returning 500s",
                "description": "Spike started 14:02.\nERROR db pool exhausted\nERROR timeout acquiring connection",
                "comment": {
                    "comments": [
                        {"body": "WARN retry budget exhausted in payments"},
                        {"body": "Possibly related to this afternoon's deploy"}
                    ]
                }
            }
        })
    }

    fn commits_fixture() -> Value {
        json!([
            {
                "sha": "abc123",
                "commit": {
                    "message": "Lower db pool size to 5",
                    "author": {"name": "dev", "date": "2026-08-20T13:58:00Z"}
                }
            },
            {
                "sha": "def456",
                "commit": {
                    "message": "Bump payments client",
                    "author": {"name": "dev", "date": "2026-08-20T12:11:00Z"}
                }
            }
        ])
    }

    /// Gateway with every tracker and code-host operation scripted to succeed
    fn happy_gateway() -> ToolGateway {
        let mut gateway = ToolGateway::new(Duration::from_secs(1));
        gateway.register(
            ToolOperation::GetIssue,
            ScriptedAdapter::new("tracker", Script::Succeed(issue_fixture())),
        );
        gateway.register(
            ToolOperation::SearchRepositories,
            ScriptedAdapter::new(
                "codehost",
                Script::Succeed(json!({"items": [{"full_name": "acme/api"}]})),
            ),
        );
        gateway.register(
            ToolOperation::GetFileContents,
            ScriptedAdapter::new(
                "codehost",
                Script::Succeed(json!([{"path": "src"}, {"path": "Cargo.toml"}])),
            ),
        );
        gateway.register(
            ToolOperation::ListCommits,
            ScriptedAdapter::new("codehost", Script::Succeed(commits_fixture())),
        );
        gateway.register(
            ToolOperation::AddComment,
            ScriptedAdapter::new("tracker", Script::Succeed(json!({"id": "10001"}))),
        );
        gateway.register(
            ToolOperation::UpdateIssue,
            ScriptedAdapter::new("tracker", Script::Succeed(json!({"updated": true}))),
        );
        gateway
    }

    fn happy_reasoning() -> CannedReasoning {
        CannedReasoning::new("not json at all")
            .answer(
                "Classify this incident",
                r#"{"severity": "high", "services": ["checkout", "payments"]}"#,
            )
            .answer(
                "candidate repositories",
                r#"{"repositories": ["acme/api"]}"#,
            )
            .answer(
                "Correlate these recent commits",
                r#"{"findings": [{"repository": "acme/api", "sha": "abc123", "reason": "pool size lowered just before the spike"}]}"#,
            )
            .answer(
                "root-cause analysis for this incident",
                r#"{"summary": "DB pool shrunk below load", "confidence": 0.85, "contributing_factors": ["pool size lowered"]}"#,
            )
            .answer(
                "follow-up action items",
                r#"{"action_items": [{"description": "Revert pool size change", "priority": "high"}]}"#,
            )
    }

    fn ctx_with(gateway: ToolGateway, reasoning: CannedReasoning) -> Arc<StepContext> {
        Arc::new(StepContext::new(
            Arc::new(gateway),
            Arc::new(reasoning),
            PilotConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_full_run_reaches_ticket_updated() {
        let executor = WorkflowExecutor::new(ctx_with(happy_gateway(), happy_reasoning()));
        let state = executor.run_investigation("IR-1").await;

        assert_eq!(state.status, InvestigationStatus::TicketUpdated);
        assert!(state.failed_steps.is_empty());
        assert_eq!(
            state.completed_steps,
            vec![
                "parse_ticket",
                "identify_repositories",
                "discover_paths",
                "gather_logs",
                "gather_commits",
                "analyze_commits",
                "summarize_rca",
                "summarize_actions",
                "update_ticket",
            ]
        );

        // Spot-check the accumulated record
        assert_eq!(state.attributes["parse_ticket"]["severity"], "high");
        assert_eq!(
            state.attributes["identify_repositories"]["repositories"],
            json!(["acme/api"])
        );
        assert_eq!(
            state.attributes["gather_commits"]["acme/api"]["outcome"],
            "success"
        );
        assert_eq!(
            state.attributes["gather_commits"]["acme/api"]["value"]["commits"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert_eq!(state.attributes["summarize_rca"]["confidence"], 0.85);
        assert!(!state.attributes["summarize_actions"]["action_items"]
            .as_array()
            .unwrap()
            .is_empty());
        assert_eq!(state.attributes["update_ticket"]["fields_updated"], true);
    }

    #[tokio::test]
    async fn test_failed_optional_step_does_not_fail_the_run() {
        // Commit listing is down; analysis degrades but the run completes
        let mut gateway = ToolGateway::new(Duration::from_secs(1));
        gateway.register(
            ToolOperation::GetIssue,
            ScriptedAdapter::new("tracker", Script::Succeed(issue_fixture())),
        );
        gateway.register(
            ToolOperation::SearchRepositories,
            ScriptedAdapter::new(
                "codehost",
                Script::Succeed(json!({"items": [{"full_name": "acme/api"}]})),
            ),
        );
        gateway.register(
            ToolOperation::GetFileContents,
            ScriptedAdapter::new("codehost", Script::Succeed(json!([{"path": "src"}]))),
        );
        gateway.register(
            ToolOperation::ListCommits,
            ScriptedAdapter::new(
                "codehost",
                Script::Fail(BackendFailure::status(400, "bad since parameter")),
            ),
        );
        gateway.register(
            ToolOperation::AddComment,
            ScriptedAdapter::new("tracker", Script::Succeed(json!({"id": "10001"}))),
        );
        gateway.register(
            ToolOperation::UpdateIssue,
            ScriptedAdapter::new("tracker", Script::Succeed(json!({"updated": true}))),
        );

        let executor = WorkflowExecutor::new(ctx_with(gateway, happy_reasoning()));
        let state = executor.run_investigation("IR-1").await;

        // Every gather_commits target hit the non-retriable error, so the
        // step failed and analyze_commits was skipped as a cascade. The
        // mandatory tail still completed, so the run succeeds.
        assert!(state.step_failed("gather_commits"));
        assert!(state.step_failed("analyze_commits"));
        assert!(state.step_completed("summarize_rca"));
        assert!(state.step_completed("update_ticket"));
        assert_eq!(state.status, InvestigationStatus::TicketUpdated);
    }

    #[tokio::test]
    async fn test_mandatory_tail_failure_fails_the_run() {
        let mut gateway = ToolGateway::new(Duration::from_secs(1));
        gateway.register(
            ToolOperation::GetIssue,
            ScriptedAdapter::new("tracker", Script::Succeed(issue_fixture())),
        );
        gateway.register(
            ToolOperation::SearchRepositories,
            ScriptedAdapter::new("codehost", Script::Succeed(json!({"items": []}))),
        );
        gateway.register(
            ToolOperation::GetFileContents,
            ScriptedAdapter::new("codehost", Script::Succeed(json!([]))),
        );
        gateway.register(
            ToolOperation::ListCommits,
            ScriptedAdapter::new("codehost", Script::Succeed(json!([]))),
        );
        // Posting the report is rejected outright
        gateway.register(
            ToolOperation::AddComment,
            ScriptedAdapter::new(
                "tracker",
                Script::Fail(BackendFailure::status(403, "forbidden")),
            ),
        );
        gateway.register(
            ToolOperation::UpdateIssue,
            ScriptedAdapter::new("tracker", Script::Succeed(json!({"updated": true}))),
        );

        let executor = WorkflowExecutor::new(ctx_with(gateway, happy_reasoning()));
        let state = executor.run_investigation("IR-1").await;

        assert!(state.step_failed("update_ticket"));
        assert_eq!(state.status, InvestigationStatus::Failed);
        // Earlier results are preserved even though the run failed
        assert!(state.has_attribute("summarize_rca"));
    }

    #[tokio::test]
    async fn test_unparseable_reasoning_degrades_to_defaults() {
        // Every reasoning call returns prose; documented defaults flow through
        let executor = WorkflowExecutor::new(ctx_with(
            happy_gateway(),
            CannedReasoning::new("I could not come to a conclusion, sorry."),
        ));
        let state = executor.run_investigation("IR-1").await;

        assert_eq!(state.status, InvestigationStatus::TicketUpdated);
        assert_eq!(state.attributes["parse_ticket"]["severity"], "unknown");
        assert_eq!(
            state.attributes["summarize_rca"]["summary"],
            "Root cause undetermined; insufficient evidence."
        );
        let items = state.attributes["summarize_actions"]["action_items"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(items.len(), 1);
        assert!(items[0]["description"]
            .as_str()
            .unwrap()
            .contains("Manually triage"));
    }

    #[tokio::test]
    async fn test_missing_input_is_a_wiring_defect() {
        struct Produces(Value);

        #[async_trait]
        impl Step for Produces {
            async fn run(&self, _ctx: &StepContext, _state: &WorkflowState) -> crate::Result<Value> {
                Ok(self.0.clone())
            }
        }

        // Second step requires an attribute nothing produces
        let steps = vec![
            BoundStep::sequential(
                StepDescriptor::sequential("first", &[]),
                Arc::new(Produces(json!({"ok": true}))),
            ),
            BoundStep::sequential(
                StepDescriptor::sequential("second", &["never_written"]),
                Arc::new(Produces(json!({}))),
            ),
        ];

        let ctx = ctx_with(happy_gateway(), happy_reasoning());
        let executor = WorkflowExecutor::with_steps(ctx, steps);
        let state = executor.run_investigation("IR-1").await;

        assert!(state.step_completed("first"));
        assert!(state.step_failed("second"));
        assert_eq!(state.status, InvestigationStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_pipeline() {
        struct SlowStep;

        #[async_trait]
        impl Step for SlowStep {
            async fn run(&self, ctx: &StepContext, _state: &WorkflowState) -> crate::Result<Value> {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(InvestigationError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!({})),
                }
            }
        }

        let steps = vec![
            BoundStep::sequential(StepDescriptor::sequential("slow", &[]), Arc::new(SlowStep)),
            BoundStep::sequential(StepDescriptor::sequential("after", &[]), Arc::new(SlowStep)),
        ];

        let ctx = ctx_with(happy_gateway(), happy_reasoning());
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let executor = WorkflowExecutor::with_steps(ctx, steps);
        let state = executor.run_investigation("IR-1").await;

        assert!(state.step_failed("slow"));
        // The pipeline broke out; the second step never ran
        assert!(!state.step_completed("after"));
        assert!(!state.step_failed("after"));
    }

    #[test]
    fn test_status_mapping_covers_the_pipeline() {
        assert_eq!(step_status("parse_ticket"), Some(InvestigationStatus::Parsing));
        assert_eq!(
            step_status("update_ticket"),
            Some(InvestigationStatus::TicketUpdated)
        );
        assert_eq!(step_status("unknown_step"), None);
    }
}
