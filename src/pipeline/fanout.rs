// Fan-out coordinator
// Runs one step concurrently across targets, joins everything, and merges
// deterministically - a slow or broken target never takes its siblings down

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::WorkflowState;
use crate::InvestigationError;

use super::context::{StepContext, TargetStep};

/// Why one fan-out target did not produce a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutFailureKind {
    /// The target's task exceeded the shared timeout
    Timeout,
    /// The run's cancellation token fired
    Cancelled,
    /// Token lifecycle failure inside the target's gateway calls
    Auth,
    /// Backend failure that survived gateway fallback
    Backend,
    /// Any other step-level error
    Step,
}

impl From<&InvestigationError> for FanoutFailureKind {
    fn from(error: &InvestigationError) -> Self {
        match error {
            InvestigationError::Timeout(_) => FanoutFailureKind::Timeout,
            InvestigationError::Cancelled => FanoutFailureKind::Cancelled,
            InvestigationError::Auth(_) => FanoutFailureKind::Auth,
            InvestigationError::Backend(_) => FanoutFailureKind::Backend,
            _ => FanoutFailureKind::Step,
        }
    }
}

/// Per-target result recorded in the merged map
///
/// Serializes into the fan-out step's attribute namespace, so partial
/// results survive into the final workflow state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FanoutOutcome {
    Success { value: serde_json::Value },
    Failure { kind: FanoutFailureKind, message: String },
}

impl FanoutOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FanoutOutcome::Success { .. })
    }

    /// The successful value, if any
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            FanoutOutcome::Success { value } => Some(value),
            FanoutOutcome::Failure { .. } => None,
        }
    }
}

/// Concurrent per-target step runner with join semantics
///
/// One task per target, all sharing the configured timeout and the run's
/// cancellation token. Join, never race: every target gets an entry in the
/// merged map, keyed by target identifier rather than arrival order.
pub struct FanoutCoordinator {
    timeout: Duration,
}

impl FanoutCoordinator {
    pub fn new(timeout: Duration) -> Self {
        FanoutCoordinator { timeout }
    }

    /// Run `step` once per target and merge the outcomes
    pub async fn run_parallel(
        &self,
        ctx: Arc<StepContext>,
        state: &WorkflowState,
        step: Arc<dyn TargetStep>,
        targets: Vec<String>,
    ) -> BTreeMap<String, FanoutOutcome> {
        debug!(targets = targets.len(), "fanning out");
        let state = Arc::new(state.clone());

        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let ctx = ctx.clone();
            let state = state.clone();
            let step = step.clone();
            let timeout = self.timeout;

            handles.push(tokio::spawn(async move {
                let outcome = tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(InvestigationError::Cancelled),
                    out = tokio::time::timeout(
                        timeout,
                        step.run_target(&ctx, &state, &target),
                    ) => match out {
                        Ok(result) => result,
                        Err(_) => Err(InvestigationError::Timeout(timeout)),
                    },
                };
                (target, outcome)
            }));
        }

        let mut merged = BTreeMap::new();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok((target, Ok(value))) => {
                    merged.insert(target, FanoutOutcome::Success { value });
                }
                Ok((target, Err(error))) => {
                    warn!(target = %target, "fan-out target failed: {}", error);
                    merged.insert(
                        target,
                        FanoutOutcome::Failure {
                            kind: FanoutFailureKind::from(&error),
                            message: error.to_string(),
                        },
                    );
                }
                Err(join_error) => {
                    // A panicked task loses its target name; record it
                    // under a reserved key rather than dropping it silently
                    warn!("fan-out task panicked: {}", join_error);
                    merged.insert(
                        format!("_panicked_{}", merged.len()),
                        FanoutOutcome::Failure {
                            kind: FanoutFailureKind::Step,
                            message: join_error.to_string(),
                        },
                    );
                }
            }
        }
        merged
    }
}
