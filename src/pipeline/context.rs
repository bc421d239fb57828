// Step context and the step execution seams
// Constructed once at startup and shared by every step (and every fan-out
// task); there are no module-level singletons anywhere in the pipeline

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::PilotConfig;
use crate::gateway::{ToolGateway, ToolOperation, ToolPayload};
use crate::models::{StepDescriptor, WorkflowState};
use crate::{InvestigationError, Result};

use super::reasoning::{extract_json, ReasoningEngine};

/// Everything a step may touch besides the workflow state
///
/// Steps receive the context by reference; the executor owns the single
/// instance. The cancellation token is the run's top-level one - cancelling
/// it aborts in-flight gateway calls and fan-out tasks.
pub struct StepContext {
    pub gateway: Arc<ToolGateway>,
    pub reasoning: Arc<dyn ReasoningEngine>,
    pub config: PilotConfig,
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new(
        gateway: Arc<ToolGateway>,
        reasoning: Arc<dyn ReasoningEngine>,
        config: PilotConfig,
    ) -> Self {
        StepContext {
            gateway,
            reasoning,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Perform one gateway operation under the run's cancellation token
    pub async fn call_tool(
        &self,
        operation: ToolOperation,
        payload: ToolPayload,
    ) -> Result<serde_json::Value> {
        self.gateway.call(operation, &payload, &self.cancel).await
    }

    /// Ask the reasoning engine for a structured answer
    ///
    /// Engine transport errors propagate (the step fails); unparseable
    /// output does not - the documented `default` is substituted and the
    /// pipeline carries on. This is the only recovery path for
    /// [`InvestigationError::ReasoningParse`].
    pub async fn reason_structured(
        &self,
        prompt: &str,
        default: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let text = self.reasoning.reason(prompt).await?;
        match extract_json(&text) {
            Ok(value) => Ok(value),
            Err(InvestigationError::ReasoningParse(detail)) => {
                warn!("substituting default for unparseable reasoning output: {}", detail);
                Ok(default)
            }
            Err(other) => Err(other),
        }
    }
}

/// A sequential unit of pipeline work
#[async_trait]
pub trait Step: Send + Sync {
    /// Produce this step's output attribute from the current state
    async fn run(&self, ctx: &StepContext, state: &WorkflowState) -> Result<serde_json::Value>;
}

/// A fan-out unit of pipeline work, scoped to one target per invocation
#[async_trait]
pub trait TargetStep: Send + Sync {
    /// Produce this step's output for a single target
    async fn run_target(
        &self,
        ctx: &StepContext,
        state: &WorkflowState,
        target: &str,
    ) -> Result<serde_json::Value>;
}

/// The function half of a step, matching the descriptor's kind
pub enum StepHandler {
    Sequential(Arc<dyn Step>),
    FanOut(Arc<dyn TargetStep>),
}

/// A step descriptor bound to its implementation
pub struct BoundStep {
    pub descriptor: StepDescriptor,
    pub handler: StepHandler,
}

impl BoundStep {
    pub fn sequential(descriptor: StepDescriptor, step: Arc<dyn Step>) -> Self {
        BoundStep {
            descriptor,
            handler: StepHandler::Sequential(step),
        }
    }

    pub fn fan_out(descriptor: StepDescriptor, step: Arc<dyn TargetStep>) -> Self {
        BoundStep {
            descriptor,
            handler: StepHandler::FanOut(step),
        }
    }
}
