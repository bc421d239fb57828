// Incident Pilot
// Automated multi-step incident investigation with resilient integrations

//! # Incident Pilot Library
//!
//! This is the main library crate for Incident Pilot, a pipeline that turns an
//! incident identifier into a root-cause analysis written back to the issue
//! tracker. The pipeline is deliberately tolerant of the two things that break
//! most often in practice: expiring OAuth credentials and flaky integration
//! backends.
//!
//! ## Core Components
//!
//! ### Domain Models
//! - [`WorkflowState`]: The accumulating record threaded through pipeline steps
//! - [`InvestigationStatus`]: Where a run currently is in the pipeline
//! - [`StepDescriptor`]: Static definition of one named pipeline step
//!
//! ### Auth Layer
//! - [`TokenLifecycleManager`]: Hands out a currently-valid bearer token,
//!   refreshing through the OAuth token endpoint behind a double-checked lock
//! - [`CredentialStore`]: The only piece of mutable shared credential state
//!
//! ### Tool Gateway
//! - [`ToolGateway`]: Dispatches each logical operation across an ordered list
//!   of backend adapters, falling back on retriable failures
//! - [`BackendAdapter`]: One concrete way to perform a logical operation
//!   (structured tool-call protocol or direct REST)
//!
//! ### Pipeline
//! - [`WorkflowExecutor`]: Runs the fixed step list against an initial state,
//!   recording per-step failures without aborting the run
//! - [`FanoutCoordinator`]: Runs one step concurrently across targets and
//!   joins deterministically
//! - [`ReasoningEngine`]: External text-in/text-out collaborator used for
//!   hypothesis generation; its output is never trusted to be well-formed

// Core domain models
pub mod models;

// Credential store and token lifecycle management
pub mod auth;

// Tool call gateway and backend adapters
pub mod gateway;

// Workflow executor, fan-out coordinator and the investigation steps
pub mod pipeline;

// Process configuration
pub mod config;

// Re-export core domain types for easy access
pub use models::{
    InvestigationStatus,
    StepDescriptor,
    StepKind,
    StepName,
    WorkflowState,
};

// Re-export auth types
pub use auth::{
    AuthError, CredentialStore, GrantConfig, InMemoryTokenStore, TokenLifecycleManager,
    TokenRecord, TokenStore,
};

// Re-export gateway types
pub use gateway::{
    BackendAdapter, BackendFailure, CodeHostRestAdapter, FailureKind, ProtocolAdapter,
    ToolGateway, ToolOperation, ToolPayload, TrackerRestAdapter,
};

// Re-export pipeline types
pub use pipeline::{
    FanoutCoordinator, FanoutOutcome, ReasoningEngine, StepContext, WorkflowExecutor,
};

pub use config::PilotConfig;

use thiserror::Error;

/// Error taxonomy for investigation runs
///
/// Most of these are caught at the step boundary and recorded in
/// `failed_steps`; only `MissingInput` (a pipeline wiring defect) and an
/// exhausted ticket-update step flip the overall run to `Failed`.
#[derive(Error, Debug)]
pub enum InvestigationError {
    /// Credential or token failure, always fatal to the calling step
    #[error(transparent)]
    Auth(#[from] auth::AuthError),

    /// A single backend adapter failed; `retriable` drives gateway fallback
    #[error(transparent)]
    Backend(#[from] gateway::BackendFailure),

    /// A step's declared input attribute is missing from state
    #[error("missing input attribute '{attribute}' for step '{step}'")]
    MissingInput { step: String, attribute: String },

    /// The reasoning engine's text response could not be parsed into the
    /// expected structured shape; recovered locally with a documented default
    #[error("reasoning output could not be parsed: {0}")]
    ReasoningParse(String),

    /// A bounded call did not complete in time
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The run's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// JSON serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

/// Type alias for Results that use the crate error type
pub type Result<T> = std::result::Result<T, InvestigationError>;
