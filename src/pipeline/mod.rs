// Workflow executor, fan-out coordinator and the investigation steps

//! # Pipeline Module
//!
//! The investigation pipeline proper:
//!
//! - `context`: the shared [`StepContext`] plus the [`Step`] / [`TargetStep`]
//!   seams every step implements
//! - `reasoning`: the [`ReasoningEngine`] boundary and tolerant JSON
//!   extraction from its output
//! - `fanout`: the [`FanoutCoordinator`] that runs a step across targets
//!   concurrently and joins deterministically
//! - `steps`: the nine concrete investigation steps, in execution order
//! - `executor`: the [`WorkflowExecutor`] driving one run to completion

pub mod context;
pub mod executor;
pub mod fanout;
pub mod reasoning;
pub mod steps;

pub use context::{BoundStep, Step, StepContext, StepHandler, TargetStep};
pub use executor::WorkflowExecutor;
pub use fanout::{FanoutCoordinator, FanoutFailureKind, FanoutOutcome};
pub use reasoning::{extract_json, HttpReasoningEngine, ReasoningEngine};
pub use steps::investigation_pipeline;
