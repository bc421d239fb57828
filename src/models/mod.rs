// Core domain models for Incident Pilot
// These are the data structures threaded through the pipeline

//! # Domain Models Module
//!
//! This module contains the core domain models:
//!
//! - `state`: the [`WorkflowState`] record that accumulates every step's
//!   output, plus the [`InvestigationStatus`] enum describing how far a run
//!   has progressed
//! - `step`: the static [`StepDescriptor`] definitions the executor runs,
//!   including the fan-out variant with its target-list resolver
//!
//! The models carry no I/O. Everything that talks to the outside world lives
//! in `auth`, `gateway` and `pipeline`.

pub mod state;
pub mod step;

pub use state::{InvestigationStatus, WorkflowState};
pub use step::{StepDescriptor, StepKind, StepName};
