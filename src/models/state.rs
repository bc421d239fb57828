// Workflow state - the accumulating record threaded through the pipeline
//
// ## State Model Overview
//
// One investigation run owns exactly one `WorkflowState`. Steps never share
// mutable access: the executor hands the state to one step at a time, merges
// the step's output under the step's own namespace, and moves on. A step that
// fails leaves the state untouched except for bookkeeping.
//
// ### Core rules:
//
// - `incident_id` is immutable after creation
// - `attributes` is keyed by step name; each step writes only its own entry
// - `completed_steps` / `failed_steps` are append-only
// - once a step name is in `failed_steps` it is never re-entered in this run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How far an investigation run has progressed
///
/// The executor computes the final value from which steps completed versus
/// failed; intermediate values correspond to the most recently completed
/// pipeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvestigationStatus {
    /// Run created, only `incident_id` populated
    Initialized,
    /// Ticket fetched and parsed into structured fields
    Parsing,
    /// Implicated repositories identified
    RepoIdentified,
    /// Candidate source paths discovered per repository
    PathDiscovered,
    /// Evidence gathering / commit analysis in progress or completed
    Analyzing,
    /// Root-cause record produced
    RCAComplete,
    /// Action items summarized
    ActionsSummarized,
    /// Results written back to the tracker (terminal success)
    TicketUpdated,
    /// A mandatory step failed (terminal failure)
    Failed,
}

impl std::fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvestigationStatus::Initialized => "initialized",
            InvestigationStatus::Parsing => "parsing",
            InvestigationStatus::RepoIdentified => "repo_identified",
            InvestigationStatus::PathDiscovered => "path_discovered",
            InvestigationStatus::Analyzing => "analyzing",
            InvestigationStatus::RCAComplete => "rca_complete",
            InvestigationStatus::ActionsSummarized => "actions_summarized",
            InvestigationStatus::TicketUpdated => "ticket_updated",
            InvestigationStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// The single mutable-by-replacement record threaded through the pipeline
///
/// Serializes cleanly so callers can persist or inspect partial results; a
/// serialize/deserialize round trip preserves the `attributes` mapping and
/// the ordering of `completed_steps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Unique identifier for this run (logged on every step)
    pub run_id: Uuid,

    /// Opaque incident identifier, immutable after creation
    pub incident_id: String,

    /// Current pipeline position
    pub status: InvestigationStatus,

    /// Ordered mapping of step name to that step's output.
    /// A `BTreeMap` keeps iteration and serialization deterministic.
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Step names that completed, in execution order (append-only)
    pub completed_steps: Vec<String>,

    /// Step names that failed, in execution order (append-only)
    pub failed_steps: Vec<String>,

    /// When this run was created
    pub created_at: DateTime<Utc>,

    /// Refreshed on every step completion or failure
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Create the initial state for an incident
    pub fn new(incident_id: impl Into<String>) -> Self {
        let now = Utc::now();
        WorkflowState {
            run_id: Uuid::new_v4(),
            incident_id: incident_id.into(),
            status: InvestigationStatus::Initialized,
            attributes: BTreeMap::new(),
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a step's output under its own namespace and record completion
    pub fn record_success(&mut self, step: &str, output: serde_json::Value) {
        self.attributes.insert(step.to_string(), output);
        self.completed_steps.push(step.to_string());
        self.updated_at = Utc::now();
    }

    /// Record a step failure; the attribute map is left untouched so
    /// downstream steps fall back to their documented defaults
    pub fn record_failure(&mut self, step: &str) {
        self.failed_steps.push(step.to_string());
        self.updated_at = Utc::now();
    }

    /// Look up a prior step's output by step name
    pub fn attribute(&self, step: &str) -> Option<&serde_json::Value> {
        self.attributes.get(step)
    }

    /// Whether a prior step produced output under this name
    pub fn has_attribute(&self, step: &str) -> bool {
        self.attributes.contains_key(step)
    }

    /// Whether this step already failed in the current run
    pub fn step_failed(&self, step: &str) -> bool {
        self.failed_steps.iter().any(|s| s == step)
    }

    /// Whether this step already completed in the current run
    pub fn step_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }
}
