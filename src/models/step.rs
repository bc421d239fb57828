// Step definitions - the static shape of the pipeline
//
// A `StepDescriptor` is pure data: a unique name, the attribute keys that
// must already exist in state, and whether the step fans out over a target
// list. The function that actually performs the step is bound in the
// `pipeline` module; keeping the descriptor free of behavior lets the
// executor validate wiring without running anything.

use serde::{Deserialize, Serialize};

use super::state::WorkflowState;

/// Unique name of one pipeline step
///
/// Step names double as attribute namespaces in [`WorkflowState`], so they
/// must be unique across the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepName(pub String);

impl StepName {
    /// Get the step name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create a new step name from any string-like input
    pub fn new<S: Into<String>>(name: S) -> Self {
        StepName(name.into())
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        StepName(s.to_string())
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        StepName(s)
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolves the fan-out target list from the current state
///
/// A plain function pointer keeps descriptors `Copy`-friendly and trivially
/// testable; resolvers only read state, they never call out.
pub type TargetResolver = fn(&WorkflowState) -> Vec<String>;

/// Whether a step runs once or fans out over a resolved target list
#[derive(Debug, Clone, Copy)]
pub enum StepKind {
    /// Runs exactly once with the whole state
    Sequential,
    /// Runs once per resolved target, concurrently, then joins
    FanOut { resolver: TargetResolver },
}

impl StepKind {
    /// Whether this is a fan-out step
    pub fn is_fan_out(&self) -> bool {
        matches!(self, StepKind::FanOut { .. })
    }
}

/// Static definition of one pipeline step
#[derive(Debug, Clone)]
pub struct StepDescriptor {
    /// Unique step name; also the attribute namespace this step writes
    pub name: StepName,

    /// Attribute keys (prior step names) that must exist in state before
    /// this step runs. A missing key is a wiring defect, always fatal to
    /// the step.
    pub requires: &'static [&'static str],

    /// Sequential or fan-out execution
    pub kind: StepKind,
}

impl StepDescriptor {
    /// Define a sequential step
    pub fn sequential(name: &str, requires: &'static [&'static str]) -> Self {
        StepDescriptor {
            name: StepName::from(name),
            requires,
            kind: StepKind::Sequential,
        }
    }

    /// Define a fan-out step with its target-list resolver
    pub fn fan_out(
        name: &str,
        requires: &'static [&'static str],
        resolver: TargetResolver,
    ) -> Self {
        StepDescriptor {
            name: StepName::from(name),
            requires,
            kind: StepKind::FanOut { resolver },
        }
    }

    /// The first required attribute missing from state, if any
    pub fn missing_input(&self, state: &WorkflowState) -> Option<&'static str> {
        self.requires
            .iter()
            .copied()
            .find(|key| !state.has_attribute(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repos_resolver(state: &WorkflowState) -> Vec<String> {
        state
            .attribute("identify_repositories")
            .and_then(|v| v.get("repositories"))
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_missing_input_detection() {
        let step = StepDescriptor::sequential("summarize_rca", &["parse_ticket"]);
        let mut state = WorkflowState::new("IR-1");

        assert_eq!(step.missing_input(&state), Some("parse_ticket"));

        state.record_success("parse_ticket", json!({"title": "oops"}));
        assert_eq!(step.missing_input(&state), None);
    }

    #[test]
    fn test_fan_out_resolver_reads_state() {
        let step = StepDescriptor::fan_out("gather_commits", &[], repos_resolver);
        let mut state = WorkflowState::new("IR-1");
        state.record_success(
            "identify_repositories",
            json!({"repositories": ["acme/api", "acme/worker"]}),
        );

        assert!(step.kind.is_fan_out());
        match step.kind {
            StepKind::FanOut { resolver } => {
                assert_eq!(resolver(&state), vec!["acme/api", "acme/worker"]);
            }
            StepKind::Sequential => panic!("expected fan-out"),
        }
    }
}
