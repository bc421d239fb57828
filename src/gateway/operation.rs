// Logical tool operations and the failure type that drives fallback

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which external service an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    /// The issue tracker (tickets, comments)
    IssueTracker,
    /// The code host (repositories, commits, file contents)
    CodeHost,
}

/// The closed set of logical operations the pipeline may perform
///
/// Each operation is serviced by an ordered list of adapters registered with
/// the [`ToolGateway`](super::ToolGateway) at startup. Using an enum instead
/// of tool-name strings makes "no matching tool" unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolOperation {
    SearchIssues,
    GetIssue,
    CreateIssue,
    UpdateIssue,
    AddComment,
    ListCommits,
    GetFileContents,
    SearchRepositories,
}

impl ToolOperation {
    /// Wire name used by the structured tool-call protocol
    pub fn wire_name(&self) -> &'static str {
        match self {
            ToolOperation::SearchIssues => "search_issues",
            ToolOperation::GetIssue => "get_issue",
            ToolOperation::CreateIssue => "create_issue",
            ToolOperation::UpdateIssue => "update_issue",
            ToolOperation::AddComment => "add_comment",
            ToolOperation::ListCommits => "list_commits",
            ToolOperation::GetFileContents => "get_file_contents",
            ToolOperation::SearchRepositories => "search_repositories",
        }
    }

    /// Which service this operation targets
    pub fn service(&self) -> ServiceKind {
        match self {
            ToolOperation::SearchIssues
            | ToolOperation::GetIssue
            | ToolOperation::CreateIssue
            | ToolOperation::UpdateIssue
            | ToolOperation::AddComment => ServiceKind::IssueTracker,
            ToolOperation::ListCommits
            | ToolOperation::GetFileContents
            | ToolOperation::SearchRepositories => ServiceKind::CodeHost,
        }
    }

    /// All operations, for registration loops
    pub fn all() -> [ToolOperation; 8] {
        [
            ToolOperation::SearchIssues,
            ToolOperation::GetIssue,
            ToolOperation::CreateIssue,
            ToolOperation::UpdateIssue,
            ToolOperation::AddComment,
            ToolOperation::ListCommits,
            ToolOperation::GetFileContents,
            ToolOperation::SearchRepositories,
        ]
    }
}

impl std::fmt::Display for ToolOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// Input payload for one operation: argument name to JSON value
pub type ToolPayload = serde_json::Map<String, serde_json::Value>;

/// Result of invoking one backend adapter
pub type BackendCallResult = Result<serde_json::Value, BackendFailure>;

/// What class of failure an adapter reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Could not reach the backend at all
    Transport,
    /// Backend answered with a non-success HTTP status
    Status(u16),
    /// Request or response violated the operation contract
    Protocol,
    /// The bounded per-adapter call did not finish in time
    Timeout,
    /// The run's cancellation token fired mid-call
    Cancelled,
    /// Every registered adapter for the operation failed
    AllBackendsExhausted,
}

/// A single backend adapter failure
///
/// The gateway only advances to the next adapter in the fallback list when
/// `retriable` is true; a non-retriable failure (malformed request, 4xx) is
/// surfaced immediately.
#[derive(Error, Debug, Clone)]
#[error("backend failure ({kind:?}, retriable={retriable}): {message}")]
pub struct BackendFailure {
    pub kind: FailureKind,
    pub message: String,
    pub retriable: bool,
}

impl BackendFailure {
    /// Connectivity-class error; always worth trying the next adapter
    pub fn transport(message: impl Into<String>) -> Self {
        BackendFailure {
            kind: FailureKind::Transport,
            message: message.into(),
            retriable: true,
        }
    }

    /// HTTP status failure. 5xx and 429 are retriable (the next adapter may
    /// be healthy); other 4xx indicate a malformed request that no adapter
    /// will accept.
    pub fn status(code: u16, body: impl Into<String>) -> Self {
        BackendFailure {
            kind: FailureKind::Status(code),
            message: body.into(),
            retriable: code >= 500 || code == 429,
        }
    }

    /// Contract violation; never retriable
    pub fn protocol(message: impl Into<String>) -> Self {
        BackendFailure {
            kind: FailureKind::Protocol,
            message: message.into(),
            retriable: false,
        }
    }

    /// Bounded call exceeded its deadline; retriable
    pub fn timeout(elapsed: std::time::Duration) -> Self {
        BackendFailure {
            kind: FailureKind::Timeout,
            message: format!("no response within {:?}", elapsed),
            retriable: true,
        }
    }

    /// Cancellation; never retried
    pub fn cancelled() -> Self {
        BackendFailure {
            kind: FailureKind::Cancelled,
            message: "operation cancelled".to_string(),
            retriable: false,
        }
    }

    /// Every adapter for `operation` was tried and failed
    pub fn exhausted(operation: ToolOperation) -> Self {
        BackendFailure {
            kind: FailureKind::AllBackendsExhausted,
            message: format!("all backends exhausted for {}", operation),
            retriable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_are_stable() {
        assert_eq!(ToolOperation::SearchIssues.wire_name(), "search_issues");
        assert_eq!(ToolOperation::ListCommits.wire_name(), "list_commits");
        assert_eq!(ToolOperation::all().len(), 8);
    }

    #[test]
    fn test_service_routing() {
        assert_eq!(ToolOperation::AddComment.service(), ServiceKind::IssueTracker);
        assert_eq!(
            ToolOperation::SearchRepositories.service(),
            ServiceKind::CodeHost
        );
    }

    #[test]
    fn test_status_retriability_rule() {
        assert!(BackendFailure::status(500, "").retriable);
        assert!(BackendFailure::status(503, "").retriable);
        assert!(BackendFailure::status(429, "").retriable);
        assert!(!BackendFailure::status(400, "").retriable);
        assert!(!BackendFailure::status(404, "").retriable);
        assert!(!BackendFailure::status(401, "").retriable);
    }

    #[test]
    fn test_non_http_classifications() {
        assert!(BackendFailure::transport("conn refused").retriable);
        assert!(BackendFailure::timeout(std::time::Duration::from_secs(30)).retriable);
        assert!(!BackendFailure::protocol("missing argument").retriable);
        assert!(!BackendFailure::cancelled().retriable);
        assert!(!BackendFailure::exhausted(ToolOperation::GetIssue).retriable);
    }
}
