// Backend adapter trait and shared error classification
// Every concrete integration style implements this one seam

use async_trait::async_trait;

use crate::auth::TokenRecord;

use super::operation::{BackendCallResult, BackendFailure, ToolOperation, ToolPayload};

/// One concrete way to perform logical operations against an external system
///
/// Adapters are stateless (beyond their HTTP client) and safely shared across
/// concurrent gateway calls. Each adapter owns its request construction but
/// uses the shared classification rule in [`BackendFailure`] so the gateway's
/// fallback logic stays backend-agnostic.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Stable identifier used in logs and registration diagnostics
    fn id(&self) -> &str;

    /// Whether this adapter needs a bearer token before invocation.
    /// Unauthenticated adapters (local tool endpoints, test doubles) skip
    /// the token manager entirely.
    fn requires_auth(&self) -> bool {
        true
    }

    /// Perform one operation with the given payload
    async fn invoke(
        &self,
        operation: ToolOperation,
        payload: &ToolPayload,
        token: Option<&TokenRecord>,
    ) -> BackendCallResult;
}

/// Map a reqwest error to the shared failure classification
pub(crate) fn classify_request_error(error: reqwest::Error) -> BackendFailure {
    if error.is_timeout() {
        BackendFailure::timeout(std::time::Duration::from_secs(0))
    } else if let Some(status) = error.status() {
        BackendFailure::status(status.as_u16(), error.to_string())
    } else {
        BackendFailure::transport(error.to_string())
    }
}

/// Extract a required string argument from an operation payload
pub(crate) fn require_str<'a>(
    payload: &'a ToolPayload,
    name: &str,
) -> Result<&'a str, BackendFailure> {
    payload
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| BackendFailure::protocol(format!("missing string argument '{}'", name)))
}

/// Extract an optional string argument from an operation payload
pub(crate) fn optional_str<'a>(payload: &'a ToolPayload, name: &str) -> Option<&'a str> {
    payload.get(name).and_then(|v| v.as_str())
}

/// Extract an optional integer argument from an operation payload
pub(crate) fn optional_u64(payload: &ToolPayload, name: &str) -> Option<u64> {
    payload.get(name).and_then(|v| v.as_u64())
}
