// Structured-protocol backend adapter
// Speaks a generic tool-call envelope to a fixed tool-invocation endpoint:
// every operation is routed as `tools/call` with the operation's wire name

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::TokenRecord;

use super::adapter::{classify_request_error, BackendAdapter};
use super::operation::{BackendCallResult, BackendFailure, ToolOperation, ToolPayload};

/// Request envelope sent to the tool endpoint
#[derive(Debug, Clone, Serialize)]
struct ToolCallRequest<'a> {
    id: String,
    method: &'static str,
    params: ToolCallParams<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct ToolCallParams<'a> {
    name: &'static str,
    arguments: &'a ToolPayload,
}

/// Response envelope from the tool endpoint
#[derive(Debug, Clone, Deserialize)]
struct ToolCallEnvelope {
    #[allow(dead_code)]
    id: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<EnvelopeError>,
}

#[derive(Debug, Clone, Deserialize)]
struct EnvelopeError {
    code: i32,
    message: String,
}

/// Adapter for the structured tool-call protocol backend
///
/// The endpoint hosts every operation behind one URL; the operation's wire
/// name selects the routed method. Envelope-level errors are application
/// errors (the endpoint was reachable and understood us), so they are
/// non-retriable; transport and 5xx failures are retriable.
pub struct ProtocolAdapter {
    client: reqwest::Client,
    endpoint_url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl ProtocolAdapter {
    pub fn new(endpoint_url: impl Into<String>, timeout: Duration) -> Self {
        ProtocolAdapter {
            client: reqwest::Client::new(),
            endpoint_url: endpoint_url.into(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl BackendAdapter for ProtocolAdapter {
    fn id(&self) -> &str {
        "protocol"
    }

    async fn invoke(
        &self,
        operation: ToolOperation,
        payload: &ToolPayload,
        token: Option<&TokenRecord>,
    ) -> BackendCallResult {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let envelope = ToolCallRequest {
            id: request_id.clone(),
            method: "tools/call",
            params: ToolCallParams {
                name: operation.wire_name(),
                arguments: payload,
            },
        };

        debug!(id = %request_id, operation = %operation, "tool-call request");

        let mut request = self
            .client
            .post(&self.endpoint_url)
            .timeout(self.timeout)
            .json(&envelope);
        if let Some(token) = token {
            request = request.header("Authorization", token.authorization_header());
        }

        let response = request.send().await.map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendFailure::status(status.as_u16(), body));
        }

        let envelope: ToolCallEnvelope = response
            .json()
            .await
            .map_err(|e| BackendFailure::protocol(format!("bad envelope: {}", e)))?;

        if let Some(error) = envelope.error {
            return Err(BackendFailure::protocol(format!(
                "tool endpoint error {}: {}",
                error.code, error.message
            )));
        }

        envelope
            .result
            .ok_or_else(|| BackendFailure::protocol("envelope carried neither result nor error"))
    }
}
