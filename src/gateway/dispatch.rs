// Tool call gateway
// Ordered fallback dispatch across backend adapters, first-success-wins

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::TokenLifecycleManager;
use crate::{auth::AuthError, InvestigationError, Result};

use super::adapter::BackendAdapter;
use super::operation::{BackendFailure, ToolOperation, ToolPayload};

/// Fallback-ordered dispatcher across backend adapters
///
/// For each logical operation the gateway holds an ordered adapter list,
/// registered once at startup. A call walks the list in order:
///
/// 1. obtain a token (skipped for unauthenticated adapters)
/// 2. invoke under the bounded call timeout
/// 3. success returns immediately; no further adapters are tried
/// 4. a retriable failure logs and falls through to the next adapter
/// 5. a non-retriable failure is surfaced immediately
///
/// The gateway is safe for concurrent use by fan-out tasks; all shared state
/// lives behind the token manager's own locking.
pub struct ToolGateway {
    registry: HashMap<ToolOperation, Vec<Arc<dyn BackendAdapter>>>,
    tokens: Option<Arc<TokenLifecycleManager>>,
    call_timeout: Duration,
}

impl ToolGateway {
    /// Create an empty gateway with the given per-adapter call timeout
    pub fn new(call_timeout: Duration) -> Self {
        ToolGateway {
            registry: HashMap::new(),
            tokens: None,
            call_timeout,
        }
    }

    /// Attach the token lifecycle manager used for authenticated adapters
    pub fn with_token_manager(mut self, tokens: Arc<TokenLifecycleManager>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Append an adapter to the fallback list for one operation
    pub fn register(&mut self, operation: ToolOperation, adapter: Arc<dyn BackendAdapter>) {
        debug!(operation = %operation, adapter = adapter.id(), "registered backend adapter");
        self.registry.entry(operation).or_default().push(adapter);
    }

    /// Append an adapter to the fallback lists of several operations
    pub fn register_many(&mut self, operations: &[ToolOperation], adapter: Arc<dyn BackendAdapter>) {
        for operation in operations {
            self.register(*operation, adapter.clone());
        }
    }

    /// How many adapters service an operation (diagnostics)
    pub fn adapter_count(&self, operation: ToolOperation) -> usize {
        self.registry.get(&operation).map_or(0, Vec::len)
    }

    /// Perform one logical operation, falling back across adapters
    pub async fn call(
        &self,
        operation: ToolOperation,
        payload: &ToolPayload,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let adapters = self.registry.get(&operation).ok_or_else(|| {
            InvestigationError::Internal(format!("no adapters registered for {}", operation))
        })?;

        for adapter in adapters {
            if cancel.is_cancelled() {
                return Err(InvestigationError::Cancelled);
            }

            let token = if adapter.requires_auth() {
                let manager = self
                    .tokens
                    .as_ref()
                    .ok_or(AuthError::NoCredentials)?;
                Some(manager.get_valid_token().await?)
            } else {
                None
            };

            let invocation = adapter.invoke(operation, payload, token.as_ref());
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(InvestigationError::Cancelled),
                out = tokio::time::timeout(self.call_timeout, invocation) => out,
            };

            match outcome {
                Ok(Ok(value)) => {
                    debug!(operation = %operation, adapter = adapter.id(), "backend call succeeded");
                    return Ok(value);
                }
                Ok(Err(failure)) if failure.retriable => {
                    warn!(
                        operation = %operation,
                        adapter = adapter.id(),
                        "retriable backend failure, falling back: {}",
                        failure
                    );
                }
                Ok(Err(failure)) => {
                    warn!(
                        operation = %operation,
                        adapter = adapter.id(),
                        "non-retriable backend failure: {}",
                        failure
                    );
                    return Err(failure.into());
                }
                Err(_elapsed) => {
                    warn!(
                        operation = %operation,
                        adapter = adapter.id(),
                        "backend call exceeded {:?}, falling back",
                        self.call_timeout
                    );
                }
            }
        }

        info!(operation = %operation, "all backend adapters exhausted");
        Err(BackendFailure::exhausted(operation).into())
    }
}
