use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::circuit::{CallOutcome, CircuitBreakerConfig, CircuitBreakers};
use super::registry::ToolRegistry;
use super::transport::{ToolRequest, ToolTransport, TransportError, TransportResponse};
use crate::error::{DispatchError, UnavailableReason};
use crate::llm::preview;

/// Successful (2xx) tool response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub action_name: String,
    pub status: u16,
    /// Parsed JSON body, or the raw text when the body is not JSON.
    pub payload: Value,
}

/// Executes tool actions with per-tool circuit breaking and timeouts.
///
/// Makes exactly one network attempt per `execute` call. Tool actions may have
/// side effects, so retrying is left to callers that know the action is
/// idempotent.
pub struct ToolDispatchClient {
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn ToolTransport>,
    circuits: CircuitBreakers,
}

impl ToolDispatchClient {
    pub fn new(
        registry: Arc<ToolRegistry>,
        transport: Arc<dyn ToolTransport>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            circuits: CircuitBreakers::new(config),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn circuits(&self) -> &CircuitBreakers {
        &self.circuits
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        action_name: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> Result<ToolResult, DispatchError> {
        let unknown = || DispatchError::UnknownAction {
            tool: tool_name.to_string(),
            action: action_name.to_string(),
        };
        let tool = self.registry.tool(tool_name).ok_or_else(unknown)?;
        let action = tool.action(action_name).ok_or_else(unknown)?;

        let missing = action.missing_required(&arguments);
        if !missing.is_empty() {
            return Err(DispatchError::MissingParameters {
                tool: tool_name.to_string(),
                action: action_name.to_string(),
                missing,
            });
        }

        let Some(permit) = self.circuits.try_acquire(tool_name) else {
            warn!("Rejecting call to '{tool_name}.{action_name}': circuit open");
            return Err(DispatchError::ToolUnavailable {
                tool: tool_name.to_string(),
                reason: UnavailableReason::CircuitOpen,
            });
        };

        let request = ToolRequest {
            action_name: action_name.to_string(),
            arguments: action.retain_declared(arguments),
        };
        debug!(
            "Dispatching {tool_name}.{action_name} ({} args, trial={})",
            request.arguments.len(),
            permit.is_trial()
        );

        let sent = tokio::time::timeout(timeout, self.transport.send(&tool.endpoint, &request))
            .await
            .unwrap_or(Err(TransportError::Timeout));

        let unavailable = |reason: UnavailableReason| DispatchError::ToolUnavailable {
            tool: tool_name.to_string(),
            reason,
        };

        match sent {
            Err(TransportError::Timeout) => {
                permit.record(CallOutcome::Failure);
                warn!("Tool '{tool_name}.{action_name}' timed out after {timeout:?}");
                Err(unavailable(UnavailableReason::Timeout))
            }
            Err(TransportError::Network(detail)) => {
                permit.record(CallOutcome::Failure);
                warn!("Tool '{tool_name}.{action_name}' unreachable: {detail}");
                Err(unavailable(UnavailableReason::Network(detail)))
            }
            Ok(TransportResponse { status, body }) if (200..300).contains(&status) => {
                permit.record(CallOutcome::Success);
                info!("Tool '{tool_name}.{action_name}' succeeded ({status})");
                Ok(ToolResult {
                    tool_name: tool_name.to_string(),
                    action_name: action_name.to_string(),
                    status,
                    payload: parse_payload(body),
                })
            }
            Ok(TransportResponse { status, body }) => {
                // Only server errors count against the circuit.
                let outcome = if (500..600).contains(&status) {
                    CallOutcome::Failure
                } else {
                    CallOutcome::Rejected
                };
                permit.record(outcome);
                warn!(
                    "Tool '{tool_name}.{action_name}' returned {status}: {}",
                    preview(&body, 200)
                );
                Err(DispatchError::ToolExecutionError {
                    tool: tool_name.to_string(),
                    action: action_name.to_string(),
                    status,
                    body,
                })
            }
        }
    }
}

fn parse_payload(body: String) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}
