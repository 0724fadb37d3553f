use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Agent, AgentState};
use crate::application::tooling::{SessionMap, ToolSession};
use crate::domain::types::{ToolCall, ToolCallResult};
use crate::infrastructure::model::ModelProvider;

impl<P: ModelProvider> Agent<P> {
    /// Dispatch the selected tool calls to their owning backend sessions.
    ///
    /// All-continue: every call in the batch is attempted regardless of
    /// other calls' failures, the batch runs concurrently, and the stage
    /// waits for all results. Every failure mode (unknown tool, transport
    /// error, timeout, backend-declared error, unparseable payload)
    /// becomes a failure record; nothing propagates.
    pub(super) async fn execute(&self, state: &mut AgentState<'_>) {
        let sessions = state.sessions;
        let timeout = self.settings.tool_call_timeout;
        let calls = state.selected_calls.clone();

        let invocations = calls
            .into_iter()
            .map(|call| execute_one(sessions, call, timeout));
        state.tool_results = join_all(invocations).await;
    }
}

async fn execute_one(sessions: &SessionMap, call: ToolCall, timeout: Duration) -> ToolCallResult {
    info!(tool = %call.tool_name, args = %call.arguments, "calling tool");

    let Some((server, session)) = locate_session(sessions, &call.tool_name).await else {
        warn!(tool = %call.tool_name, "no backend advertises requested tool");
        return ToolCallResult::failure(
            &call.tool_name,
            format!("Tool '{}' not found", call.tool_name),
        );
    };

    debug!(tool = %call.tool_name, server = %server, "dispatching tool call");
    let invocation = session.call_tool(&call.tool_name, call.arguments.clone());
    match tokio::time::timeout(timeout, invocation).await {
        Err(_) => {
            warn!(tool = %call.tool_name, server = %server, "tool call timed out");
            ToolCallResult::failure(
                &call.tool_name,
                format!("Tool call timed out after {}s", timeout.as_secs()),
            )
        }
        Ok(Err(err)) => {
            warn!(tool = %call.tool_name, server = %server, %err, "tool call failed");
            ToolCallResult::failure(&call.tool_name, err.to_string())
        }
        Ok(Ok(payload)) => normalize_payload(&call.tool_name, &payload),
    }
}

/// Find which live session advertises the requested tool, probing each
/// session's current listing rather than the startup-time registry so
/// tools that appeared or disappeared since decision time are honored.
/// Probe failures skip that session.
async fn locate_session(
    sessions: &SessionMap,
    tool_name: &str,
) -> Option<(String, Arc<dyn ToolSession>)> {
    for (name, session) in sessions {
        match session.list_tools().await {
            Ok(tools) => {
                if tools.iter().any(|tool| tool.name == tool_name) {
                    return Some((name.clone(), session.clone()));
                }
            }
            Err(err) => {
                debug!(server = %name, %err, "tool listing probe failed");
                continue;
            }
        }
    }
    None
}

/// Normalize a backend's raw textual payload into the uniform result
/// envelope. Backends signal failures both at the transport level and
/// inside structurally valid payloads (`ok: false` or an `error` field);
/// both become failure records.
fn normalize_payload(tool: &str, payload: &str) -> ToolCallResult {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return ToolCallResult::failure(tool, "Empty result");
    }

    let data: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => {
            // Non-JSON payloads are error text from the backend.
            return ToolCallResult::failure(tool, payload);
        }
    };

    if let Some(message) = backend_error_message(&data) {
        warn!(tool, error = %message, "backend returned an error payload");
        return ToolCallResult::backend_error(tool, message, data);
    }

    ToolCallResult::success(tool, data)
}

fn backend_error_message(data: &Value) -> Option<String> {
    let map = data.as_object()?;
    let not_ok = map.get("ok").map(|v| v == &Value::Bool(false)).unwrap_or(false);
    if !not_ok && !map.contains_key("error") {
        return None;
    }

    let message = match map.get("error") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(err)) => err
            .get("message")
            .and_then(Value::as_str)
            .map(|text| text.to_string())
            .unwrap_or_else(|| Value::Object(err.clone()).to_string()),
        Some(other) => other.to_string(),
        None => "Unknown error".to_string(),
    };
    Some(message)
}
