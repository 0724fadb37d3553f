use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::ToolInvokeError;

/// Live tool sessions keyed by backend connection name. Sorted keys give
/// deterministic probe order when locating which backend owns a tool.
pub type SessionMap = BTreeMap<String, Arc<dyn ToolSession>>;

/// One tool as advertised by a backend's listing operation.
#[derive(Debug, Clone)]
pub struct SessionToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

/// A live connection to a knowledge backend capable of listing and
/// invoking its tools. Sessions are borrowed by the agent for the duration
/// of one run and never mutated by it.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Query the backend's current tool listing. This must reflect the
    /// live state, not a startup-time cache.
    async fn list_tools(&self) -> Result<Vec<SessionToolInfo>, ToolInvokeError>;

    /// Invoke a tool and return its raw textual payload. The payload is
    /// typically JSON, but backends may emit bare error text; callers are
    /// responsible for parsing.
    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<String, ToolInvokeError>;
}
