use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    /// Capitalized label used when rendering conversation history into prompts.
    pub fn label(self) -> &'static str {
        match self {
            MessageRole::System => "System",
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Document,
}

/// An uploaded file carried alongside a query. Documents hold a textual
/// preview; images hold base64 payload data for vision models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFile {
    pub id: String,
    pub name: String,
    pub kind: FileKind,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<String>,
}

impl ContextFile {
    pub fn document(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        preview: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: FileKind::Document,
            mime_type: mime_type.into(),
            preview: Some(preview.into()),
            inline_data: None,
        }
    }

    pub fn image(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        inline_data: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: FileKind::Image,
            mime_type: mime_type.into(),
            preview: None,
            inline_data,
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind == FileKind::Image
    }
}

/// Normalized description of a tool as advertised to the agent. The
/// `input_schema` follows the JSON-Schema object convention
/// (`{type, properties, required}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub description: String,
    pub input_schema: Value,
}

/// One tool invocation proposed by the selection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub reasoning: String,
}

/// Uniform envelope for one executed tool call. `success` is the
/// discriminant: `data` carries the parsed payload on success, `error` a
/// human-readable message on failure. Backend-declared errors keep the
/// payload in `data` for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn success(tool: impl Into<String>, data: Value) -> Self {
        Self {
            tool: tool.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(tool: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn backend_error(
        tool: impl Into<String>,
        error: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            tool: tool.into(),
            success: false,
            data: Some(data),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_constructors_set_discriminant() {
        let ok = ToolCallResult::success("search", json!({"hits": []}));
        assert!(ok.success);
        assert!(ok.data.is_some());
        assert!(ok.error.is_none());

        let failed = ToolCallResult::failure("search", "boom");
        assert!(!failed.success);
        assert!(failed.data.is_none());
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let backend = ToolCallResult::backend_error("search", "bad input", json!({"ok": false}));
        assert!(!backend.success);
        assert!(backend.data.is_some());
    }

    #[test]
    fn tool_call_deserializes_with_missing_optionals() {
        let call: ToolCall =
            serde_json::from_value(json!({"tool_name": "search_elog"})).expect("parses");
        assert_eq!(call.tool_name, "search_elog");
        assert!(call.arguments.is_null());
        assert!(call.reasoning.is_empty());
    }
}
