//! Context assemblers: pure text builders that render conversational and
//! tool state into the bounded blocks the prompt templates consume. All
//! functions are deterministic given their inputs and return an empty
//! string when there is nothing to render.

pub mod prompts;

use crate::domain::types::{ChatMessage, ContextFile, FileKind, ToolSpec};
use chrono::Local;
use serde_json::Value;
use std::collections::BTreeMap;

/// Global system context: assistant identity, current date/time, and
/// behavioral guidelines. Computed exactly once per run; the same "now"
/// flows through every stage prompt of that run.
pub fn build_system_context() -> String {
    let now = Local::now();
    let current_datetime = now.format("%A, %B %d, %Y at %H:%M:%S");
    let current_date = now.format("%Y-%m-%d");

    format!(
        "You are Cairn, the operations assistant for a particle-accelerator research facility.\n\
         \n\
         **Current Date and Time:** {current_datetime}\n\
         **Current Date (for calculations):** {current_date}\n\
         \n\
         **Your Role:**\n\
         - Provide concise, accurate, and scientific answers\n\
         - Ground your responses in factual information\n\
         - Use proper technical terminology\n\
         - Cite sources when using external information\n"
    )
}

/// Render the most recent `max_messages` history entries, role-labeled,
/// oldest-first within the window. Message content is never truncated.
pub fn build_conversation_context(messages: &[ChatMessage], max_messages: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }

    let start = messages.len().saturating_sub(max_messages);
    let mut lines = Vec::with_capacity(messages.len() - start);
    for message in &messages[start..] {
        lines.push(format!("{}: {}", message.role.label(), message.content));
    }

    format!("\n**Recent Conversation:**\n{}\n", lines.join("\n"))
}

/// File names plus short previews, for decision-making prompts where full
/// content is not needed. Images are listed by name only.
pub fn build_files_context_summary(files: &[ContextFile]) -> String {
    if files.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(files.len());
    for file in files {
        match file.kind {
            FileKind::Image => lines.push(format!("- Image: {}", file.name)),
            FileKind::Document => {
                let preview = file.preview.as_deref().unwrap_or("");
                lines.push(format!("- Document: {} - {}", file.name, preview));
            }
        }
    }

    format!("\n**Uploaded Files:**\n{}\n", lines.join("\n"))
}

/// Full file content, for answer generation. Image payloads are never
/// inlined as text; only their availability is noted.
pub fn build_files_context_full(files: &[ContextFile]) -> String {
    if files.is_empty() {
        return String::new();
    }

    let mut parts = Vec::with_capacity(files.len());
    for file in files {
        match file.kind {
            FileKind::Image => {
                if file.inline_data.is_some() {
                    parts.push(format!(
                        "**Image: {}**\n[Image data available for vision models]",
                        file.name
                    ));
                } else {
                    parts.push(format!(
                        "**Image: {}**\n[Image uploaded but not accessible]",
                        file.name
                    ));
                }
            }
            FileKind::Document => match file.preview.as_deref() {
                Some(preview) if !preview.is_empty() => {
                    parts.push(format!("**Document: {}**\n{}", file.name, preview));
                }
                _ => {
                    parts.push(format!("**Document: {}**\n[No preview available]", file.name));
                }
            },
        }
    }

    format!("\n**Uploaded Files:**\n{}\n\n", parts.join("\n"))
}

/// Detailed tool descriptions with full parameter schemas, for the
/// decision and selection prompts.
pub fn build_tools_context_detailed(tools: &BTreeMap<String, ToolSpec>) -> String {
    let mut descriptions = Vec::with_capacity(tools.len());

    for (name, spec) in tools {
        let mut desc = format!("**{name}**\n  Description: {}\n", spec.description);

        if let Some(properties) = spec.input_schema.get("properties").and_then(Value::as_object) {
            let required: Vec<&str> = spec
                .input_schema
                .get("required")
                .and_then(Value::as_array)
                .map(|entries| entries.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            desc.push_str("  Parameters:\n");
            for (param_name, param_info) in properties {
                let param_type = param_info
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("any");
                desc.push_str(&format!("    - {param_name} ({param_type})"));

                if let Some(options) = param_info.get("enum").and_then(Value::as_array) {
                    let rendered: Vec<String> = options
                        .iter()
                        .map(|option| match option {
                            Value::String(text) => text.clone(),
                            other => other.to_string(),
                        })
                        .collect();
                    desc.push_str(&format!(" [options: {}]", rendered.join(", ")));
                }

                if required.contains(&param_name.as_str()) {
                    desc.push_str(" [REQUIRED]");
                }

                desc.push('\n');
            }
        }

        descriptions.push(desc);
    }

    descriptions.join("\n")
}

/// Context for retry rounds: renders the prior refinement suggestion so
/// the selection stage can adapt. Empty on the first attempt or when
/// there is no suggestion to carry.
pub fn build_refinement_context(iteration: u32, refinement_suggestion: Option<&str>) -> String {
    let suggestion = match refinement_suggestion {
        Some(text) if !text.is_empty() => text,
        _ => return String::new(),
    };
    if iteration == 0 {
        return String::new();
    }

    format!(
        "\n**Previous Attempt #{iteration} Failed**\n\
         Refinement suggestion: {suggestion}\n\
         Try a different approach or different tool arguments.\n"
    )
}
