use std::collections::BTreeMap;

use super::QueryRequest;
use crate::application::context;
use crate::application::tooling::SessionMap;
use crate::domain::types::{ChatMessage, ContextFile, ToolCall, ToolCallResult, ToolSpec};

/// Mutable record threaded through one orchestration run. Owned
/// exclusively by the orchestrator for the run's duration; the session
/// map is borrowed from the caller and never mutated here.
pub struct AgentState<'run> {
    /// The current user utterance. Immutable after creation.
    pub query: String,
    /// Read-only within a run; bounded by the caller.
    pub history: Vec<ChatMessage>,
    /// Read-only within a run.
    pub context_files: Vec<ContextFile>,
    /// Read-only within a run.
    pub available_tools: BTreeMap<String, ToolSpec>,
    /// Borrowed live backend sessions, keyed by connection name.
    pub sessions: &'run SessionMap,
    /// Computed exactly once per run; never recomputed mid-run so every
    /// stage prompt shares a stable "now".
    pub system_context: String,

    pub needs_tools: bool,
    pub requires_vision: bool,
    /// Replaced (not accumulated) each selection round.
    pub selected_calls: Vec<ToolCall>,
    /// Replaced each execution round.
    pub tool_results: Vec<ToolCallResult>,
    /// Incremented only when a selection round actually executed tools.
    pub iteration: u32,
    pub max_iterations: u32,
    pub results_adequate: bool,
    pub refinement_suggestion: Option<String>,
    /// Set exactly once by whichever synthesis variant runs.
    pub final_answer: Option<String>,
}

impl<'run> AgentState<'run> {
    pub(super) fn new(request: QueryRequest<'run>) -> Self {
        Self {
            query: request.query,
            history: request.history,
            context_files: request.context_files,
            available_tools: request.available_tools,
            sessions: request.sessions,
            system_context: context::build_system_context(),
            needs_tools: false,
            requires_vision: false,
            selected_calls: Vec::new(),
            tool_results: Vec::new(),
            iteration: 0,
            max_iterations: request.max_iterations,
            results_adequate: false,
            refinement_suggestion: None,
            final_answer: None,
        }
    }

    pub(super) fn has_uploaded_images(&self) -> bool {
        self.context_files.iter().any(ContextFile::is_image)
    }
}
