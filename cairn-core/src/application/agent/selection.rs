use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{Agent, AgentState, parser};
use crate::application::context::{self, prompts};
use crate::domain::types::ToolCall;
use crate::infrastructure::model::{ModelProvider, ModelRequest};

/// Courtesy delay before refinement rounds, so tight retry loops don't
/// hammer the model-serving backend.
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct Selection {
    #[serde(default)]
    tools: Vec<ToolCall>,
}

impl<P: ModelProvider> Agent<P> {
    /// Ask the model to propose zero or more tool invocations. Any parse
    /// failure or empty response yields an empty selection; this stage
    /// never errors.
    pub(super) async fn select(&self, state: &mut AgentState<'_>) {
        // The evaluation routing should already prevent this, but the
        // stage is independently safe.
        if state.iteration >= state.max_iterations {
            warn!(
                max_iterations = state.max_iterations,
                "already at max iterations in selection, forcing empty selection to stop"
            );
            state.selected_calls.clear();
            return;
        }

        if state.iteration > 0 {
            tokio::time::sleep(RETRY_DELAY).await;
            debug!(iteration = state.iteration, "retry attempt after delay");
        }

        let tools_text = context::build_tools_context_detailed(&state.available_tools);
        let history_context =
            context::build_conversation_context(&state.history, self.settings.history_window);
        let refinement_context = context::build_refinement_context(
            state.iteration,
            state.refinement_suggestion.as_deref(),
        );

        let prompt = prompts::select_tools(
            &state.system_context,
            &state.query,
            &tools_text,
            &history_context,
            &refinement_context,
        );
        let request = ModelRequest::for_stage(&self.settings.stages.select, prompt);

        let response = match self.provider.complete(request).await {
            Ok(text) => text,
            Err(err) => {
                error!(%err, "tool selection failed");
                state.selected_calls.clear();
                return;
            }
        };

        if response.trim().is_empty() {
            error!("empty response from model for tool selection");
            state.selected_calls.clear();
            return;
        }

        let parsed = parser::parse_object_with_key(&response, "tools")
            .and_then(|value| serde_json::from_value::<Selection>(value).ok());
        match parsed {
            Some(selection) => {
                info!(count = selection.tools.len(), "selected tools");
                state.selected_calls = selection.tools;
            }
            None => {
                error!(response = %response, "tool selection returned unparseable output");
                state.selected_calls.clear();
            }
        }
    }
}
