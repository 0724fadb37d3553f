use serde::Deserialize;
use tracing::{error, info, warn};

use super::{Agent, AgentState, parser};
use crate::application::context::{self, prompts};
use crate::infrastructure::model::{ModelProvider, ModelRequest};

#[derive(Debug, Deserialize)]
struct Decision {
    #[serde(default)]
    needs_tools: bool,
    #[serde(default)]
    reasoning: String,
}

impl<P: ModelProvider> Agent<P> {
    /// Decide whether external tools are required, and whether uploaded
    /// images should route to the vision model instead.
    ///
    /// Failure policy is deliberately asymmetric: an empty model response
    /// defaults to `needs_tools = true` (prefer attempting retrieval over
    /// answering from possibly-stale knowledge), while a malformed
    /// response or model error defaults to `needs_tools = false` with no
    /// vision routing (fail closed to the simplest path).
    pub(super) async fn decide(&self, state: &mut AgentState<'_>) {
        let tools_text = context::build_tools_context_detailed(&state.available_tools);
        let history_context =
            context::build_conversation_context(&state.history, self.settings.history_window);
        let files_context = context::build_files_context_summary(&state.context_files);

        info!(
            tools = state.available_tools.len(),
            files = state.context_files.len(),
            "decision stage sees available tools and uploads"
        );

        let prompt = prompts::decide_tools(
            &state.system_context,
            &state.query,
            &tools_text,
            &history_context,
            &files_context,
        );
        let request = ModelRequest::for_stage(&self.settings.stages.decide, prompt);

        let response = match self.provider.complete(request).await {
            Ok(text) => text,
            Err(err) => {
                error!(%err, "tool decision failed");
                state.needs_tools = false;
                state.requires_vision = false;
                return;
            }
        };

        if response.trim().is_empty() {
            warn!("empty response from model, defaulting to needs_tools=true");
            state.needs_tools = true;
            return;
        }

        let parsed = parser::parse_object_from_text(&response)
            .and_then(|value| serde_json::from_value::<Decision>(value).ok());
        let Some(decision) = parsed else {
            error!("tool decision returned unparseable output");
            state.needs_tools = false;
            state.requires_vision = false;
            return;
        };

        state.needs_tools = decision.needs_tools;
        info!(
            needs_tools = decision.needs_tools,
            reasoning = %decision.reasoning,
            "tool decision"
        );

        // Uploaded-image analysis takes precedence over an open-ended
        // "no tools needed" conclusion.
        if state.has_uploaded_images() && !state.needs_tools {
            state.requires_vision = true;
            info!("vision model will be used for uploaded image(s)");
        } else {
            state.requires_vision = false;
        }
    }
}
