use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::{Agent, AgentState, parser};
use crate::application::context::prompts;
use crate::domain::types::ToolCallResult;
use crate::infrastructure::model::{ModelProvider, ModelRequest};

/// Per-tool cap on the data rendered into the evaluation prompt, to keep
/// prompt size bounded with several results present.
const MAX_RESULT_CHARS: usize = 10_000;

fn default_adequate() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Evaluation {
    #[serde(default = "default_adequate")]
    adequate: bool,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    refinement: String,
}

impl<P: ModelProvider> Agent<P> {
    /// Judge whether the executed tool results suffice to answer the
    /// query. The iteration budget is accounted here: only rounds that
    /// actually executed tools consume it, and once exhausted, adequacy
    /// is forced no matter what the model says. Fails open on any model
    /// or parse failure.
    pub(super) async fn evaluate(&self, state: &mut AgentState<'_>) {
        if !state.tool_results.is_empty() {
            state.iteration += 1;
            info!(
                iteration = state.iteration,
                max_iterations = state.max_iterations,
                "tool execution iteration"
            );
        } else {
            warn!("no tools were executed (empty selection), not counting as iteration");
        }

        // Nothing to evaluate: absence of tool calls is not a failure
        // state, so proceed to synthesis without forcing a retry.
        if state.tool_results.is_empty() {
            warn!("no tools were executed, treating as adequate");
            state.results_adequate = true;
            state.refinement_suggestion = None;
            return;
        }

        let successful: Vec<&ToolCallResult> =
            state.tool_results.iter().filter(|r| r.success).collect();

        if successful.is_empty() {
            let error_text = state
                .tool_results
                .iter()
                .filter(|r| !r.success)
                .map(|r| {
                    format!("- {}: {}", r.tool, r.error.as_deref().unwrap_or("Unknown error"))
                })
                .collect::<Vec<_>>()
                .join("\n");

            if state.iteration >= state.max_iterations {
                warn!(
                    max_iterations = state.max_iterations,
                    "all tool calls failed, but max iterations reached"
                );
                state.results_adequate = true;
                state.refinement_suggestion =
                    Some(format!("All tool calls failed:\n{error_text}"));
            } else {
                state.results_adequate = false;
                state.refinement_suggestion = Some(format!(
                    "All tool calls failed with errors:\n{error_text}\n\n\
                     Please adjust your tool parameters based on the error messages above."
                ));
            }
            return;
        }

        let mut summaries = Vec::with_capacity(successful.len());
        for result in &successful {
            let data = result.data.clone().unwrap_or(Value::Null);
            let pretty = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
            summaries.push(format!(
                "Tool: {}\nData: {}",
                result.tool,
                truncate_chars(&pretty, MAX_RESULT_CHARS)
            ));
        }
        let summary_text = summaries.join("\n\n");

        let tool_calls_text = state
            .selected_calls
            .iter()
            .map(|call| format!("- {} with arguments: {}", call.tool_name, call.arguments))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = prompts::evaluate_results(
            &state.system_context,
            &state.query,
            &summary_text,
            &tool_calls_text,
        );
        let request = ModelRequest::for_stage(&self.settings.stages.evaluate, prompt);

        let response = match self.provider.complete(request).await {
            Ok(text) => text,
            Err(err) => {
                error!(%err, "evaluation failed, proceeding anyway");
                state.results_adequate = true;
                return;
            }
        };

        if response.trim().is_empty() {
            warn!("empty response from model for evaluation, proceeding");
            state.results_adequate = true;
            return;
        }

        let parsed = parser::parse_object_with_key(&response, "adequate")
            .and_then(|value| serde_json::from_value::<Evaluation>(value).ok());
        let Some(evaluation) = parsed else {
            error!("evaluation returned unparseable output, proceeding");
            state.results_adequate = true;
            return;
        };

        let mut adequate = evaluation.adequate;
        // The hard ceiling always wins over model judgment.
        if state.iteration >= state.max_iterations && !adequate {
            info!(
                max_iterations = state.max_iterations,
                "max iterations reached, proceeding to answer"
            );
            adequate = true;
        }

        state.results_adequate = adequate;
        state.refinement_suggestion = if evaluation.refinement.is_empty() {
            None
        } else {
            Some(evaluation.refinement)
        };

        info!(adequate, reasoning = %evaluation.reasoning, "results evaluated");
    }
}

/// Truncate to at most `max_chars` characters, never splitting a char.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
