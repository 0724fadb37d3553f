//! The agent control loop: a finite-state pipeline that decides tool
//! necessity, selects and executes tool calls against live backend
//! sessions, judges result adequacy under a hard iteration budget, and
//! synthesizes a grounded answer. Every stage is a total function over
//! [`AgentState`]; the pipeline always terminates with *some* answer.

mod decision;
mod errors;
mod evaluation;
mod execution;
mod parser;
mod selection;
mod state;
mod synthesis;

#[cfg(test)]
mod tests;

pub use errors::AgentError;
pub use state::AgentState;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::tooling::SessionMap;
use crate::config::{AppConfig, StageModels};
use crate::domain::types::{ChatMessage, ContextFile, ToolSpec};
use crate::infrastructure::model::{ModelError, ModelProvider, ModelRequest, TokenSink};

/// Defensive outer bound on pipeline transitions, independent of the
/// selection/evaluation iteration budget.
const MAX_STAGE_TRANSITIONS: usize = 30;

const NO_ANSWER: &str = "No answer generated";

/// Tunables for one agent instance, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub stages: StageModels,
    pub history_window: usize,
    pub tool_call_timeout: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            stages: config.stages.clone(),
            history_window: config.agent.history_window,
            tool_call_timeout: Duration::from_secs(config.agent.tool_call_timeout_secs),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Everything one run needs: the query, the flattened tool registry, the
/// borrowed live sessions, the iteration budget, and conversational
/// context. Sessions stay owned by the caller.
pub struct QueryRequest<'run> {
    pub query: String,
    pub available_tools: BTreeMap<String, ToolSpec>,
    pub sessions: &'run SessionMap,
    pub max_iterations: u32,
    pub history: Vec<ChatMessage>,
    pub context_files: Vec<ContextFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Decide,
    Select,
    Execute,
    Evaluate,
    AnswerWithTools,
    AnswerNoTools,
    AnswerVision,
}

pub struct Agent<P: ModelProvider> {
    provider: Arc<P>,
    settings: AgentSettings,
}

impl<P: ModelProvider> Agent<P> {
    pub fn new(provider: Arc<P>, settings: AgentSettings) -> Self {
        Self { provider, settings }
    }

    /// Process one user query to completion. Never fails: every internal
    /// failure resolves to a best-effort answer string, with an explicit
    /// error description as the last resort.
    pub async fn process_query(
        &self,
        request: QueryRequest<'_>,
        sink: Option<&dyn TokenSink>,
    ) -> String {
        let run_id = Uuid::new_v4();
        info!(run = %run_id, query_chars = request.query.len(), "agent run started");
        match self.run(request, sink).await {
            Ok(answer) => answer,
            Err(err) => {
                error!(run = %run_id, %err, "agent run failed");
                format!("Error processing query: {err}")
            }
        }
    }

    async fn run(
        &self,
        request: QueryRequest<'_>,
        sink: Option<&dyn TokenSink>,
    ) -> Result<String, AgentError> {
        let mut state = AgentState::new(request);
        let mut stage = Stage::Decide;
        let mut transitions = 0usize;

        loop {
            transitions += 1;
            if transitions > MAX_STAGE_TRANSITIONS {
                return Err(AgentError::StageCeiling(MAX_STAGE_TRANSITIONS));
            }
            debug!(stage = ?stage, transitions, "entering stage");

            stage = match stage {
                Stage::Decide => {
                    self.decide(&mut state).await;
                    route_after_decision(&state)
                }
                Stage::Select => {
                    self.select(&mut state).await;
                    Stage::Execute
                }
                Stage::Execute => {
                    self.execute(&mut state).await;
                    Stage::Evaluate
                }
                Stage::Evaluate => {
                    self.evaluate(&mut state).await;
                    route_after_evaluation(&state)
                }
                Stage::AnswerWithTools => {
                    self.answer_with_tools(&mut state, sink).await;
                    break;
                }
                Stage::AnswerNoTools => {
                    self.answer_no_tools(&mut state, sink).await;
                    break;
                }
                Stage::AnswerVision => {
                    self.answer_with_vision(&mut state, sink).await;
                    break;
                }
            };
        }

        info!(
            iterations = state.iteration,
            tool_calls = state.tool_results.len(),
            "agent run complete"
        );
        Ok(state.final_answer.unwrap_or_else(|| NO_ANSWER.to_string()))
    }

    async fn run_completion(
        &self,
        request: ModelRequest,
        sink: Option<&dyn TokenSink>,
    ) -> Result<String, ModelError> {
        match sink {
            Some(sink) => self.provider.complete_streaming(request, sink).await,
            None => self.provider.complete(request).await,
        }
    }
}

/// Vision routing takes priority over tool use; plain knowledge answers
/// are the default.
fn route_after_decision(state: &AgentState<'_>) -> Stage {
    if state.requires_vision {
        return Stage::AnswerVision;
    }
    if state.needs_tools {
        return Stage::Select;
    }
    Stage::AnswerNoTools
}

fn route_after_evaluation(state: &AgentState<'_>) -> Stage {
    if state.results_adequate {
        return Stage::AnswerWithTools;
    }
    if state.iteration >= state.max_iterations {
        warn!(
            max_iterations = state.max_iterations,
            "max iterations reached, proceeding to answer anyway"
        );
        return Stage::AnswerWithTools;
    }
    Stage::Select
}
