use thiserror::Error;

/// Errors that escape the stage pipeline. Stages resolve their own model
/// and tool failures into defaulted state, so only structural faults
/// reach the outer `process_query` catch.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent exceeded the stage transition ceiling of {0}")]
    StageCeiling(usize),
}
