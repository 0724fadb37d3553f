//! Model types - Request, Error, and streaming sink contracts

use crate::config::StageModelConfig;
use crate::domain::types::ChatMessage;
use reqwest::StatusCode;
use thiserror::Error;

/// One completion request to a model provider.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
    /// Base64 image payloads attached to the user message (vision models).
    pub images: Vec<String>,
}

impl ModelRequest {
    /// Single-user-message request for the given stage's model assignment.
    pub fn for_stage(stage: &StageModelConfig, prompt: impl Into<String>) -> Self {
        Self {
            model: stage.model.clone(),
            temperature: stage.temperature,
            messages: vec![ChatMessage::user(prompt)],
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

/// Receiver for incremental answer fragments. The concatenation of all
/// fragments delivered to the sink equals the text returned by the call.
pub trait TokenSink: Send + Sync {
    fn on_token(&self, fragment: &str);
}

/// Model errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error calling provider '{provider}': {source}")]
    Network {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("provider '{provider}' returned invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ModelError {
    pub fn network(provider: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            provider: provider.into(),
            source,
        }
    }

    pub fn invalid_response(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Short description suitable for embedding in a user-visible answer.
    pub fn user_message(&self) -> String {
        match self {
            ModelError::Network { provider, source } => {
                if source.is_connect() {
                    format!("could not connect to model provider '{provider}'")
                } else if source.is_timeout() {
                    format!("request to model provider '{provider}' timed out")
                } else if let Some(status) = source.status() {
                    match status {
                        StatusCode::NOT_FOUND => {
                            format!("model endpoint on '{provider}' was not found")
                        }
                        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                            format!("model provider '{provider}' is unavailable")
                        }
                        _ => format!(
                            "request to model provider '{provider}' failed with status {}",
                            status.as_u16()
                        ),
                    }
                } else {
                    format!("network error talking to model provider '{provider}'")
                }
            }
            ModelError::InvalidResponse { provider, .. } => {
                format!("model provider '{provider}' returned an invalid response")
            }
        }
    }
}
