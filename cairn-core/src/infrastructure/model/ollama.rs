//! Ollama client implementation

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::ModelProvider;
use super::types::{ModelError, ModelRequest, TokenSink};
use crate::domain::types::{ChatMessage, MessageRole};

const PROVIDER_ID: &str = "ollama";

/// Client for an Ollama-compatible chat endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    endpoint: String,
    http: Client,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.endpoint.trim_end_matches('/'))
    }

    fn build_payload(&self, request: &ModelRequest, stream: bool) -> OllamaChatRequest {
        let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            messages.push(to_ollama_message(message, &request.images));
        }
        OllamaChatRequest {
            model: request.model.clone(),
            messages,
            stream,
            options: OllamaOptions {
                temperature: request.temperature,
            },
        }
    }
}

/// Images attach to the last user message, per the Ollama chat convention.
fn to_ollama_message(message: &ChatMessage, images: &[String]) -> Value {
    let mut value = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if message.role == MessageRole::User && !images.is_empty() {
        if let Some(map) = value.as_object_mut() {
            map.insert("images".to_string(), json!(images));
        }
    }
    value
}

#[async_trait]
impl ModelProvider for OllamaClient {
    async fn complete(&self, request: ModelRequest) -> Result<String, ModelError> {
        let payload = self.build_payload(&request, false);

        info!(
            provider = PROVIDER_ID,
            model = request.model.as_str(),
            messages = request.messages.len(),
            images = request.images.len(),
            "Sending chat request to Ollama"
        );

        let response: OllamaChatResponse = self
            .http
            .post(self.chat_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ModelError::network(PROVIDER_ID, e))?
            .error_for_status()
            .map_err(|e| ModelError::network(PROVIDER_ID, e))?
            .json()
            .await
            .map_err(|e| ModelError::network(PROVIDER_ID, e))?;
        debug!("Received response from Ollama");

        let content = response
            .message
            .ok_or_else(|| ModelError::invalid_response(PROVIDER_ID, "missing message"))?
            .content;

        Ok(content)
    }

    async fn complete_streaming(
        &self,
        request: ModelRequest,
        sink: &dyn TokenSink,
    ) -> Result<String, ModelError> {
        let payload = self.build_payload(&request, true);

        info!(
            provider = PROVIDER_ID,
            model = request.model.as_str(),
            "Sending streaming chat request to Ollama"
        );

        let response = self
            .http
            .post(self.chat_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ModelError::network(PROVIDER_ID, e))?
            .error_for_status()
            .map_err(|e| ModelError::network(PROVIDER_ID, e))?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| ModelError::network(PROVIDER_ID, e))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // Ollama streams newline-delimited JSON objects.
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<OllamaChatResponse>(line) {
                    Ok(parsed) => {
                        if let Some(message) = parsed.message {
                            if !message.content.is_empty() {
                                sink.on_token(&message.content);
                                full.push_str(&message.content);
                            }
                        }
                    }
                    Err(source) => {
                        warn!(%source, line, "skipping malformed stream line from Ollama");
                    }
                }
            }
        }

        debug!(chars = full.len(), "Streamed response from Ollama complete");
        Ok(full)
    }
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Value>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}
