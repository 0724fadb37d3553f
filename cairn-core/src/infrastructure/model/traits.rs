//! Model provider trait

use super::types::{ModelError, ModelRequest, TokenSink};
use async_trait::async_trait;

/// Trait for model provider implementations. Streaming is purely a
/// presentation concern: both methods must produce identical text for the
/// same request.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Run a completion and return the full response text.
    async fn complete(&self, request: ModelRequest) -> Result<String, ModelError>;

    /// Run a completion, forwarding each fragment to `sink` as it arrives,
    /// and return the full concatenated text. The default implementation
    /// falls back to a single non-streamed completion delivered as one
    /// fragment.
    async fn complete_streaming(
        &self,
        request: ModelRequest,
        sink: &dyn TokenSink,
    ) -> Result<String, ModelError> {
        let text = self.complete(request).await?;
        if !text.is_empty() {
            sink.on_token(&text);
        }
        Ok(text)
    }
}
