pub mod ollama;
pub mod traits;
pub mod types;

pub use ollama::OllamaClient;
pub use traits::ModelProvider;
pub use types::{ModelError, ModelRequest, TokenSink};
