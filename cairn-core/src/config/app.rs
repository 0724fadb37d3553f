use super::error::ConfigError;
use super::server::ServerConfig;
use super::stages::StageModels;
use serde::Deserialize;
use std::path::Path;

/// Application configuration loaded from cairn.toml
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub agent: AgentConfig,
    pub stages: StageModels,
    pub servers: Vec<ServerConfig>,
}

impl AppConfig {
    /// Load configuration from a file path (or default path if None)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        super::loader::load_config(path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            agent: AgentConfig::default(),
            stages: StageModels::default(),
            servers: Vec::new(),
        }
    }
}

/// Model-serving endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub endpoint: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
        }
    }
}

/// Budgets and timeouts for one agent run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub history_window: usize,
    pub tool_call_timeout_secs: u64,
    pub model_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            history_window: 10,
            tool_call_timeout_secs: 60,
            model_timeout_secs: 300,
        }
    }
}
