use super::app::{AgentConfig, AppConfig, ProviderConfig};
use super::error::ConfigError;
use super::server::RawServer;
use super::stages::StageModels;
use dotenvy::from_filename;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Once;
use tracing::debug;

static ENV_LOADER: Once = Once::new();

/// Raw configuration structure for deserialization from TOML
#[derive(Debug, Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    #[serde(default)]
    pub agent: Option<AgentConfig>,
    #[serde(default)]
    pub stages: Option<StageModels>,
    #[serde(default)]
    pub servers: Vec<RawServer>,
}

/// Ensures environment variables are loaded from config/.env
pub fn ensure_env_loaded() {
    ENV_LOADER.call_once(|| {
        let _ = from_filename("config/.env");
    });
}

/// Load and validate configuration from a file path
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    ensure_env_loaded();
    let config_path = path.unwrap_or_else(|| Path::new(super::CONFIG_PATH));
    read_config(config_path)
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading configuration file");

    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let raw: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate(raw)
}

fn validate(raw: RawConfig) -> Result<AppConfig, ConfigError> {
    let provider = raw.provider.unwrap_or_default();
    if provider.endpoint.trim().is_empty() {
        return Err(ConfigError::MissingEndpoint);
    }

    let stages = raw.stages.unwrap_or_default();
    for (name, stage) in [
        ("decide", &stages.decide),
        ("select", &stages.select),
        ("evaluate", &stages.evaluate),
        ("answer", &stages.answer),
        ("answer_direct", &stages.answer_direct),
        ("vision", &stages.vision),
    ] {
        if stage.model.trim().is_empty() {
            return Err(ConfigError::MissingStageModel { stage: name });
        }
    }

    let mut servers = Vec::with_capacity(raw.servers.len());
    for raw_server in raw.servers {
        if raw_server.name_is_empty() {
            return Err(ConfigError::UnnamedServer);
        }
        servers.push(raw_server.into());
    }

    Ok(AppConfig {
        provider,
        agent: raw.agent.unwrap_or_default(),
        stages,
        servers,
    })
}
