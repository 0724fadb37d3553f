use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("provider endpoint must not be empty")]
    MissingEndpoint,

    #[error("stage '{stage}' is configured with an empty model name")]
    MissingStageModel { stage: &'static str },

    #[error("MCP server entry is missing a name")]
    UnnamedServer,
}
