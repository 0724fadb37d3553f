use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Definition of one MCP knowledge backend process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub command: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawServer {
    name: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    workdir: Option<String>,
}

impl RawServer {
    pub(crate) fn name_is_empty(&self) -> bool {
        self.name.trim().is_empty()
    }
}

impl From<RawServer> for ServerConfig {
    fn from(raw: RawServer) -> Self {
        let expand = |s: &str| -> String {
            shellexpand::full(s)
                .map(|cow| cow.into_owned())
                .unwrap_or_else(|_| s.to_string())
        };

        let command = PathBuf::from(expand(&raw.command));
        let workdir = raw.workdir.map(|d| PathBuf::from(expand(&d)));
        let args = raw.args.iter().map(|arg| expand(arg)).collect();

        Self {
            name: raw.name,
            command,
            args,
            env: raw.env,
            workdir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn expands_env_vars_in_command_and_args() {
        unsafe {
            env::set_var("CAIRN_TEST_ROOT", "/opt/backends");
        }

        let raw = RawServer {
            name: "logbook".to_string(),
            command: "${CAIRN_TEST_ROOT}/elog-server".to_string(),
            args: vec!["--root".to_string(), "${CAIRN_TEST_ROOT}".to_string()],
            env: HashMap::new(),
            workdir: None,
        };

        let config = ServerConfig::from(raw);
        let cmd = config.command.to_str().expect("valid utf8");
        assert!(cmd.contains("/opt/backends/elog-server"));
        assert!(config.args.contains(&"/opt/backends".to_string()));

        unsafe {
            env::remove_var("CAIRN_TEST_ROOT");
        }
    }
}
