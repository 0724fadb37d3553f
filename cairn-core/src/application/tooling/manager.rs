use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::interface::{SessionMap, SessionToolInfo};
use super::session::StdioSession;
use crate::config::ServerConfig;

/// Owns the configured backend connections. The agent borrows the session
/// map per run; lifetime and shutdown of the child processes stay here.
pub struct SessionManager {
    configs: Vec<ServerConfig>,
}

impl SessionManager {
    pub fn new(configs: Vec<ServerConfig>) -> Self {
        Self { configs }
    }

    /// Spawn and initialize every configured backend. Backends that fail
    /// to start are skipped with a warning; the agent degrades to whatever
    /// subset came up.
    pub async fn connect(&self) -> SessionMap {
        let mut sessions: SessionMap = BTreeMap::new();

        for config in &self.configs {
            let session = StdioSession::new(config.clone());
            match session.ensure_running().await {
                Ok(()) => {
                    info!(server = %config.name, "MCP backend connected");
                    sessions.insert(config.name.clone(), Arc::new(session));
                }
                Err(err) => {
                    warn!(server = %config.name, %err, "failed to start MCP backend, skipping");
                }
            }
        }

        sessions
    }

    /// Collect per-backend tool listings in deterministic (sorted
    /// connection-name) order, for the registry adapter. Backends whose
    /// listing fails contribute nothing.
    pub async fn gather_listings(sessions: &SessionMap) -> Vec<(String, Vec<SessionToolInfo>)> {
        let mut listings = Vec::with_capacity(sessions.len());
        for (name, session) in sessions {
            match session.list_tools().await {
                Ok(tools) => {
                    info!(server = %name, tools = tools.len(), "listed backend tools");
                    listings.push((name.clone(), tools));
                }
                Err(err) => {
                    warn!(server = %name, %err, "failed to list backend tools");
                }
            }
        }
        listings
    }
}
