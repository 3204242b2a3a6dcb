//! Server configuration file.
//!
//! ```json
//! {"mcpServers": {"sqlite": {"command": "uvx", "args": ["mcp-server-sqlite"], "env": {}}}}
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::errors::McpError;
use super::types::ServerParameters;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "server_config.json";

/// Top-level MCP servers configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct McpServersConfig {
    #[serde(rename = "mcpServers")]
    pub servers: HashMap<String, ServerParameters>,
}

impl McpServersConfig {
    /// Parse configuration text.
    pub fn from_json(text: &str) -> Result<Self, McpError> {
        serde_json::from_str(text).map_err(|e| McpError::ConfigError {
            reason: format!("invalid server config: {e}"),
        })
    }

    /// Names of all configured servers, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validated launch parameters for one server.
    pub fn server_params(&self, name: &str) -> Result<ServerParameters, McpError> {
        let params = self.servers.get(name).ok_or(McpError::ConfigError {
            reason: format!("server '{name}' not found in configuration"),
        })?;
        params.validate()?;
        Ok(params.clone())
    }
}

/// Read and parse a configuration file.
pub fn load_config(path: &Path) -> Result<McpServersConfig, McpError> {
    let text = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    let config = McpServersConfig::from_json(&text)?;
    tracing::debug!(
        path = %path.display(),
        servers = ?config.server_names(),
        "loaded server config"
    );
    Ok(config)
}

/// Launch parameters for `name` from the file at `path`.
pub fn load_server_params(path: &Path, name: &str) -> Result<ServerParameters, McpError> {
    load_config(path)?.server_params(name)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
