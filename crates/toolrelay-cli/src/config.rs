//! JSON configuration file.
//!
//! ```json
//! {
//!   "servers": [
//!     { "id": 1, "name": "Files", "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"] }
//!   ],
//!   "settings": { "pool": { "max_connections": 4 } }
//! }
//! ```

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use toolrelay_core::{
    ConfigSourceError, RelaySettings, ServerConfig, ServerConfigSource, validate_settings,
};

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub servers: Vec<ServerConfig>,
    pub settings: RelaySettings,
}

impl RelayConfig {
    /// Parse and validate file contents.
    pub fn parse(text: &str) -> Result<Self, ConfigSourceError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigSourceError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings and server id uniqueness.
    ///
    /// Individual server configs are validated later, per server, so one
    /// bad entry does not disable the rest.
    pub fn validate(&self) -> Result<(), ConfigSourceError> {
        validate_settings(&self.settings).map_err(|e| ConfigSourceError::Invalid(e.to_string()))?;

        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.id) {
                return Err(ConfigSourceError::Invalid(format!(
                    "duplicate server id {}",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigSourceError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ConfigSourceError::NotFound(path.display().to_string())
            } else {
                ConfigSourceError::Read(format!("{}: {e}", path.display()))
            }
        })?;
        Self::parse(&text)
    }
}

/// Server configs read from a JSON file on every lookup.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ServerConfigSource for FileConfigSource {
    async fn list_servers(&self) -> Result<Vec<ServerConfig>, ConfigSourceError> {
        Ok(RelayConfig::load(&self.path).await?.servers)
    }
}
