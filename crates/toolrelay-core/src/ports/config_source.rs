//! Configuration store boundary.
//!
//! The relay only reads server configs; persisting them belongs to whoever
//! implements [`ServerConfigSource`].

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ServerConfig;

/// Errors from the configuration store.
#[derive(Debug, Error)]
pub enum ConfigSourceError {
    #[error("Configuration not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration: {0}")]
    Read(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Supplies the list of configured tool servers.
#[async_trait]
pub trait ServerConfigSource: Send + Sync {
    /// All configured servers, enabled or not.
    async fn list_servers(&self) -> Result<Vec<ServerConfig>, ConfigSourceError>;

    /// A single server by ID.
    async fn get_server(&self, id: i64) -> Result<ServerConfig, ConfigSourceError> {
        self.list_servers()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ConfigSourceError::NotFound(format!("server {id}")))
    }
}

/// In-memory config source.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    servers: Vec<ServerConfig>,
}

impl StaticConfigSource {
    pub const fn new(servers: Vec<ServerConfig>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ServerConfigSource for StaticConfigSource {
    async fn list_servers(&self) -> Result<Vec<ServerConfig>, ConfigSourceError> {
        Ok(self.servers.clone())
    }
}
