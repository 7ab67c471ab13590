//! High-level MCP service.
//!
//! Reads server configs from a [`ServerConfigSource`], connects through the
//! [`ConnectionPool`], keeps the merged [`ToolCatalog`] and executes tool
//! calls for the orchestrator via [`ToolInvoker`].

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use toolrelay_core::{
    ConfigSourceError, EventEmitter, McpError, McpErrorInfo, RelayEvent, ServerConfig,
    ServerConfigSource, ToolCall, ToolCatalog, ToolDescriptor, ToolInvoker,
};
use tracing::{debug, info, warn};

use crate::pool::{Connection, ConnectionPool};

/// Errors from service operations.
#[derive(Debug, Error)]
pub enum McpServiceError {
    #[error("Server not found: {0}")]
    NotFound(i64),

    #[error("Server {0} is disabled")]
    Disabled(i64),

    #[error("Invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] ConfigSourceError),

    #[error(transparent)]
    Mcp(#[from] McpError),
}

impl From<McpServiceError> for McpError {
    fn from(err: McpServiceError) -> Self {
        match err {
            McpServiceError::Mcp(e) => e,
            other => Self::Connection(other.to_string()),
        }
    }
}

/// Validation outcome for one configured server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerValidation {
    pub server: ServerConfig,
    pub error: Option<String>,
}

impl ServerValidation {
    pub const fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// MCP service providing catalog discovery and tool execution.
pub struct McpService {
    source: Arc<dyn ServerConfigSource>,
    pool: Arc<ConnectionPool>,
    emitter: Arc<dyn EventEmitter>,
    catalog: RwLock<ToolCatalog>,
}

impl McpService {
    pub fn new(
        source: Arc<dyn ServerConfigSource>,
        pool: Arc<ConnectionPool>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            source,
            pool,
            emitter,
            catalog: RwLock::new(ToolCatalog::default()),
        }
    }

    pub const fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Connect every enabled, valid server and build the first catalog.
    pub async fn initialize(&self) -> Result<ToolCatalog, McpServiceError> {
        let catalog = self.refresh_catalog().await?;
        info!(
            tools = catalog.len(),
            connections = self.pool.len(),
            "MCP service initialized"
        );
        Ok(catalog)
    }

    /// Validate every configured server.
    pub async fn validate_servers(&self) -> Result<Vec<ServerValidation>, McpServiceError> {
        let servers = self.source.list_servers().await?;
        Ok(servers
            .into_iter()
            .map(|server| {
                let error = server.validate().err();
                ServerValidation { server, error }
            })
            .collect())
    }

    /// Re-discover tools across all usable servers.
    ///
    /// Servers connect concurrently. Servers that fail to connect are left
    /// out of the catalog; their failure is reported through events.
    pub async fn refresh_catalog(&self) -> Result<ToolCatalog, McpServiceError> {
        let usable: Vec<ServerConfig> = self
            .validate_servers()
            .await?
            .into_iter()
            .filter_map(|v| {
                if !v.server.enabled {
                    debug!(server = %v.server.name, "Skipping disabled MCP server");
                    return None;
                }
                if let Some(ref error) = v.error {
                    warn!(server = %v.server.name, %error, "Skipping invalid MCP server");
                    return None;
                }
                Some(v.server)
            })
            .collect();

        let connections = join_all(usable.iter().map(|s| self.pool.get_connection(s))).await;

        let mut tools = Vec::new();
        for (server, connection) in usable.iter().zip(&connections) {
            if connection.is_connected() {
                tools.extend(current_tools(server, connection).await);
            }
        }

        let catalog = ToolCatalog::new(tools);
        *self.catalog.write().await = catalog.clone();
        Ok(catalog)
    }

    /// Last discovered catalog.
    pub async fn catalog(&self) -> ToolCatalog {
        self.catalog.read().await.clone()
    }

    /// Tools of one server from the last discovery.
    pub async fn server_tools(&self, server_id: i64) -> Vec<ToolDescriptor> {
        self.catalog
            .read()
            .await
            .for_server(server_id)
            .cloned()
            .collect()
    }

    /// Call a tool on a configured server, connecting on demand.
    pub async fn call_tool(
        &self,
        server_id: i64,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, McpServiceError> {
        let server = self.enabled_server(server_id).await?;
        let connection = self.pool.get_connection(&server).await;

        if !connection.is_connected() {
            let error = connection.last_error().unwrap_or_else(|| {
                McpError::Connection(format!("{} is not connected", server.name))
            });
            return Err(error.into());
        }

        connection
            .call_tool(tool_name, arguments)
            .await
            .map_err(|e| {
                warn!(
                    server = %server.name,
                    tool = %tool_name,
                    error = %e,
                    "MCP tool call failed"
                );
                self.emitter.emit(RelayEvent::server_error(McpErrorInfo::from_error(
                    Some(server.id),
                    &server.name,
                    &e,
                )));
                e.into()
            })
    }

    async fn enabled_server(&self, server_id: i64) -> Result<ServerConfig, McpServiceError> {
        let server = self
            .source
            .get_server(server_id)
            .await
            .map_err(|e| match e {
                ConfigSourceError::NotFound(_) => McpServiceError::NotFound(server_id),
                other => McpServiceError::Config(other),
            })?;

        if !server.enabled {
            return Err(McpServiceError::Disabled(server_id));
        }
        server.validate().map_err(McpServiceError::InvalidConfig)?;
        Ok(server)
    }

    /// Disconnect a server and drop its tools from the catalog.
    ///
    /// Other servers sharing the same connection keep their catalog entries
    /// and reconnect on their next call.
    pub async fn disconnect_server(&self, server_id: i64) -> bool {
        let disconnected = self.pool.disconnect_server(server_id).await;

        let mut catalog = self.catalog.write().await;
        let remaining: ToolCatalog = catalog
            .tools()
            .iter()
            .filter(|t| t.server_id != server_id)
            .cloned()
            .collect();
        *catalog = remaining;

        disconnected
    }

    /// Close every connection.
    pub async fn shutdown(&self) {
        self.pool.cleanup().await;
        *self.catalog.write().await = ToolCatalog::default();
    }
}

/// Tools for `server`, re-listed when the server announced a change.
///
/// A fresh listing replaces the connection's tools so later refreshes see
/// it too. Descriptors are stamped with `server`'s identity: configs that
/// share a fingerprint share one connection but each owns its catalog
/// entries.
async fn current_tools(server: &ServerConfig, connection: &Connection) -> Vec<ToolDescriptor> {
    if let Some(client) = connection.client() {
        if client.tools_stale() {
            match client.list_tools().await {
                Ok(fresh) => {
                    debug!(server = %server.name, tools = fresh.len(), "Re-listed tools");
                    connection.set_tools(fresh);
                }
                Err(e) => warn!(server = %server.name, error = %e, "Failed to re-list tools"),
            }
        }
    }

    let mut tools = connection.tools();
    for tool in &mut tools {
        tool.server_id = server.id;
        tool.server_name.clone_from(&server.name);
    }
    tools
}

#[async_trait]
impl ToolInvoker for McpService {
    async fn invoke(&self, call: &ToolCall) -> Result<Value, McpError> {
        let Some(server_id) = call.server_id else {
            return Err(McpError::Connection(format!(
                "No connected server provides tool '{}'",
                call.name
            )));
        };

        // Namespaced names map back to the server's own tool name
        let tool_name = self
            .catalog
            .read()
            .await
            .resolve(&call.name)
            .filter(|t| t.server_id == server_id)
            .map_or_else(|| call.name.clone(), |t| t.name.clone());

        self.call_tool(server_id, &tool_name, call.arguments.clone())
            .await
            .map_err(McpError::from)
    }
}
