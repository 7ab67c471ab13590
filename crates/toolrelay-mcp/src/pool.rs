//! Connection pool keyed by server fingerprint.
//!
//! Concurrent `get_connection` calls for one fingerprint are serialized by a
//! per-key async lock, so a server is never spawned twice. Calls for
//! different fingerprints proceed in parallel. The capacity check, LRU
//! eviction and insertion happen under one map lock, so the pool never
//! holds more than `max_connections` live entries.
//!
//! Configs with the same fingerprint share one connection. Every server id
//! that asked for it is recorded as an owner, and disconnecting any owner
//! closes the shared connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{Instant, sleep};
use toolrelay_core::{
    ClientTimeouts, ConnectionId, EventEmitter, McpError, McpErrorInfo, PoolSettings, RelayEvent,
    ServerConfig, ToolDescriptor,
};
use tracing::{debug, error, info, warn};

use crate::client::McpClient;

/// Builds a connected, initialized client for a server config.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &ServerConfig,
        timeouts: ClientTimeouts,
    ) -> Result<McpClient, McpError>;
}

/// Launches servers as child processes over stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioConnector;

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(
        &self,
        config: &ServerConfig,
        timeouts: ClientTimeouts,
    ) -> Result<McpClient, McpError> {
        McpClient::connect(config, timeouts).await
    }
}

enum Link {
    Live(McpClient),
    Failed,
}

/// A pooled link to one server.
///
/// A connection that never came up is still handed to the caller with
/// `is_connected() == false` and the failure in `last_error()`; such
/// connections are not cached.
pub struct Connection {
    id: ConnectionId,
    config: ServerConfig,
    link: Link,
    owners: Mutex<Vec<i64>>,
    tools: RwLock<Vec<ToolDescriptor>>,
    last_used: Mutex<Instant>,
    error_count: AtomicU32,
    last_error: Mutex<Option<McpError>>,
}

impl Connection {
    fn live(id: ConnectionId, config: ServerConfig, client: McpClient, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            owners: Mutex::new(vec![config.id]),
            id,
            config,
            link: Link::Live(client),
            tools: RwLock::new(tools),
            last_used: Mutex::new(Instant::now()),
            error_count: AtomicU32::new(0),
            last_error: Mutex::new(None),
        }
    }

    fn failed(id: ConnectionId, config: ServerConfig, error: McpError) -> Self {
        Self {
            owners: Mutex::new(vec![config.id]),
            id,
            config,
            link: Link::Failed,
            tools: RwLock::new(Vec::new()),
            last_used: Mutex::new(Instant::now()),
            error_count: AtomicU32::new(0),
            last_error: Mutex::new(Some(error)),
        }
    }

    pub const fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Tools from the most recent listing.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_tools(&self, tools: Vec<ToolDescriptor>) {
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
    }

    fn tool_count(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Server ids sharing this connection, in the order they asked for it.
    pub fn server_ids(&self) -> Vec<i64> {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_owned_by(&self, server_id: i64) -> bool {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&server_id)
    }

    fn adopt(&self, server_id: i64) {
        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        if !owners.contains(&server_id) {
            owners.push(server_id);
        }
    }

    pub fn client(&self) -> Option<&McpClient> {
        match &self.link {
            Link::Live(client) => Some(client),
            Link::Failed => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client().is_some_and(McpClient::is_connected)
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn idle(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_used())
    }

    /// Consecutive failed invocations since the last success.
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<McpError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn record_failure(&self, error: &McpError) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
    }

    /// Invoke a tool on this connection, tracking usage and failures.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.touch();

        let Some(client) = self.client() else {
            return Err(self.last_error().unwrap_or_else(|| {
                McpError::Connection(format!("{} is not connected", self.config.name))
            }));
        };

        match client.call_tool(name, arguments).await {
            Ok(value) => {
                self.error_count.store(0, Ordering::SeqCst);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn shutdown(&self) {
        if let Some(client) = self.client() {
            client.disconnect().await;
        }
    }

    fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id.clone(),
            server_id: self.config.id,
            server_name: self.config.name.clone(),
            connected: self.is_connected(),
            tool_count: self.tool_count(),
            error_count: self.error_count(),
            last_error: self.last_error().map(|e| e.to_string()),
            idle_ms: u64::try_from(self.idle().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("server", &self.config.name)
            .field("connected", &self.is_connected())
            .field("tools", &self.tool_count())
            .field("error_count", &self.error_count())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a pooled connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub server_id: i64,
    pub server_name: String,
    pub connected: bool,
    pub tool_count: usize,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub idle_ms: u64,
}

/// Pool of live server connections.
pub struct ConnectionPool {
    settings: PoolSettings,
    connector: Arc<dyn Connector>,
    emitter: Arc<dyn EventEmitter>,
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    key_locks: Mutex<HashMap<ConnectionId, Arc<AsyncMutex<()>>>>,
}

impl ConnectionPool {
    /// Pool that launches servers as stdio child processes.
    pub fn new(settings: PoolSettings, emitter: Arc<dyn EventEmitter>) -> Self {
        Self::with_connector(settings, Arc::new(StdioConnector), emitter)
    }

    pub fn with_connector(
        settings: PoolSettings,
        connector: Arc<dyn Connector>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            settings,
            connector,
            emitter,
            connections: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub const fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn lock_connections(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_key_locks(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<AsyncMutex<()>>>> {
        self.key_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_lock(&self, key: &ConnectionId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.lock_key_locks().entry(key.clone()).or_default())
    }

    /// Drop the lock entry for `key` once no caller holds or awaits it.
    fn prune_key_lock(&self, key: &ConnectionId) {
        let mut locks = self.lock_key_locks();
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    /// Return the cached connection for `config`, building one if needed.
    ///
    /// A cached connection is reused while it is connected and below the
    /// error threshold; otherwise it is shut down and rebuilt. Building
    /// retries with exponential backoff. When every attempt fails, a
    /// disconnected `Connection` carrying the last error is returned and
    /// nothing is cached.
    pub async fn get_connection(&self, config: &ServerConfig) -> Arc<Connection> {
        let key = config.fingerprint();
        let key_lock = self.key_lock(&key);
        let guard = key_lock.lock().await;

        let cached = self.lock_connections().get(&key).cloned();
        if let Some(existing) = cached {
            if existing.is_connected() && existing.error_count() < self.settings.max_error_count {
                existing.touch();
                existing.adopt(config.id);
                return existing;
            }

            debug!(
                server = %config.name,
                connection = %key,
                connected = existing.is_connected(),
                errors = existing.error_count(),
                "Rebuilding stale connection"
            );
            let removed = self.lock_connections().remove(&key);
            if let Some(stale) = removed {
                self.retire(&stale).await;
            }
        }

        let connection = Arc::new(self.establish(config, key.clone()).await);
        if !connection.is_connected() {
            drop(guard);
            drop(key_lock);
            self.prune_key_lock(&key);
            return connection;
        }

        for evicted in self.insert(key, Arc::clone(&connection)) {
            info!(
                server = %evicted.config.name,
                connection = %evicted.id,
                "Evicting least recently used connection"
            );
            self.retire(&evicted).await;
            self.prune_key_lock(&evicted.id);
        }
        connection
    }

    async fn establish(&self, config: &ServerConfig, id: ConnectionId) -> Connection {
        let attempts = self.settings.max_connect_attempts.max(1);
        let mut last_error = McpError::Connection("no connection attempt made".into());

        for attempt in 1..=attempts {
            match self.try_connect(config).await {
                Ok((client, tools)) => {
                    info!(
                        server = %config.name,
                        connection = %id,
                        attempt,
                        tools = tools.len(),
                        "Connected to MCP server"
                    );
                    self.emitter.emit(RelayEvent::server_connected(
                        config.id,
                        &config.name,
                        tools.len(),
                    ));
                    return Connection::live(id, config.clone(), client, tools);
                }
                Err(e) => {
                    warn!(
                        server = %config.name,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "MCP connection attempt failed"
                    );
                    last_error = e;
                    if attempt < attempts {
                        sleep(self.settings.backoff_after(attempt)).await;
                    }
                }
            }
        }

        error!(server = %config.name, error = %last_error, "Giving up on MCP server");
        self.emitter.emit(RelayEvent::server_error(McpErrorInfo::from_error(
            Some(config.id),
            &config.name,
            &last_error,
        )));
        Connection::failed(id, config.clone(), last_error)
    }

    async fn try_connect(
        &self,
        config: &ServerConfig,
    ) -> Result<(McpClient, Vec<ToolDescriptor>), McpError> {
        let client = self.connector.connect(config, self.settings.timeouts).await?;
        match client.list_tools().await {
            Ok(tools) => Ok((client, tools)),
            Err(e) => {
                client.disconnect().await;
                Err(e)
            }
        }
    }

    /// Insert under the map lock, evicting LRU entries to make room.
    fn insert(&self, key: ConnectionId, connection: Arc<Connection>) -> Vec<Arc<Connection>> {
        let mut connections = self.lock_connections();
        let mut evicted = Vec::new();

        while connections.len() >= self.settings.max_connections.max(1) {
            let Some(oldest) = oldest_key(&connections) else {
                break;
            };
            if let Some(old) = connections.remove(&oldest) {
                evicted.push(old);
            }
        }

        connections.insert(key, connection);
        evicted
    }

    async fn retire(&self, connection: &Connection) {
        connection.shutdown().await;
        self.emitter.emit(RelayEvent::server_disconnected(
            connection.config.id,
            &connection.config.name,
        ));
    }

    /// Disconnect and drop the least recently used connection.
    pub async fn evict_oldest_connection(&self) -> Option<ConnectionId> {
        let evicted = {
            let mut connections = self.lock_connections();
            oldest_key(&connections).and_then(|key| connections.remove(&key))
        }?;

        info!(
            server = %evicted.config.name,
            connection = %evicted.id,
            "Evicting least recently used connection"
        );
        self.retire(&evicted).await;
        self.prune_key_lock(&evicted.id);
        Some(evicted.id.clone())
    }

    /// Disconnect every connection owned by `server_id`.
    ///
    /// A connection shared with other configs is closed for all of them.
    /// Returns `false` when the server had no pooled connection.
    pub async fn disconnect_server(&self, server_id: i64) -> bool {
        let keys: Vec<ConnectionId> = self
            .lock_connections()
            .iter()
            .filter(|(_, c)| c.is_owned_by(server_id))
            .map(|(k, _)| k.clone())
            .collect();

        let removed = join_all(keys.iter().map(|k| self.close(k))).await;
        removed.into_iter().any(|closed| closed)
    }

    /// Disconnect everything and empty the pool.
    ///
    /// Each key is closed under its own lock, so a connect already in flight
    /// finishes first and is closed with the rest.
    pub async fn cleanup(&self) {
        let mut keys: Vec<ConnectionId> = self.lock_connections().keys().cloned().collect();
        for key in self.lock_key_locks().keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }

        let closed = join_all(keys.iter().map(|k| self.close(k)))
            .await
            .into_iter()
            .filter(|closed| *closed)
            .count();
        if closed > 0 {
            info!(count = closed, "Closed all MCP connections");
        }
    }

    /// Remove and shut down the connection under `key`, if any.
    async fn close(&self, key: &ConnectionId) -> bool {
        let key_lock = self.key_lock(key);
        let removed = {
            let _guard = key_lock.lock().await;
            let removed = self.lock_connections().remove(key);
            if let Some(connection) = &removed {
                self.retire(connection).await;
            }
            removed
        };
        drop(key_lock);
        self.prune_key_lock(key);
        removed.is_some()
    }

    /// Number of per-key locks currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.lock_key_locks().len()
    }

    /// Cached connection by id.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.lock_connections().get(id).cloned()
    }

    /// Summaries of every cached connection, ordered by server id.
    pub fn connections(&self) -> Vec<ConnectionSummary> {
        let mut summaries: Vec<ConnectionSummary> =
            self.lock_connections().values().map(|c| c.summary()).collect();
        summaries.sort_by(|a, b| a.server_id.cmp(&b.server_id).then(a.id.cmp(&b.id)));
        summaries
    }

    pub fn len(&self) -> usize {
        self.lock_connections().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_connections().is_empty()
    }
}

fn oldest_key(connections: &HashMap<ConnectionId, Arc<Connection>>) -> Option<ConnectionId> {
    connections
        .iter()
        .min_by_key(|(_, c)| c.last_used())
        .map(|(k, _)| k.clone())
}
