//! MCP protocol client over one server's stdio.
//!
//! A background reader task owns the server's stdout. Requests register a
//! oneshot waiter keyed by request id; the reader resolves waiters by id, so
//! responses may arrive in any order and concurrent requests are fine.
//! When a waiter's time budget runs out its entry is removed and a late
//! response is logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use toolrelay_core::{ClientTimeouts, McpError, ServerConfig, ToolDescriptor};
use tracing::{debug, info, warn};

use crate::protocol::{
    Incoming, InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcReply, JsonRpcRequest, ListToolsResult, McpToolSchema, content_text,
};
use crate::transport::{ProcessTransport, forward_stderr, shutdown_child};

/// Upper bound on `tools/list` pages followed for one discovery.
const MAX_TOOL_PAGES: usize = 64;

type Outcome = Result<Value, JsonRpcError>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<AsyncMutex<Option<Writer>>>;

/// Lifecycle of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<u64, oneshot::Sender<Outcome>>,
    closed: bool,
}

/// State shared between the client handle and its reader task.
struct Shared {
    server: String,
    pending: Mutex<Pending>,
    state: Mutex<ClientState>,
    tools_stale: AtomicBool,
}

impl Shared {
    fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            pending: Mutex::new(Pending::default()),
            state: Mutex::new(ClientState::Connecting),
            tools_stale: AtomicBool::new(false),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ClientState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Register a waiter; fails once the connection is closed.
    fn register(&self, id: u64) -> Result<oneshot::Receiver<Outcome>, McpError> {
        let mut pending = self.pending();
        if pending.closed {
            return Err(McpError::Connection(format!(
                "{} is not connected",
                self.server
            )));
        }
        let (tx, rx) = oneshot::channel();
        pending.waiters.insert(id, tx);
        Ok(rx)
    }

    fn forget(&self, id: u64) {
        self.pending().waiters.remove(&id);
    }

    fn resolve(&self, id: u64, outcome: Outcome) {
        let waiter = self.pending().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                // Receiver may have given up between removal and send
                let _ = tx.send(outcome);
            }
            None => debug!(
                server = %self.server,
                id,
                "Dropping response for unknown or expired request"
            ),
        }
    }

    /// Mark closed and fail every outstanding waiter.
    fn close_pending(&self) -> usize {
        let mut pending = self.pending();
        pending.closed = true;
        let dropped = pending.waiters.len();
        // Dropping the senders wakes receivers with a closed-channel error
        pending.waiters.clear();
        dropped
    }

    /// Called by the reader on EOF or read failure.
    fn connection_lost(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, ClientState::Connecting | ClientState::Connected) {
                *state = ClientState::Disconnected;
            }
        }
        let dropped = self.close_pending();
        if dropped > 0 {
            warn!(
                server = %self.server,
                dropped,
                "MCP server closed its output with requests in flight"
            );
        } else {
            debug!(server = %self.server, "MCP server closed its output");
        }
    }

    fn on_notification(&self, method: &str, params: Option<&Value>) {
        match method {
            "notifications/tools/list_changed" => {
                info!(server = %self.server, "Server reported a changed tool list");
                self.tools_stale.store(true, Ordering::SeqCst);
            }
            "notifications/message" => {
                let level = params
                    .and_then(|p| p.get("level"))
                    .and_then(Value::as_str)
                    .unwrap_or("info");
                let data = params.and_then(|p| p.get("data")).cloned().unwrap_or(Value::Null);
                match level {
                    "warning" | "error" | "critical" | "alert" | "emergency" => {
                        warn!(server = %self.server, level, %data, "Server log message");
                    }
                    _ => debug!(server = %self.server, level, %data, "Server log message"),
                }
            }
            other => debug!(server = %self.server, method = other, "Ignoring notification"),
        }
    }
}

/// Client for one MCP server.
pub struct McpClient {
    server_id: i64,
    shared: Arc<Shared>,
    writer: SharedWriter,
    child: AsyncMutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    timeouts: ClientTimeouts,
    init: OnceLock<InitializeResult>,
}

impl McpClient {
    /// Launch the server process and perform the handshake.
    ///
    /// On failure the process is stopped before the error is returned.
    pub async fn connect(config: &ServerConfig, timeouts: ClientTimeouts) -> Result<Self, McpError> {
        let ProcessTransport {
            child,
            stdin,
            stdout,
            stderr,
        } = ProcessTransport::spawn(config)?;

        let client = Self::attach(config.id, &config.name, stdout, stdin, Some(child), timeouts);
        if let Some(stderr) = stderr {
            client.track(forward_stderr(config.name.clone(), stderr));
        }
        client.finish_connect().await
    }

    /// Perform the handshake over arbitrary byte streams.
    ///
    /// Used for in-process servers; no child process is managed.
    pub async fn connect_streams<R, W>(
        server_id: i64,
        server_name: &str,
        reader: R,
        writer: W,
        timeouts: ClientTimeouts,
    ) -> Result<Self, McpError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::attach(server_id, server_name, reader, writer, None, timeouts)
            .finish_connect()
            .await
    }

    fn attach<R, W>(
        server_id: i64,
        server_name: &str,
        reader: R,
        writer: W,
        child: Option<Child>,
        timeouts: ClientTimeouts,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared::new(server_name));
        let writer: SharedWriter = Arc::new(AsyncMutex::new(Some(Box::new(writer))));
        let reader_task = tokio::spawn(read_loop(
            Arc::clone(&shared),
            Arc::clone(&writer),
            reader,
        ));

        Self {
            server_id,
            shared,
            writer,
            child: AsyncMutex::new(child),
            tasks: Mutex::new(vec![reader_task]),
            next_id: AtomicU64::new(1),
            timeouts,
            init: OnceLock::new(),
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    async fn finish_connect(self) -> Result<Self, McpError> {
        match self.handshake().await {
            Ok(()) => Ok(self),
            Err(e) => {
                warn!(server = %self.shared.server, error = %e, "MCP handshake failed");
                self.close(ClientState::Errored).await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let value = self
            .request("initialize", Some(params), self.timeouts.handshake())
            .await?
            .map_err(|e| McpError::Connection(format!("initialize rejected: {e}")))?;
        let init: InitializeResult = serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("malformed initialize result: {e}")))?;

        self.notify("notifications/initialized", None).await?;
        tokio::time::sleep(self.timeouts.initialized_settle()).await;

        info!(
            server = %self.shared.server,
            protocol = %init.protocol_version,
            remote = ?init.server_info.as_ref().map(|i| i.name.as_str()),
            "MCP server initialized"
        );
        // Handshake runs once per client
        let _ = self.init.set(init);
        self.shared.set_state(ClientState::Connected);
        Ok(())
    }

    /// Send a request and wait up to `budget` for its response.
    ///
    /// The outer error covers transport failures and timeouts; the inner
    /// result carries a JSON-RPC error reply.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        budget: Duration,
    ) -> Result<Outcome, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.shared.register(id)?;

        if let Err(e) = write_message(&self.writer, &JsonRpcRequest::new(id, method, params)).await {
            self.shared.forget(id);
            return Err(e);
        }

        match timeout(budget, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(McpError::Connection(format!(
                "{} closed the connection",
                self.shared.server
            ))),
            Err(_) => {
                self.shared.forget(id);
                warn!(server = %self.shared.server, method, ?budget, "MCP request timed out");
                Err(McpError::timeout(method, budget))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        write_message(&self.writer, &JsonRpcNotification::new(method, params)).await
    }

    /// Discover the server's tools, following pagination cursors.
    ///
    /// A server without the tools capability yields an empty list. The
    /// stale flag is cleared before the first page is requested, so a
    /// `list_changed` that arrives while listing leaves it set.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        if !self.init.get().is_some_and(InitializeResult::supports_tools) {
            debug!(server = %self.shared.server, "Server does not advertise tools");
            return Ok(Vec::new());
        }

        let was_stale = self.shared.tools_stale.swap(false, Ordering::SeqCst);
        let listed = self.list_tool_pages().await;
        if listed.is_err() && was_stale {
            self.shared.tools_stale.store(true, Ordering::SeqCst);
        }
        listed
    }

    async fn list_tool_pages(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let value = self
                .request("tools/list", params, self.timeouts.list_tools())
                .await?
                .map_err(|e| McpError::Protocol(format!("tools/list failed: {e}")))?;
            let page: ListToolsResult = serde_json::from_value(value)
                .map_err(|e| McpError::Protocol(format!("malformed tools/list result: {e}")))?;

            tools.extend(page.tools.into_iter().map(|t| self.describe(t)));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    debug!(server = %self.shared.server, count = tools.len(), "Discovered tools");
                    return Ok(tools);
                }
            }
        }

        Err(McpError::Protocol(format!(
            "tools/list did not finish within {MAX_TOOL_PAGES} pages"
        )))
    }

    fn describe(&self, schema: McpToolSchema) -> ToolDescriptor {
        let mut tool = ToolDescriptor::new(schema.name, self.server_id, &self.shared.server);
        if let Some(desc) = schema.description {
            tool = tool.with_description(desc);
        }
        if let Some(input) = schema.input_schema {
            tool = tool.with_input_schema(input);
        }
        tool
    }

    /// Invoke a tool and return the raw result payload.
    ///
    /// Both a JSON-RPC error and a result flagged `isError` become
    /// `McpError::ToolExecution`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let arguments = match arguments {
            Value::Null => json!({}),
            Value::Object(_) => arguments,
            other => {
                return Err(McpError::ToolExecution(format!(
                    "arguments for '{name}' must be a JSON object, got {other}"
                )));
            }
        };

        debug!(server = %self.shared.server, tool = %name, "Calling MCP tool");
        let result = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
                self.timeouts.call_tool(),
            )
            .await?
            .map_err(|e| McpError::ToolExecution(e.message))?;

        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            let message = content_text(&result).unwrap_or_else(|| "Unknown error".to_string());
            return Err(McpError::ToolExecution(message));
        }

        Ok(result)
    }

    /// Stop the server: close stdin, request termination, force-kill after
    /// the grace period. Idempotent.
    pub async fn disconnect(&self) {
        self.close(ClientState::Disconnected).await;
    }

    async fn close(&self, final_state: ClientState) {
        self.shared.close_pending();
        self.shared.set_state(final_state);

        // EOF on stdin is the first termination request
        drop(self.writer.lock().await.take());

        let child = self.child.lock().await.take();
        if let Some(child) = child {
            match shutdown_child(child, self.timeouts.shutdown_grace()).await {
                Ok(status) => debug!(server = %self.shared.server, %status, "MCP server exited"),
                Err(e) => warn!(server = %self.shared.server, error = %e, "Failed to stop MCP server"),
            }
        }

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }

    pub const fn server_id(&self) -> i64 {
        self.server_id
    }

    pub fn server_name(&self) -> &str {
        &self.shared.server
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Handshake result, once connected.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.init.get()
    }

    /// Whether the server announced a tool-list change since the last
    /// successful `list_tools`.
    pub fn tools_stale(&self) -> bool {
        self.shared.tools_stale.load(Ordering::SeqCst)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        // Child processes are killed on drop; background tasks are not
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_id", &self.server_id)
            .field("server", &self.shared.server)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn write_message<T: Serialize>(writer: &SharedWriter, message: &T) -> Result<(), McpError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');

    let mut guard = writer.lock().await;
    let stream = guard
        .as_mut()
        .ok_or_else(|| McpError::Connection("server stdin is closed".into()))?;
    stream.write_all(line.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_loop<R>(shared: Arc<Shared>, writer: SharedWriter, reader: R)
where
    R: AsyncRead + Send + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(server = %shared.server, error = %e, "Failed to read from MCP server");
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match Incoming::parse(trimmed) {
            Ok(Incoming::Response { id, outcome }) => shared.resolve(id, outcome),
            Ok(Incoming::Notification { method, params }) => {
                shared.on_notification(&method, params.as_ref());
            }
            Ok(Incoming::Request { id, method, .. }) => {
                let reply = if method == "ping" {
                    JsonRpcReply::result(id, json!({}))
                } else {
                    debug!(server = %shared.server, %method, "Rejecting server request");
                    JsonRpcReply::method_not_found(id, &method)
                };
                if let Err(e) = write_message(&writer, &reply).await {
                    debug!(server = %shared.server, error = %e, "Failed to answer server request");
                }
            }
            Err(e) => debug!(server = %shared.server, error = %e, "Skipping non-protocol output"),
        }
    }

    shared.connection_lost();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_after_close_is_rejected() {
        let shared = Shared::new("fs");
        let rx = shared.register(1).unwrap();
        assert_eq!(shared.close_pending(), 1);
        drop(rx);

        assert!(matches!(shared.register(2), Err(McpError::Connection(_))));
    }

    #[tokio::test]
    async fn test_resolve_wakes_waiter_once() {
        let shared = Shared::new("fs");
        let rx = shared.register(9).unwrap();

        shared.resolve(9, Ok(json!("done")));
        // Second response for the same id is dropped
        shared.resolve(9, Ok(json!("again")));

        assert_eq!(rx.await.unwrap(), Ok(json!("done")));
    }

    #[test]
    fn test_connection_lost_keeps_errored_state() {
        let shared = Shared::new("fs");
        shared.set_state(ClientState::Errored);
        shared.connection_lost();
        assert_eq!(shared.state(), ClientState::Errored);

        let shared = Shared::new("fs");
        shared.set_state(ClientState::Connected);
        shared.connection_lost();
        assert_eq!(shared.state(), ClientState::Disconnected);
    }

    #[test]
    fn test_list_changed_marks_tools_stale() {
        let shared = Shared::new("fs");
        shared.on_notification("notifications/tools/list_changed", None);
        assert!(shared.tools_stale.load(Ordering::SeqCst));
    }
}
