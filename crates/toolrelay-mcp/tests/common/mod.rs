//! In-process MCP server over `tokio::io::duplex` for client and pool tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf, duplex, split,
};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use toolrelay_core::{ClientTimeouts, McpError, ServerConfig};
use toolrelay_mcp::{Connector, McpClient};

type ServerWriter = Arc<AsyncMutex<WriteHalf<DuplexStream>>>;

/// Scripted server behaviour.
///
/// Tools understood by `tools/call`:
/// - `echo` returns its arguments as text
/// - `slow` sleeps `delay_ms` then returns "slow done"
/// - `fail` returns an `isError` result with text "boom"
/// - `explode` returns a JSON-RPC error "upstream exploded"
/// - `hang` never answers
///
/// With `updated_tools` set, the first complete `tools/list` reply is
/// followed at once by `notifications/tools/list_changed`, and later
/// listings serve the updated tools.
#[derive(Debug, Clone)]
pub struct FakeServer {
    pub name: String,
    pub tools: Vec<Value>,
    pub updated_tools: Option<Vec<Value>>,
    pub page_size: Option<usize>,
    pub answer_initialize: bool,
    pub advertise_tools: bool,
    pub announce_list_changed: bool,
    pub ping_after_initialized: bool,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self {
            name: "fake".into(),
            tools: Vec::new(),
            updated_tools: None,
            page_size: None,
            answer_initialize: true,
            advertise_tools: true,
            announce_list_changed: false,
            ping_after_initialized: false,
        }
    }
}

impl FakeServer {
    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: tool_schemas(names),
            ..Self::default()
        }
    }

    /// Switch to `names` after the first listing and announce the change.
    pub fn then_tools(mut self, names: &[&str]) -> Self {
        self.updated_tools = Some(tool_schemas(names));
        self
    }

    pub fn spawn(self) -> (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>, FakeHandle) {
        let (client_side, server_side) = duplex(64 * 1024);
        let received = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(serve(self, server_side, Arc::clone(&received)));
        let (reader, writer) = split(client_side);
        (reader, writer, FakeHandle { received, task })
    }
}

/// Handle to a running fake server.
pub struct FakeHandle {
    received: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl FakeHandle {
    /// Every message the client sent, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|m| m.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Kill the server loop; the client sees EOF.
    pub fn crash(&self) {
        self.task.abort();
    }
}

fn tool_schemas(names: &[&str]) -> Vec<Value> {
    names
        .iter()
        .map(|n| {
            json!({
                "name": n,
                "description": format!("The {n} tool"),
                "inputSchema": {"type": "object", "properties": {}}
            })
        })
        .collect()
}

async fn send(writer: &ServerWriter, message: &Value) {
    let mut line = message.to_string();
    line.push('\n');
    let mut w = writer.lock().await;
    let _ = w.write_all(line.as_bytes()).await;
    let _ = w.flush().await;
}

fn reply(id: Option<Value>, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

async fn serve(server: FakeServer, stream: DuplexStream, received: Arc<Mutex<Vec<Value>>>) {
    let (read, write) = split(stream);
    let writer: ServerWriter = Arc::new(AsyncMutex::new(write));
    let mut lines = BufReader::new(read).lines();
    let mut tools = server.tools.clone();
    let mut update = server.updated_tools.clone();

    // Startup banner on stdout must be tolerated
    send_raw(&writer, "fake server booting").await;

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        received.lock().unwrap().push(message.clone());

        let id = message.get("id").cloned();
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match method.as_str() {
            "initialize" if server.answer_initialize => {
                let capabilities = if server.advertise_tools {
                    json!({"tools": {"listChanged": true}})
                } else {
                    json!({})
                };
                let result = json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {"name": server.name, "version": "0.1.0"},
                    "capabilities": capabilities
                });
                send(&writer, &reply(id, result)).await;
            }
            "notifications/initialized" => {
                if server.announce_list_changed {
                    send(
                        &writer,
                        &json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}),
                    )
                    .await;
                }
                if server.ping_after_initialized {
                    send(&writer, &json!({"jsonrpc": "2.0", "id": "srv-ping", "method": "ping"}))
                        .await;
                }
            }
            "tools/list" => {
                let start: usize = params
                    .get("cursor")
                    .and_then(Value::as_str)
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                let size = server.page_size.unwrap_or(tools.len().max(1));
                let end = (start + size).min(tools.len());
                let page: Vec<Value> = tools[start..end].to_vec();
                let mut result = json!({"tools": page});
                let last_page = end >= tools.len();
                if !last_page {
                    result["nextCursor"] = json!(end.to_string());
                }
                send(&writer, &reply(id, result)).await;

                if last_page {
                    if let Some(next) = update.take() {
                        tools = next;
                        send(
                            &writer,
                            &json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}),
                        )
                        .await;
                    }
                }
            }
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                if name != "hang" {
                    tokio::spawn(handle_call(Arc::clone(&writer), id, name, arguments));
                }
            }
            _ => {}
        }
    }
}

async fn send_raw(writer: &ServerWriter, text: &str) {
    let mut w = writer.lock().await;
    let _ = w.write_all(format!("{text}\n").as_bytes()).await;
    let _ = w.flush().await;
}

async fn handle_call(writer: ServerWriter, id: Option<Value>, name: String, arguments: Value) {
    let text = |t: &str| json!({"content": [{"type": "text", "text": t}]});

    let message = match name.as_str() {
        "echo" => reply(id, text(&arguments.to_string())),
        "slow" => {
            let delay = arguments.get("delay_ms").and_then(Value::as_u64).unwrap_or(100);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            reply(id, text("slow done"))
        }
        "fail" => reply(
            id,
            json!({"content": [{"type": "text", "text": "boom"}], "isError": true}),
        ),
        "explode" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32000, "message": "upstream exploded"}
        }),
        other => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32602, "message": format!("Unknown tool: {other}")}
        }),
    };
    send(&writer, &message).await;
}

/// Connect a client to a fresh fake server with default timeouts.
pub async fn connect(server: FakeServer) -> (McpClient, FakeHandle) {
    let name = server.name.clone();
    let (reader, writer, handle) = server.spawn();
    let client = McpClient::connect_streams(1, &name, reader, writer, ClientTimeouts::default())
        .await
        .expect("fake server handshake");
    (client, handle)
}

/// Connector that serves every config from an in-process fake.
///
/// Servers are looked up by config name; unknown names get `fallback`.
pub struct FakeConnector {
    servers: HashMap<String, FakeServer>,
    fallback: FakeServer,
    delay: Duration,
    connects: AtomicUsize,
    handles: Mutex<Vec<FakeHandle>>,
}

impl FakeConnector {
    pub fn new(fallback: FakeServer) -> Self {
        Self {
            servers: HashMap::new(),
            fallback,
            delay: Duration::ZERO,
            connects: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn with_server(mut self, name: &str, server: FakeServer) -> Self {
        self.servers.insert(name.to_string(), server);
        self
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        config: &ServerConfig,
        timeouts: ClientTimeouts,
    ) -> Result<McpClient, McpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let mut server = self
            .servers
            .get(&config.name)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        server.name.clone_from(&config.name);

        let (reader, writer, handle) = server.spawn();
        self.handles.lock().unwrap().push(handle);
        McpClient::connect_streams(config.id, &config.name, reader, writer, timeouts).await
    }
}

pub fn server_config(id: i64, name: &str) -> ServerConfig {
    ServerConfig::new(id, name, format!("mcp-{name}"), vec!["--stdio".into()])
}
