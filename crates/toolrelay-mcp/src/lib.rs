//! MCP tool-server plumbing for toolrelay.
//!
//! Layers, leaves first:
//!
//! - [`transport`] - spawns a server process and shuts it down
//! - [`protocol`] - JSON-RPC 2.0 and MCP payload types
//! - [`client`] - handshake, discovery and invocation over one server's stdio
//! - [`pool`] - fingerprint-keyed connections with retry, backoff and LRU eviction
//! - [`service`] - ties a config source and the pool into a tool catalog and
//!   a `ToolInvoker` for the orchestrator
#![deny(unsafe_code)]

pub mod client;
pub mod pool;
pub mod protocol;
pub mod service;
pub mod transport;

pub use client::{ClientState, McpClient};
pub use pool::{Connection, ConnectionPool, ConnectionSummary, Connector, StdioConnector};
pub use service::{McpService, McpServiceError, ServerValidation};
pub use transport::ProcessTransport;

#[cfg(any(test, feature = "test-utils"))]
pub use pool::MockConnector;
