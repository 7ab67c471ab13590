//! Tool-server domain types.
//!
//! These types describe configured tool servers, the tools they expose and
//! the tool calls a model makes against them, independent of any transport.
//!
//! # Design
//!
//! - `ServerConfig` - Launch configuration for one external tool server
//! - `ConnectionId` - Fingerprint of command + args, the pool key
//! - `ToolDescriptor` - A tool discovered on a server
//! - `ToolCatalog` - Name-to-server resolution over all discovered tools
//! - `ToolCall` - One invocation request produced by the model
//! - `ExecutionState` - Forward-only per-call state machine
//! - `BatchStatus` - Per-turn batch state machine
//! - `ToolCallResult` - Terminal outcome of a call

mod call;
mod server;
mod tool;

pub use call::{BatchId, BatchStatus, ExecutionState, ToolCall, ToolCallResult};
pub use server::{ConnectionId, EnvEntry, ServerConfig};
pub use tool::{ToolCatalog, ToolDescriptor};
