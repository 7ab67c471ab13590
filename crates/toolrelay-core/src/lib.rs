//! Core domain types and port definitions for toolrelay.
//!
//! This crate has no knowledge of processes, pipes or model providers. It
//! defines the vocabulary shared by the protocol client, the connection pool
//! and the tool-call orchestrator:
//!
//! - [`domain`] - server configs, tool descriptors, tool calls and their states
//! - [`events`] - the `RelayEvent` union rendered by presentation layers
//! - [`ports`] - traits at the seams (event emission, tool invocation,
//!   configuration source, model hand-back) and the error taxonomy
//! - [`settings`] - pool, client and orchestrator tuning with validation
#![deny(unsafe_code)]

pub mod domain;
pub mod events;
pub mod ports;
pub mod settings;

pub use domain::{
    BatchId, BatchStatus, ConnectionId, EnvEntry, ExecutionState, ServerConfig, ToolCall,
    ToolCallResult, ToolCatalog, ToolDescriptor,
};
pub use events::RelayEvent;
pub use ports::{
    ChannelEmitter, ConfigSourceError, EventEmitter, McpError, McpErrorCategory, McpErrorInfo,
    ModelHandback, NoopEmitter, NoopHandback, ServerConfigSource, StaticConfigSource,
    ToolInvoker,
};
pub use settings::{
    ClientTimeouts, OrchestratorSettings, PoolSettings, RelaySettings, SettingsError,
    validate_settings,
};
