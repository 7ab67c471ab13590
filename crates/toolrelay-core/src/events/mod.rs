//! Canonical event union for presentation layers.
//!
//! Every state change a UI needs to render flows through [`RelayEvent`]:
//! server connection lifecycle, per-call state changes and batch outcomes.
//!
//! # Wire Format
//!
//! Events are serialized with a `type` tag:
//!
//! ```json
//! { "type": "tool_call_updated", "batchId": "…", "toolCallId": "call_1", "state": "executing" }
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::{BatchId, ExecutionState, ToolCallResult};
use crate::ports::McpErrorInfo;

/// Events emitted by the pool, the service and the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    // ========== Server Events ==========
    /// A server finished its handshake and tool discovery.
    ServerConnected {
        #[serde(rename = "serverId")]
        server_id: i64,
        #[serde(rename = "serverName")]
        server_name: String,
        #[serde(rename = "toolCount")]
        tool_count: usize,
    },

    /// A server connection was closed (explicitly, by eviction or cleanup).
    ServerDisconnected {
        #[serde(rename = "serverId")]
        server_id: i64,
        #[serde(rename = "serverName")]
        server_name: String,
    },

    /// A server failed to connect or a call against it failed.
    ServerError { error: McpErrorInfo },

    // ========== Tool Call Events ==========
    /// A call in the active batch changed state.
    ToolCallUpdated {
        #[serde(rename = "batchId")]
        batch_id: BatchId,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        state: ExecutionState,
        /// Present once the call is terminal.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<ToolCallResult>,
    },

    /// Every call reached a terminal state and results were handed back.
    BatchCompleted {
        #[serde(rename = "batchId")]
        batch_id: BatchId,
        results: Vec<ToolCallResult>,
    },

    /// The batch was aborted; no hand-back happened.
    BatchCancelled {
        #[serde(rename = "batchId")]
        batch_id: BatchId,
        results: Vec<ToolCallResult>,
    },
}

impl RelayEvent {
    /// Create a server connected event.
    pub fn server_connected(server_id: i64, server_name: impl Into<String>, tool_count: usize) -> Self {
        Self::ServerConnected {
            server_id,
            server_name: server_name.into(),
            tool_count,
        }
    }

    /// Create a server disconnected event.
    pub fn server_disconnected(server_id: i64, server_name: impl Into<String>) -> Self {
        Self::ServerDisconnected {
            server_id,
            server_name: server_name.into(),
        }
    }

    /// Create a server error event.
    pub const fn server_error(error: McpErrorInfo) -> Self {
        Self::ServerError { error }
    }

    /// Short event name for logging.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ServerConnected { .. } => "server_connected",
            Self::ServerDisconnected { .. } => "server_disconnected",
            Self::ServerError { .. } => "server_error",
            Self::ToolCallUpdated { .. } => "tool_call_updated",
            Self::BatchCompleted { .. } => "batch_completed",
            Self::BatchCancelled { .. } => "batch_cancelled",
        }
    }
}
