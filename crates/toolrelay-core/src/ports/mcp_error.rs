//! Tool protocol error types.
//!
//! This module defines the error taxonomy shared by the protocol client, the
//! connection pool and the orchestrator, plus a user-safe projection used in
//! events.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to a tool server or assembling tool calls.
///
/// `Clone` so the pool can keep the last error on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum McpError {
    /// Process spawn or handshake failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed or unexpected JSON-RPC payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An operation exceeded its time budget.
    #[error("Timed out after {}ms waiting for {operation}", .after.as_millis())]
    Timeout {
        /// The JSON-RPC method that timed out.
        operation: String,
        /// The budget that elapsed.
        after: Duration,
    },

    /// The tool server reported an error result.
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// A streamed argument buffer is not valid JSON.
    #[error("Failed to parse tool arguments: {0}")]
    Parse(String),
}

impl McpError {
    /// Create a timeout error for an operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

/// User-safe error information for events.
///
/// Carried by `RelayEvent::ServerError` so presentation layers can show
/// what went wrong without raw OS errors.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpErrorInfo {
    /// ID of the server (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,

    /// Name of the server.
    pub server_name: String,

    /// User-friendly error message.
    pub message: String,

    /// Error category for UI handling.
    pub category: McpErrorCategory,
}

/// Categories of tool-server errors for UI handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpErrorCategory {
    /// Server process lifecycle error.
    Process,
    /// Protocol communication error.
    Protocol,
    /// A request ran out of time.
    Timeout,
    /// Tool invocation error.
    Tool,
    /// Model output could not be parsed.
    Parse,
}

impl McpErrorInfo {
    /// Project an error for a given server.
    pub fn from_error(
        server_id: Option<i64>,
        server_name: impl Into<String>,
        error: &McpError,
    ) -> Self {
        Self {
            server_id,
            server_name: server_name.into(),
            message: error.to_string(),
            category: McpErrorCategory::from(error),
        }
    }
}

impl From<&McpError> for McpErrorCategory {
    fn from(error: &McpError) -> Self {
        match error {
            McpError::Connection(_) => Self::Process,
            McpError::Protocol(_) => Self::Protocol,
            McpError::Timeout { .. } => Self::Timeout,
            McpError::ToolExecution(_) => Self::Tool,
            McpError::Parse(_) => Self::Parse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = McpError::timeout("initialize", Duration::from_secs(10));
        assert_eq!(
            err.to_string(),
            "Timed out after 10000ms waiting for initialize"
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn test_error_info_category() {
        let err = McpError::ToolExecution("file not found".to_string());
        let info = McpErrorInfo::from_error(Some(2), "fs", &err);
        assert_eq!(info.category, McpErrorCategory::Tool);
        assert!(info.message.contains("file not found"));

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"serverName\":\"fs\""));
        assert!(json.contains("\"category\":\"tool\""));
    }

    #[test]
    fn test_json_error_maps_to_protocol() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(McpError::from(json_err), McpError::Protocol(_)));
    }
}
