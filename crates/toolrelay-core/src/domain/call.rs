//! Tool calls, their execution states and batch status.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Call ID, unique within its batch.
    pub id: String,

    /// Tool name as emitted by the model (possibly server-namespaced).
    pub name: String,

    /// Parsed arguments. Always a JSON value, `{}` when none were supplied.
    pub arguments: Value,

    /// Server that owns the tool, if resolution succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,
}

impl ToolCall {
    /// Create an unresolved tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            server_id: None,
        }
    }

    /// Attach the owning server.
    #[must_use]
    pub const fn with_server(mut self, server_id: i64) -> Self {
        self.server_id = Some(server_id);
        self
    }

    /// Generate a call ID for calls the model did not name.
    pub fn generate_id() -> String {
        format!("call_{}", Uuid::new_v4().simple())
    }
}

/// Execution state of a single tool call.
///
/// Transitions only move forward:
/// `Pending → Executing → {Succeeded, Failed}`, `Pending → Skipped`, and any
/// non-terminal state `→ Cancelled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Awaiting confirmation
    #[default]
    Pending,
    /// Dispatched to its server
    Executing,
    /// Server returned a result
    Succeeded,
    /// Invocation failed
    Failed,
    /// Declined by the user, never executed
    Skipped,
    /// Aborted with the rest of the batch
    Cancelled,
}

impl ExecutionState {
    /// Whether this state is final.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Whether `self → next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Executing | Self::Skipped | Self::Cancelled
            ) | (
                Self::Executing,
                Self::Succeeded | Self::Failed | Self::Cancelled
            )
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Overall status of the batch of calls from one model turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Tool calls are still being added
    #[default]
    Collecting,
    /// Sealed, waiting for the user to confirm or skip calls
    AwaitingConfirmation,
    /// At least one call has been dispatched
    Executing,
    /// Every call is terminal and results were handed back
    Completed,
    /// Aborted, no hand-back
    Cancelled,
}

impl BatchStatus {
    /// Whether the batch has reached a final status.
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Collecting => "collecting",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Identifier of one batch (one model turn).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Fresh random batch ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// The call this result belongs to.
    pub tool_call_id: String,

    /// Whether the call succeeded.
    pub success: bool,

    /// Raw result payload (if success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error message (if failed, skipped or cancelled).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    /// Create a success result.
    pub fn success(tool_call_id: impl Into<String>, data: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error result.
    pub fn error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
