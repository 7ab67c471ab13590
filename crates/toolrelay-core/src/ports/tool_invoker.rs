//! Ports between the orchestrator and its collaborators.
//!
//! The orchestrator never talks to the connection pool directly: it invokes
//! tools through [`ToolInvoker`] and returns finished batches to the model
//! through [`ModelHandback`].

use async_trait::async_trait;
use serde_json::Value;

use super::McpError;
use crate::domain::{BatchId, ToolCall, ToolCallResult};

/// Executes a resolved tool call against its owning server.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run the call and return the raw result payload.
    ///
    /// Implementations report every failure as an `Err`; the orchestrator
    /// records it as a `Failed` call and never retries.
    async fn invoke(&self, call: &ToolCall) -> Result<Value, McpError>;
}

/// Receives the results of a completed batch so the model can continue.
///
/// Called at most once per batch and never for cancelled batches. Must not
/// block.
pub trait ModelHandback: Send + Sync {
    fn hand_back(&self, batch_id: &BatchId, results: &[ToolCallResult]);
}

/// Hand-back that drops results, for contexts without a model loop.
#[derive(Debug, Clone, Default)]
pub struct NoopHandback;

impl ModelHandback for NoopHandback {
    fn hand_back(&self, batch_id: &BatchId, results: &[ToolCallResult]) {
        tracing::debug!(%batch_id, results = results.len(), "Discarding batch results");
    }
}
