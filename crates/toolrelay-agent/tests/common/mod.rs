//! Scripted invokers and hand-back recorders for orchestrator tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedReceiver;
use toolrelay_agent::ToolOrchestrator;
use toolrelay_core::{
    BatchId, ChannelEmitter, McpError, ModelHandback, OrchestratorSettings, RelayEvent, ToolCall,
    ToolCallResult, ToolInvoker,
};

/// Invoker that records call names.
///
/// Tool `fail` returns a tool error; every other tool echoes its arguments.
#[derive(Debug, Default)]
pub struct RecordingInvoker {
    pub delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl RecordingInvoker {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolInvoker for RecordingInvoker {
    async fn invoke(&self, call: &ToolCall) -> Result<Value, McpError> {
        self.calls.lock().unwrap().push(call.id.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match call.name.as_str() {
            "fail" => Err(McpError::ToolExecution("nope".into())),
            _ => Ok(json!({ "echo": call.arguments })),
        }
    }
}

/// Invoker that blocks every call until released.
#[derive(Debug, Default)]
pub struct GatedInvoker {
    pub gate: Notify,
}

#[async_trait]
impl ToolInvoker for GatedInvoker {
    async fn invoke(&self, call: &ToolCall) -> Result<Value, McpError> {
        self.gate.notified().await;
        Ok(json!({ "released": call.id }))
    }
}

/// Hand-back that keeps every batch it receives.
#[derive(Debug, Default)]
pub struct RecordingHandback {
    batches: Mutex<Vec<(BatchId, Vec<ToolCallResult>)>>,
}

impl RecordingHandback {
    pub fn batches(&self) -> Vec<(BatchId, Vec<ToolCallResult>)> {
        self.batches.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

impl ModelHandback for RecordingHandback {
    fn hand_back(&self, batch_id: &BatchId, results: &[ToolCallResult]) {
        self.batches
            .lock()
            .unwrap()
            .push((batch_id.clone(), results.to_vec()));
    }
}

pub struct Harness {
    pub orchestrator: ToolOrchestrator,
    pub handback: Arc<RecordingHandback>,
    pub events: UnboundedReceiver<RelayEvent>,
}

pub fn harness(invoker: Arc<dyn ToolInvoker>, auto_complete: bool) -> Harness {
    let (emitter, events) = ChannelEmitter::new();
    let handback = Arc::new(RecordingHandback::default());
    let orchestrator = ToolOrchestrator::new(
        invoker,
        handback.clone(),
        Arc::new(emitter),
        OrchestratorSettings {
            auto_complete,
            settle_delay_ms: 1_000,
        },
    );
    Harness {
        orchestrator,
        handback,
        events,
    }
}

pub fn drain(events: &mut UnboundedReceiver<RelayEvent>) -> Vec<RelayEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn completions(events: &[RelayEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, RelayEvent::BatchCompleted { .. }))
        .count()
}

/// A call already resolved to server 1.
pub fn call(id: &str, name: &str) -> ToolCall {
    ToolCall::new(id, name, json!({ "id": id })).with_server(1)
}
