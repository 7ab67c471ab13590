//! Tool-call batch orchestration.
//!
//! One batch is active at a time. Calls move through
//! `pending -> executing -> succeeded | failed`, or `pending -> skipped` /
//! `pending -> cancelled`. The batch moves through
//! `collecting -> awaiting_confirmation -> executing -> completed`, or to
//! `cancelled` from any open state.
//!
//! Batch state lives behind a plain mutex that is never held across an
//! await: invocations run unlocked and their outcomes are recorded
//! afterwards, so a cancel that lands mid-call still sees the call finish.
//! Events and the model hand-back are delivered after the lock is released.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use toolrelay_core::{
    BatchId, BatchStatus, EventEmitter, ExecutionState, McpError, ModelHandback,
    OrchestratorSettings, RelayEvent, ToolCall, ToolCallResult, ToolInvoker,
};
use tracing::{debug, info, warn};

const SKIPPED_MESSAGE: &str = "Skipped by user";
const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// Errors from orchestrator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("No active batch")]
    NoActiveBatch,

    #[error("Batch {0} is still open")]
    BatchInProgress(BatchId),

    #[error("Unknown tool call: {0}")]
    UnknownToolCall(String),

    #[error("Tool call {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ExecutionState,
        to: ExecutionState,
    },

    #[error("Duplicate tool call id: {0}")]
    DuplicateToolCall(String),

    #[error("Operation not allowed while batch is {0}")]
    InvalidBatchStatus(BatchStatus),

    #[error("Batch has {0} unfinished tool calls")]
    BatchIncomplete(usize),
}

/// Rendering view of one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub call: ToolCall,
    pub state: ExecutionState,
    pub result: Option<ToolCallResult>,
}

/// Rendering view of the active batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub id: BatchId,
    pub status: BatchStatus,
    pub opened_at: DateTime<Utc>,
    pub calls: Vec<CallSnapshot>,
}

impl BatchSnapshot {
    pub fn call(&self, tool_call_id: &str) -> Option<&CallSnapshot> {
        self.calls.iter().find(|c| c.call.id == tool_call_id)
    }

    /// Number of calls currently in `state`.
    pub fn count(&self, state: ExecutionState) -> usize {
        self.calls.iter().filter(|c| c.state == state).count()
    }
}

struct CallEntry {
    call: ToolCall,
    state: ExecutionState,
    result: Option<ToolCallResult>,
}

impl CallEntry {
    fn updated_event(&self, batch_id: &BatchId) -> RelayEvent {
        RelayEvent::ToolCallUpdated {
            batch_id: batch_id.clone(),
            tool_call_id: self.call.id.clone(),
            state: self.state,
            result: self.result.clone(),
        }
    }
}

struct Batch {
    id: BatchId,
    status: BatchStatus,
    opened_at: DateTime<Utc>,
    calls: Vec<CallEntry>,
    settle: Option<JoinHandle<()>>,
}

impl Batch {
    fn new() -> Self {
        Self {
            id: BatchId::new(),
            status: BatchStatus::Collecting,
            opened_at: Utc::now(),
            calls: Vec::new(),
            settle: None,
        }
    }

    fn ensure_open(&self) -> Result<(), OrchestratorError> {
        if self.status.is_closed() {
            return Err(OrchestratorError::InvalidBatchStatus(self.status));
        }
        Ok(())
    }

    /// Sealed and not yet closed.
    fn ensure_sealed(&self) -> Result<(), OrchestratorError> {
        match self.status {
            BatchStatus::AwaitingConfirmation | BatchStatus::Executing => Ok(()),
            other => Err(OrchestratorError::InvalidBatchStatus(other)),
        }
    }

    fn transition(
        &mut self,
        tool_call_id: &str,
        to: ExecutionState,
    ) -> Result<&mut CallEntry, OrchestratorError> {
        let entry = self
            .calls
            .iter_mut()
            .find(|e| e.call.id == tool_call_id)
            .ok_or_else(|| OrchestratorError::UnknownToolCall(tool_call_id.to_string()))?;

        if !entry.state.can_transition_to(to) {
            return Err(OrchestratorError::InvalidTransition {
                id: tool_call_id.to_string(),
                from: entry.state,
                to,
            });
        }
        entry.state = to;
        Ok(entry)
    }

    fn unfinished(&self) -> usize {
        self.calls.iter().filter(|e| !e.state.is_terminal()).count()
    }

    fn results(&self) -> Vec<ToolCallResult> {
        self.calls.iter().filter_map(|e| e.result.clone()).collect()
    }

    fn cancel_settle(&mut self) {
        if let Some(timer) = self.settle.take() {
            timer.abort();
        }
    }

    fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            id: self.id.clone(),
            status: self.status,
            opened_at: self.opened_at,
            calls: self
                .calls
                .iter()
                .map(|e| CallSnapshot {
                    call: e.call.clone(),
                    state: e.state,
                    result: e.result.clone(),
                })
                .collect(),
        }
    }
}

struct Inner {
    invoker: Arc<dyn ToolInvoker>,
    handback: Arc<dyn ModelHandback>,
    emitter: Arc<dyn EventEmitter>,
    settle_delay: Duration,
    auto_complete: AtomicBool,
    batch: Mutex<Option<Batch>>,
}

/// Drives tool-call batches from confirmation to hand-back.
///
/// Cheap to clone; clones share the same active batch. Methods that may
/// start the auto-complete timer must run inside a Tokio runtime.
#[derive(Clone)]
pub struct ToolOrchestrator {
    inner: Arc<Inner>,
}

impl ToolOrchestrator {
    pub fn new(
        invoker: Arc<dyn ToolInvoker>,
        handback: Arc<dyn ModelHandback>,
        emitter: Arc<dyn EventEmitter>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                invoker,
                handback,
                emitter,
                settle_delay: settings.settle_delay(),
                auto_complete: AtomicBool::new(settings.auto_complete),
                batch: Mutex::new(None),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Batch>> {
        self.inner.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_all(&self, events: Vec<RelayEvent>) {
        for event in events {
            self.inner.emitter.emit(event);
        }
    }

    // ========== Batch lifecycle ==========

    /// Start collecting a new batch.
    pub fn open_batch(&self) -> Result<BatchId, OrchestratorError> {
        let mut guard = self.lock();
        if let Some(active) = guard.as_ref() {
            if !active.status.is_closed() {
                return Err(OrchestratorError::BatchInProgress(active.id.clone()));
            }
        }

        let batch = Batch::new();
        let id = batch.id.clone();
        *guard = Some(batch);
        debug!(batch = %id, "Opened tool-call batch");
        Ok(id)
    }

    /// Add a finalized call to the collecting batch.
    pub fn collect(&self, call: ToolCall) -> Result<(), OrchestratorError> {
        let event = {
            let mut guard = self.lock();
            let batch = guard.as_mut().ok_or(OrchestratorError::NoActiveBatch)?;
            if batch.status != BatchStatus::Collecting {
                return Err(OrchestratorError::InvalidBatchStatus(batch.status));
            }
            if batch.calls.iter().any(|e| e.call.id == call.id) {
                return Err(OrchestratorError::DuplicateToolCall(call.id));
            }

            let entry = CallEntry {
                call,
                state: ExecutionState::Pending,
                result: None,
            };
            let event = entry.updated_event(&batch.id);
            batch.calls.push(entry);
            event
        };

        self.inner.emitter.emit(event);
        Ok(())
    }

    /// Stop collecting; calls now wait for confirmation.
    pub fn seal(&self) -> Result<BatchId, OrchestratorError> {
        let mut guard = self.lock();
        let batch = guard.as_mut().ok_or(OrchestratorError::NoActiveBatch)?;
        if batch.status != BatchStatus::Collecting {
            return Err(OrchestratorError::InvalidBatchStatus(batch.status));
        }

        batch.status = BatchStatus::AwaitingConfirmation;
        info!(
            batch = %batch.id,
            calls = batch.calls.len(),
            "Tool-call batch awaiting confirmation"
        );
        self.schedule_completion(batch);
        Ok(batch.id.clone())
    }

    /// Open, fill and seal a batch in one step.
    pub fn submit(&self, calls: Vec<ToolCall>) -> Result<BatchId, OrchestratorError> {
        let mut seen = HashSet::new();
        if let Some(dup) = calls.iter().find(|c| !seen.insert(c.id.as_str())) {
            return Err(OrchestratorError::DuplicateToolCall(dup.id.clone()));
        }

        self.open_batch()?;
        for call in calls {
            self.collect(call)?;
        }
        self.seal()
    }

    // ========== Execution ==========

    /// Execute one pending call and record its outcome.
    ///
    /// Failures are recorded as `failed`, never retried, and returned as a
    /// result rather than an error.
    pub async fn confirm_and_run(
        &self,
        tool_call_id: &str,
    ) -> Result<ToolCallResult, OrchestratorError> {
        let (batch_id, call, event) = {
            let mut guard = self.lock();
            let batch = guard.as_mut().ok_or(OrchestratorError::NoActiveBatch)?;
            batch.ensure_sealed()?;

            let batch_id = batch.id.clone();
            let entry = batch.transition(tool_call_id, ExecutionState::Executing)?;
            let call = entry.call.clone();
            let event = entry.updated_event(&batch_id);
            batch.status = BatchStatus::Executing;
            (batch_id, call, event)
        };
        self.inner.emitter.emit(event);

        let result = self.dispatch(&call).await;
        self.record(&batch_id, vec![result.clone()]);
        Ok(result)
    }

    /// Execute the first pending call in collection order.
    ///
    /// Returns `None` when nothing is pending.
    pub async fn confirm_next(&self) -> Result<Option<ToolCallResult>, OrchestratorError> {
        let next = {
            let guard = self.lock();
            let batch = guard.as_ref().ok_or(OrchestratorError::NoActiveBatch)?;
            batch
                .calls
                .iter()
                .find(|e| e.state == ExecutionState::Pending)
                .map(|e| e.call.id.clone())
        };

        match next {
            Some(id) => self.confirm_and_run(&id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute every pending call concurrently.
    ///
    /// Outcomes are recorded together once all calls have finished.
    pub async fn run_all(&self) -> Result<Vec<ToolCallResult>, OrchestratorError> {
        let (batch_id, calls, events) = {
            let mut guard = self.lock();
            let batch = guard.as_mut().ok_or(OrchestratorError::NoActiveBatch)?;
            batch.ensure_sealed()?;

            let batch_id = batch.id.clone();
            let mut calls = Vec::new();
            let mut events = Vec::new();
            for entry in batch
                .calls
                .iter_mut()
                .filter(|e| e.state == ExecutionState::Pending)
            {
                entry.state = ExecutionState::Executing;
                calls.push(entry.call.clone());
                events.push(entry.updated_event(&batch_id));
            }
            if !calls.is_empty() {
                batch.status = BatchStatus::Executing;
            }
            (batch_id, calls, events)
        };
        self.emit_all(events);

        info!(batch = %batch_id, calls = calls.len(), "Running all pending tool calls");
        let results = join_all(calls.iter().map(|c| self.dispatch(c))).await;
        self.record(&batch_id, results.clone());
        Ok(results)
    }

    /// Skip a pending call; it counts as finished.
    pub fn skip(&self, tool_call_id: &str) -> Result<(), OrchestratorError> {
        let event = {
            let mut guard = self.lock();
            let batch = guard.as_mut().ok_or(OrchestratorError::NoActiveBatch)?;
            batch.ensure_sealed()?;

            let batch_id = batch.id.clone();
            let entry = batch.transition(tool_call_id, ExecutionState::Skipped)?;
            entry.result = Some(ToolCallResult::error(tool_call_id, SKIPPED_MESSAGE));
            let event = entry.updated_event(&batch_id);
            self.schedule_completion(batch);
            event
        };

        self.inner.emitter.emit(event);
        Ok(())
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolCallResult {
        if call.server_id.is_none() {
            let err = McpError::Connection(format!(
                "No connected server provides tool '{}'",
                call.name
            ));
            warn!(tool = %call.name, tool_call_id = %call.id, "Tool call has no server");
            return ToolCallResult::error(&call.id, err.to_string());
        }

        debug!(tool = %call.name, tool_call_id = %call.id, "Dispatching tool call");
        match self.inner.invoker.invoke(call).await {
            Ok(data) => ToolCallResult::success(&call.id, data),
            Err(e) => {
                warn!(tool = %call.name, tool_call_id = %call.id, error = %e, "Tool call failed");
                ToolCallResult::error(&call.id, e.to_string())
            }
        }
    }

    /// Store outcomes for executing calls of `batch_id`.
    ///
    /// Outcomes for a batch that has since been replaced are dropped.
    fn record(&self, batch_id: &BatchId, results: Vec<ToolCallResult>) {
        let events = {
            let mut guard = self.lock();
            let Some(batch) = guard.as_mut().filter(|b| &b.id == batch_id) else {
                debug!(batch = %batch_id, "Dropping outcomes for a batch that is no longer active");
                return;
            };

            let mut events = Vec::new();
            for result in results {
                let next = if result.success {
                    ExecutionState::Succeeded
                } else {
                    ExecutionState::Failed
                };
                match batch.transition(&result.tool_call_id, next) {
                    Ok(entry) => {
                        entry.result = Some(result);
                        events.push(entry.updated_event(batch_id));
                    }
                    Err(e) => warn!(batch = %batch_id, error = %e, "Discarding tool call outcome"),
                }
            }
            self.schedule_completion(batch);
            events
        };

        self.emit_all(events);
    }

    // ========== Completion ==========

    /// Start the settle timer if the batch is finished and auto-complete is on.
    fn schedule_completion(&self, batch: &mut Batch) {
        if !self.inner.auto_complete.load(Ordering::SeqCst)
            || batch.status.is_closed()
            || batch.settle.is_some()
            || batch.unfinished() > 0
        {
            return;
        }

        let orchestrator = self.clone();
        let batch_id = batch.id.clone();
        let delay = self.inner.settle_delay;
        debug!(batch = %batch_id, ?delay, "All tool calls finished, completing after settle delay");

        batch.settle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = orchestrator.finish(&batch_id, true) {
                debug!(batch = %batch_id, error = %e, "Auto-complete skipped");
            }
        }));
    }

    fn finish(
        &self,
        batch_id: &BatchId,
        from_timer: bool,
    ) -> Result<Vec<ToolCallResult>, OrchestratorError> {
        let results = {
            let mut guard = self.lock();
            let batch = guard
                .as_mut()
                .filter(|b| &b.id == batch_id)
                .ok_or(OrchestratorError::NoActiveBatch)?;
            batch.ensure_open()?;

            let unfinished = batch.unfinished();
            if unfinished > 0 {
                return Err(OrchestratorError::BatchIncomplete(unfinished));
            }

            if from_timer {
                batch.settle = None;
            } else {
                batch.cancel_settle();
            }
            batch.status = BatchStatus::Completed;
            batch.results()
        };

        info!(batch = %batch_id, results = results.len(), "Tool-call batch completed");
        self.inner.emitter.emit(RelayEvent::BatchCompleted {
            batch_id: batch_id.clone(),
            results: results.clone(),
        });
        self.inner.handback.hand_back(batch_id, &results);
        Ok(results)
    }

    /// Complete the batch now and hand results back.
    ///
    /// Needed when auto-complete is off; every call must be finished.
    pub fn complete_batch(&self) -> Result<Vec<ToolCallResult>, OrchestratorError> {
        let batch_id = self
            .active_batch()
            .ok_or(OrchestratorError::NoActiveBatch)?;
        self.finish(&batch_id, false)
    }

    /// Abort the batch.
    ///
    /// Pending calls become `cancelled`. Calls already executing keep
    /// running and their outcomes are still recorded, but the batch is never
    /// handed back.
    pub fn cancel_batch(&self) -> Result<Vec<ToolCallResult>, OrchestratorError> {
        let (batch_id, events, results) = {
            let mut guard = self.lock();
            let batch = guard.as_mut().ok_or(OrchestratorError::NoActiveBatch)?;
            batch.ensure_open()?;
            batch.cancel_settle();

            let batch_id = batch.id.clone();
            let mut events = Vec::new();
            for entry in batch
                .calls
                .iter_mut()
                .filter(|e| e.state == ExecutionState::Pending)
            {
                entry.state = ExecutionState::Cancelled;
                entry.result = Some(ToolCallResult::error(&entry.call.id, CANCELLED_MESSAGE));
                events.push(entry.updated_event(&batch_id));
            }
            batch.status = BatchStatus::Cancelled;
            (batch_id, events, batch.results())
        };

        info!(batch = %batch_id, cancelled = events.len(), "Tool-call batch cancelled");
        self.emit_all(events);
        self.inner.emitter.emit(RelayEvent::BatchCancelled {
            batch_id,
            results: results.clone(),
        });
        Ok(results)
    }

    /// Toggle auto-completion.
    ///
    /// Enabling it on a finished batch starts the settle timer; disabling
    /// it stops a running one.
    pub fn set_auto_complete(&self, enabled: bool) {
        self.inner.auto_complete.store(enabled, Ordering::SeqCst);

        let mut guard = self.lock();
        if let Some(batch) = guard.as_mut() {
            if enabled {
                self.schedule_completion(batch);
            } else {
                batch.cancel_settle();
            }
        }
    }

    pub fn auto_complete(&self) -> bool {
        self.inner.auto_complete.load(Ordering::SeqCst)
    }

    // ========== Queries ==========

    pub fn active_batch(&self) -> Option<BatchId> {
        self.lock().as_ref().map(|b| b.id.clone())
    }

    pub fn snapshot(&self) -> Option<BatchSnapshot> {
        self.lock().as_ref().map(Batch::snapshot)
    }
}

impl std::fmt::Debug for ToolOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolOrchestrator")
            .field("active_batch", &self.active_batch())
            .field("auto_complete", &self.auto_complete())
            .field("settle_delay", &self.inner.settle_delay)
            .finish_non_exhaustive()
    }
}
