//! Replay command handler.
//!
//! Feeds a recorded SSE body through the decoder and assembler, submits the
//! resulting calls as one batch and confirms them the way a user clicking
//! "run" on every call would.

use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use toolrelay_agent::{AssembledCalls, BatchSnapshot, ToolCallAssembler, ToolOrchestrator, decode_stream};
use toolrelay_core::{
    BatchId, ModelHandback, OrchestratorSettings, RelayEvent, ToolCallResult, ToolCatalog,
};
use tracing::debug;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::{describe_event, print_separator, truncate_string};

#[derive(Debug, Clone)]
pub struct ReplayArgs {
    pub file: PathBuf,
    pub run_all: bool,
    pub auto_complete: bool,
}

/// What a replay produced.
#[derive(Debug, Clone, Default)]
pub struct ReplayOutcome {
    pub content: String,
    pub parse_errors: usize,
    pub snapshot: Option<BatchSnapshot>,
    pub results: Vec<ToolCallResult>,
    pub events: Vec<RelayEvent>,
}

/// Forwards handed-back batches to the waiting command.
struct ChannelHandback {
    tx: mpsc::UnboundedSender<Vec<ToolCallResult>>,
}

impl ModelHandback for ChannelHandback {
    fn hand_back(&self, batch_id: &BatchId, results: &[ToolCallResult]) {
        if self.tx.send(results.to_vec()).is_err() {
            debug!(%batch_id, "Replay finished before hand-back");
        }
    }
}

async fn assemble(body: Bytes, catalog: &ToolCatalog) -> Result<AssembledCalls, CliError> {
    let chunks = futures_util::stream::iter([Ok::<_, std::io::Error>(body)]);
    let mut frames = pin!(decode_stream(chunks));
    let mut assembler = ToolCallAssembler::new();

    while let Some(frame) = frames.next().await {
        if assembler.consume_frame(frame?) {
            break;
        }
    }
    Ok(assembler.finalize(catalog))
}

pub async fn execute(ctx: &CliContext, args: ReplayArgs) -> Result<ReplayOutcome, CliError> {
    let body = tokio::fs::read(&args.file).await?;
    let catalog = ctx.service.initialize().await?;
    let assembled = assemble(Bytes::from(body), &catalog).await?;

    if !assembled.content.is_empty() {
        println!("{}", assembled.content);
    }
    for err in &assembled.parse_errors {
        eprintln!(
            "warning: arguments for {} are not valid JSON, sending {{}}",
            err.tool_call_id
        );
    }

    let mut outcome = ReplayOutcome {
        content: assembled.content,
        parse_errors: assembled.parse_errors.len(),
        ..ReplayOutcome::default()
    };
    if assembled.calls.is_empty() {
        println!("No tool calls in stream.");
        outcome.events = ctx.take_events();
        return Ok(outcome);
    }

    let (tx, mut handed_back) = mpsc::unbounded_channel();
    let orchestrator = ToolOrchestrator::new(
        ctx.service.clone(),
        Arc::new(ChannelHandback { tx }),
        Arc::clone(&ctx.emitter),
        OrchestratorSettings {
            auto_complete: args.auto_complete,
            ..ctx.config.settings.orchestrator
        },
    );

    orchestrator.submit(assembled.calls)?;
    if args.run_all {
        orchestrator.run_all().await?;
    } else {
        while orchestrator.confirm_next().await?.is_some() {}
    }

    outcome.results = if args.auto_complete {
        handed_back
            .recv()
            .await
            .ok_or_else(|| CliError::Batch("batch was never handed back".into()))?
    } else {
        orchestrator.complete_batch()?
    };
    outcome.snapshot = orchestrator.snapshot();
    outcome.events = ctx.take_events();

    print_outcome(&outcome);
    Ok(outcome)
}

fn print_outcome(outcome: &ReplayOutcome) {
    let Some(snapshot) = &outcome.snapshot else {
        return;
    };

    println!("\nBatch {} {}", snapshot.id, snapshot.status);
    println!("{:<28} {:<24} {:<10} Result", "Call", "Tool", "State");
    print_separator(100);
    for entry in &snapshot.calls {
        let detail = entry.result.as_ref().map_or_else(String::new, |r| {
            r.error
                .clone()
                .or_else(|| r.data.as_ref().map(ToString::to_string))
                .unwrap_or_default()
        });
        println!(
            "{:<28} {:<24} {:<10} {}",
            truncate_string(&entry.call.id, 27),
            truncate_string(&entry.call.name, 23),
            entry.state,
            truncate_string(&detail, 36)
        );
    }

    for event in &outcome.events {
        debug!(event = %describe_event(event), "Replay event");
    }
}
