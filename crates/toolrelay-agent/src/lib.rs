//! Model-side tool calling for toolrelay.
//!
//! - [`stream`] decodes a chat-completion SSE byte stream into frames
//! - [`assembler`] folds streamed tool-call fragments into finished calls
//! - [`orchestrator`] runs a batch of calls through confirmation, execution
//!   and hand-back
#![deny(unsafe_code)]

pub mod assembler;
pub mod orchestrator;
pub mod stream;

pub use assembler::{ArgumentParseError, AssembledCalls, ToolCallAssembler};
pub use orchestrator::{BatchSnapshot, CallSnapshot, OrchestratorError, ToolOrchestrator};
pub use stream::{SseDecoder, StreamFrame, ToolCallDelta, decode_stream};
