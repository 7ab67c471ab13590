//! Chat-completion SSE decoding.
//!
//! Upstream format, one event per `data:` line:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Let me check"}}]}
//! data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read_file","arguments":"{\"pa"}}]}}]}
//! data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"/tmp\"}"}}]}}]}
//! data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}
//! data: [DONE]
//! ```

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{trace, warn};

/// One streamed tool-call fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Position of the call within the assistant turn.
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Raw JSON text fragment; concatenated in arrival order.
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_arguments(mut self, fragment: impl Into<String>) -> Self {
        self.arguments = Some(fragment.into());
        self
    }
}

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Assistant text.
    Content(String),
    /// Tool-call fragments from one chunk.
    ToolCallDeltas(Vec<ToolCallDelta>),
    /// `finish_reason == "tool_calls"`.
    ToolCallsComplete,
    /// `[DONE]` sentinel, or end of the byte stream.
    Done,
}

impl StreamFrame {
    /// Whether this frame ends tool-call accumulation.
    pub const fn is_finalize_signal(&self) -> bool {
        matches!(self, Self::ToolCallsComplete | Self::Done)
    }
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChoicePayload>,
}

#[derive(Debug, Deserialize)]
struct ChoicePayload {
    #[serde(default)]
    delta: Option<DeltaPayload>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDeltaPayload>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDeltaPayload {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDeltaPayload>,
}

#[derive(Debug, Deserialize)]
struct FunctionDeltaPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Incremental SSE decoder.
///
/// Bytes may be pushed in arbitrary chunks; frames come out once their line
/// is complete. One upstream event can yield several frames.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    queue: VecDeque<StreamFrame>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer raw bytes from upstream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Treat a trailing unterminated line as complete.
    pub fn finish(&mut self) {
        if !self.buf.is_empty() {
            self.buf.extend_from_slice(b"\n");
        }
    }

    /// Next decoded frame, if a complete line is buffered.
    pub fn next_frame(&mut self) -> Option<StreamFrame> {
        loop {
            if let Some(frame) = self.queue.pop_front() {
                return Some(frame);
            }
            let end = self.buf.iter().position(|&b| b == b'\n')?;
            let line = self.buf.split_to(end + 1);
            let text = String::from_utf8_lossy(&line);
            self.decode_line(text.trim());
        }
    }

    /// Decode a complete in-memory body.
    pub fn decode_all(body: &[u8]) -> Vec<StreamFrame> {
        let mut decoder = Self::new();
        decoder.push(body);
        decoder.finish();
        std::iter::from_fn(|| decoder.next_frame()).collect()
    }

    fn decode_line(&mut self, line: &str) {
        if line.is_empty() || line.starts_with(':') {
            return;
        }

        let Some(data) = line.strip_prefix("data:") else {
            trace!(line, "Ignoring non-data SSE line");
            return;
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.queue.push_back(StreamFrame::Done);
            return;
        }

        match serde_json::from_str::<ChunkPayload>(data) {
            Ok(chunk) => self.queue.extend(frames_from(chunk)),
            Err(e) => warn!(error = %e, "Skipping unparseable stream frame"),
        }
    }
}

fn frames_from(chunk: ChunkPayload) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    let Some(choice) = chunk.choices.into_iter().next() else {
        return frames;
    };

    if let Some(delta) = choice.delta {
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            frames.push(StreamFrame::Content(content));
        }

        let deltas: Vec<ToolCallDelta> = delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(position, call)| {
                let function = call.function;
                ToolCallDelta {
                    index: call
                        .index
                        .unwrap_or_else(|| u32::try_from(position).unwrap_or(u32::MAX)),
                    id: call.id,
                    name: function.as_ref().and_then(|f| f.name.clone()),
                    arguments: function.and_then(|f| f.arguments),
                }
            })
            .collect();
        if !deltas.is_empty() {
            frames.push(StreamFrame::ToolCallDeltas(deltas));
        }
    }

    if choice.finish_reason.as_deref() == Some("tool_calls") {
        frames.push(StreamFrame::ToolCallsComplete);
    }

    frames
}

struct DecodeState<E> {
    upstream: BoxStream<'static, Result<Bytes, E>>,
    decoder: SseDecoder,
    upstream_ended: bool,
    done: bool,
}

/// Adapt an SSE byte stream into a frame stream.
///
/// The output always ends with exactly one `Done`, synthesized if upstream
/// closes without the sentinel. An upstream error is yielded once and ends
/// the stream.
pub fn decode_stream<S, E>(bytes: S) -> impl Stream<Item = Result<StreamFrame, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let state = DecodeState {
        upstream: bytes.boxed(),
        decoder: SseDecoder::new(),
        upstream_ended: false,
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        loop {
            if let Some(frame) = st.decoder.next_frame() {
                if frame == StreamFrame::Done {
                    st.done = true;
                }
                return Some((Ok(frame), st));
            }

            if st.upstream_ended {
                st.done = true;
                return Some((Ok(StreamFrame::Done), st));
            }

            match st.upstream.next().await {
                Some(Ok(chunk)) => st.decoder.push(&chunk),
                Some(Err(e)) => {
                    warn!("Upstream stream error");
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.upstream_ended = true;
                    st.decoder.finish();
                }
            }
        }
    })
}
