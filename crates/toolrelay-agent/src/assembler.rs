//! Folds streamed tool-call fragments into finished [`ToolCall`]s.
//!
//! Fragments for one index are assumed to arrive in order; argument text is
//! concatenated exactly as received.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use toolrelay_core::{McpError, ToolCall, ToolCatalog};
use tracing::{debug, warn};

use crate::stream::{StreamFrame, ToolCallDelta};

#[derive(Debug, Default)]
struct Accumulator {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// Argument text that failed to parse; the call went ahead with `{}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentParseError {
    pub tool_call_id: String,
    pub index: u32,
    pub raw: String,
    pub error: McpError,
}

/// Output of [`ToolCallAssembler::finalize`].
#[derive(Debug, Clone, Default)]
pub struct AssembledCalls {
    /// Finished calls ordered by stream index.
    pub calls: Vec<ToolCall>,
    /// Non-fatal argument parse failures.
    pub parse_errors: Vec<ArgumentParseError>,
    /// Assistant text streamed alongside the calls.
    pub content: String,
}

/// Per-index accumulator for one assistant turn.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    slots: BTreeMap<u32, Accumulator>,
    content: String,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment.
    ///
    /// A non-empty id or name overwrites the previous one; argument text is
    /// appended.
    pub fn push_delta(&mut self, delta: ToolCallDelta) {
        let slot = self.slots.entry(delta.index).or_default();

        if let Some(id) = delta.id.filter(|s| !s.is_empty()) {
            slot.id = Some(id);
        }
        if let Some(name) = delta.name.filter(|s| !s.is_empty()) {
            slot.name = Some(name);
        }
        if let Some(fragment) = delta.arguments {
            slot.args.push_str(&fragment);
        }
    }

    /// Route a decoded frame. Returns `true` on a finalize signal.
    pub fn consume_frame(&mut self, frame: StreamFrame) -> bool {
        match frame {
            StreamFrame::Content(text) => {
                self.content.push_str(&text);
                false
            }
            StreamFrame::ToolCallDeltas(deltas) => {
                for delta in deltas {
                    self.push_delta(delta);
                }
                false
            }
            StreamFrame::ToolCallsComplete | StreamFrame::Done => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of distinct call indices seen so far.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Finish every accumulated call.
    ///
    /// Empty argument text becomes `{}`. Unparseable text also becomes `{}`
    /// and is reported in `parse_errors`. Calls without an id get a fresh
    /// one. Names resolve to their owning server through `catalog`.
    pub fn finalize(self, catalog: &ToolCatalog) -> AssembledCalls {
        let mut assembled = AssembledCalls {
            content: self.content,
            ..AssembledCalls::default()
        };

        for (index, slot) in self.slots {
            let id = slot.id.unwrap_or_else(ToolCall::generate_id);
            let name = slot.name.unwrap_or_default();
            if name.is_empty() {
                warn!(index, tool_call_id = %id, "Streamed tool call has no name");
            }

            let arguments = if slot.args.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                match serde_json::from_str::<Value>(&slot.args) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(
                            index,
                            tool_call_id = %id,
                            error = %e,
                            "Tool call arguments are not valid JSON, using {{}}"
                        );
                        assembled.parse_errors.push(ArgumentParseError {
                            tool_call_id: id.clone(),
                            index,
                            raw: slot.args,
                            error: McpError::Parse(e.to_string()),
                        });
                        Value::Object(Map::new())
                    }
                }
            };

            let mut call = ToolCall::new(id, name, arguments);
            if let Some(server_id) = catalog.server_for(&call.name) {
                call = call.with_server(server_id);
            } else {
                debug!(tool = %call.name, "No known server provides tool");
            }
            assembled.calls.push(call);
        }

        assembled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolrelay_core::ToolDescriptor;

    #[test]
    fn test_round_trip_fragments() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push_delta(
            ToolCallDelta::new(0)
                .with_id("a")
                .with_name("foo")
                .with_arguments(r#"{"x":"#),
        );
        assembler.push_delta(ToolCallDelta::new(0).with_arguments("1}"));

        let out = assembler.finalize(&ToolCatalog::default());

        assert_eq!(out.calls, vec![ToolCall::new("a", "foo", json!({"x": 1}))]);
        assert!(out.parse_errors.is_empty());
    }

    #[test]
    fn test_invalid_arguments_become_empty_object() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push_delta(
            ToolCallDelta::new(0)
                .with_id("a")
                .with_name("foo")
                .with_arguments(r#"{"x": tru"#),
        );

        let out = assembler.finalize(&ToolCatalog::default());

        assert_eq!(out.calls[0].arguments, json!({}));
        assert_eq!(out.parse_errors.len(), 1);
        assert_eq!(out.parse_errors[0].tool_call_id, "a");
        assert_eq!(out.parse_errors[0].raw, r#"{"x": tru"#);
        assert!(matches!(out.parse_errors[0].error, McpError::Parse(_)));
    }

    #[test]
    fn test_calls_ordered_by_index_and_resolved() {
        let catalog = ToolCatalog::new(vec![
            ToolDescriptor::new("read_file", 1, "fs"),
            ToolDescriptor::new("search", 2, "web"),
        ]);

        let mut assembler = ToolCallAssembler::new();
        assembler.push_delta(ToolCallDelta::new(1).with_id("b").with_name("search"));
        assembler.push_delta(ToolCallDelta::new(0).with_id("a").with_name("read_file"));
        assembler.push_delta(ToolCallDelta::new(2).with_id("c").with_name("unknown"));

        let out = assembler.finalize(&catalog);

        let ids: Vec<&str> = out.calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(out.calls[0].server_id, Some(1));
        assert_eq!(out.calls[1].server_id, Some(2));
        assert_eq!(out.calls[2].server_id, None);
        // No argument text at all means no arguments
        assert_eq!(out.calls[0].arguments, json!({}));
    }

    #[test]
    fn test_later_values_overwrite_id_and_name() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push_delta(ToolCallDelta::new(0).with_id("tmp").with_name("rea"));
        assembler.push_delta(ToolCallDelta::new(0).with_id("").with_name("read_file"));
        assembler.push_delta(ToolCallDelta::new(0).with_id("call_9"));

        let out = assembler.finalize(&ToolCatalog::default());
        assert_eq!(out.calls[0].id, "call_9");
        assert_eq!(out.calls[0].name, "read_file");
    }

    #[test]
    fn test_missing_id_is_generated() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push_delta(ToolCallDelta::new(0).with_name("foo"));

        let out = assembler.finalize(&ToolCatalog::default());
        assert!(out.calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_consume_frame_reports_finalize() {
        let mut assembler = ToolCallAssembler::new();
        assert!(!assembler.consume_frame(StreamFrame::Content("Let me ".into())));
        assert!(!assembler.consume_frame(StreamFrame::Content("look".into())));
        assert!(!assembler.consume_frame(StreamFrame::ToolCallDeltas(vec![
            ToolCallDelta::new(0).with_name("foo")
        ])));
        assert!(assembler.consume_frame(StreamFrame::ToolCallsComplete));

        assert_eq!(assembler.content(), "Let me look");
        assert_eq!(assembler.len(), 1);
    }
}
