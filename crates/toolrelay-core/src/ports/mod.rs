//! Port definitions (traits at the crate seams) and the error taxonomy.

mod config_source;
mod event_emitter;
mod mcp_error;
mod tool_invoker;

pub use config_source::{ConfigSourceError, ServerConfigSource, StaticConfigSource};
pub use event_emitter::{ChannelEmitter, EventEmitter, NoopEmitter};
pub use mcp_error::{McpError, McpErrorCategory, McpErrorInfo};
#[cfg(any(test, feature = "test-utils"))]
pub use tool_invoker::MockToolInvoker;
pub use tool_invoker::{ModelHandback, NoopHandback, ToolInvoker};
