//! Discovered tools and name resolution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between server slug and tool name in namespaced tool names.
const NAMESPACE_SEPARATOR: &str = "__";

/// A tool exposed by a server, as reported by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name (function name).
    pub name: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for input parameters.
    #[serde(default)]
    pub input_schema: Value,

    /// ID of the server that owns this tool.
    pub server_id: i64,

    /// Name of the owning server, used for namespacing.
    #[serde(default)]
    pub server_name: String,
}

impl ToolDescriptor {
    /// Create a descriptor with an empty object schema.
    pub fn new(name: impl Into<String>, server_id: i64, server_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: serde_json::json!({ "type": "object" }),
            server_id,
            server_name: server_name.into(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Server-namespaced name, e.g. `file_system__read_file`.
    ///
    /// The server name is lowercased and every non-alphanumeric character
    /// becomes `_`.
    pub fn qualified_name(&self) -> String {
        let slug: String = self
            .server_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{slug}{NAMESPACE_SEPARATOR}{}", self.name)
    }
}

/// Snapshot of every tool known across connected servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    /// Build a catalog from discovered descriptors.
    pub const fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    /// All descriptors in discovery order.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve a tool name to its descriptor.
    ///
    /// An exact name match wins; the first server in discovery order owns a
    /// name exposed by several servers. Falls back to the namespaced form
    /// produced by [`ToolDescriptor::qualified_name`].
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        let exact: Vec<&ToolDescriptor> = self.tools.iter().filter(|t| t.name == name).collect();
        if let Some(first) = exact.first() {
            if exact.len() > 1 {
                tracing::debug!(
                    tool = %name,
                    server_id = first.server_id,
                    candidates = exact.len(),
                    "Tool name exposed by several servers, using first"
                );
            }
            return Some(first);
        }

        if name.contains(NAMESPACE_SEPARATOR) {
            return self.tools.iter().find(|t| t.qualified_name() == name);
        }

        None
    }

    /// Resolve a tool name straight to its owning server id.
    pub fn server_for(&self, name: &str) -> Option<i64> {
        self.resolve(name).map(|t| t.server_id)
    }

    /// Tools owned by one server.
    pub fn for_server(&self, server_id: i64) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().filter(move |t| t.server_id == server_id)
    }
}

impl FromIterator<ToolDescriptor> for ToolCatalog {
    fn from_iter<I: IntoIterator<Item = ToolDescriptor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
