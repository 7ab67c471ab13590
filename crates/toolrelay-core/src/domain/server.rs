//! Tool server launch configuration.

use std::fmt;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Environment variable entry passed to a server process at launch.
///
/// Values are handed to the child process verbatim. Nothing in this crate
/// stores or logs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
    /// Environment variable key
    pub key: String,
    /// Environment variable value
    pub value: String,
}

impl EnvEntry {
    /// Create a new environment variable entry.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Stable identity of a pooled connection.
///
/// Derived from the launch command and arguments only, so two configs that
/// launch the same process share one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Borrow the hex fingerprint.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Launch configuration for one external tool server.
///
/// Supplied by the configuration store and treated as immutable: once a
/// connection has been built from a config, changing the config means
/// building a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// ID assigned by the configuration store.
    pub id: i64,

    /// User-friendly name for the server.
    pub name: String,

    /// Executable to launch (e.g., "npx" or "/usr/local/bin/mcp-fs").
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides for the server process.
    #[serde(default)]
    pub env: Vec<EnvEntry>,

    /// Working directory for the process (must exist if specified).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Whether tools from this server are offered to the model.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    /// Create an enabled stdio server configuration.
    pub fn new(
        id: i64,
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            command: command.into(),
            args,
            env: Vec::new(),
            working_dir: None,
            enabled: true,
        }
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvEntry::new(key, value));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Deterministic fingerprint of command + args.
    ///
    /// First 8 bytes of SHA-256 over the command followed by each argument,
    /// NUL separated, rendered as 16 hex characters.
    pub fn fingerprint(&self) -> ConnectionId {
        let mut hasher = Sha256::new();
        hasher.update(self.command.as_bytes());
        for arg in &self.args {
            hasher.update([0u8]);
            hasher.update(arg.as_bytes());
        }
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(16);
        for byte in &digest[..8] {
            let _ = write!(hex, "{byte:02x}");
        }
        ConnectionId(hex)
    }

    /// Validate the launch configuration.
    ///
    /// Returns an error message suitable for display when the command is
    /// empty, contains whitespace, or the working directory is unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("Server command cannot be empty".to_string());
        }

        // Flags and arguments belong in `args`
        if self.command.contains(char::is_whitespace) {
            return Err(format!(
                "Command must be an executable name/path only (e.g., 'npx'), got '{}'. \
                 Put flags and arguments in the 'args' field.",
                self.command
            ));
        }

        if let Some(ref cwd) = self.working_dir {
            if !cwd.is_empty() {
                let path = Path::new(cwd);
                if !path.is_absolute() {
                    return Err(format!("Working directory must be absolute: {cwd}"));
                }
                if !path.is_dir() {
                    return Err(format!("Working directory does not exist: {cwd}"));
                }
            }
        }

        Ok(())
    }

    /// Environment overrides as `(key, value)` pairs.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().map(|e| (e.key.as_str(), e.value.as_str()))
    }
}
