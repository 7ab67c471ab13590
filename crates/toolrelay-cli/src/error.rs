//! CLI-specific error types and exit codes.

use thiserror::Error;
use toolrelay_agent::OrchestratorError;
use toolrelay_core::{ConfigSourceError, SettingsError};
use toolrelay_mcp::McpServiceError;

/// CLI-specific error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Argument parsing error.
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    /// IO error (file not found, permission denied, etc.).
    #[error("IO error: {0}")]
    Io(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server connection or tool failure.
    #[error("{0}")]
    Server(String),

    /// Batch state machine misuse.
    #[error("Batch error: {0}")]
    Batch(String),
}

impl CliError {
    /// Map error to an exit code.
    ///
    /// Exit codes follow sysexits.h where one fits:
    /// - 1: General error
    /// - 2: Invalid arguments
    /// - 69: Service unavailable
    /// - 74: IO error
    /// - 78: Configuration error
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Batch(_) => 1,
            Self::Arguments(_) => 2,
            Self::Server(_) => 69, // EX_UNAVAILABLE
            Self::Io(_) => 74,     // EX_IOERR
            Self::Config(_) => 78, // EX_CONFIG
        }
    }
}

impl From<McpServiceError> for CliError {
    fn from(err: McpServiceError) -> Self {
        match err {
            McpServiceError::NotFound(_) | McpServiceError::Disabled(_) => {
                Self::Arguments(err.to_string())
            }
            McpServiceError::InvalidConfig(_) | McpServiceError::Config(_) => {
                Self::Config(err.to_string())
            }
            McpServiceError::Mcp(e) => Self::Server(e.to_string()),
        }
    }
}

impl From<ConfigSourceError> for CliError {
    fn from(err: ConfigSourceError) -> Self {
        match err {
            ConfigSourceError::Read(msg) => Self::Io(msg),
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<SettingsError> for CliError {
    fn from(err: SettingsError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<OrchestratorError> for CliError {
    fn from(err: OrchestratorError) -> Self {
        Self::Batch(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolrelay_core::McpError;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Arguments("x".into()).exit_code(), 2);
        assert_eq!(CliError::Config("x".into()).exit_code(), 78);
        assert_eq!(
            CliError::from(McpServiceError::NotFound(4)).exit_code(),
            2
        );
        assert_eq!(
            CliError::from(McpServiceError::Mcp(McpError::Connection("down".into()))).exit_code(),
            69
        );
        assert_eq!(
            CliError::from(ConfigSourceError::Read("denied".into())).exit_code(),
            74
        );
    }
}
