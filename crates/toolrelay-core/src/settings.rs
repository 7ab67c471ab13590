//! Settings domain types and validation.
//!
//! Pool sizing, retry policy, protocol timeouts and orchestrator behaviour.
//! Every field has a default so partial config files deserialize cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum number of pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Default number of connection attempts before giving up.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Per-request time budgets for the protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientTimeouts {
    /// Budget for the `initialize` response.
    pub handshake_ms: u64,

    /// Budget for each `tools/list` page.
    pub list_tools_ms: u64,

    /// Budget for a `tools/call` response.
    pub call_tool_ms: u64,

    /// Pause after sending `notifications/initialized`.
    pub initialized_settle_ms: u64,

    /// Grace period between the termination request and a forced kill.
    pub shutdown_grace_ms: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            handshake_ms: 10_000,
            list_tools_ms: 5_000,
            call_tool_ms: 30_000,
            initialized_settle_ms: 100,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl ClientTimeouts {
    pub const fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub const fn list_tools(&self) -> Duration {
        Duration::from_millis(self.list_tools_ms)
    }

    pub const fn call_tool(&self) -> Duration {
        Duration::from_millis(self.call_tool_ms)
    }

    pub const fn initialized_settle(&self) -> Duration {
        Duration::from_millis(self.initialized_settle_ms)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Connection pool sizing and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum live connections held at once.
    pub max_connections: usize,

    /// Connection attempts per `get_connection` call.
    pub max_connect_attempts: u32,

    /// Delay before the second attempt; doubles per attempt.
    pub initial_backoff_ms: u64,

    /// Ceiling for the delay between attempts.
    pub max_backoff_ms: u64,

    /// Consecutive invocation failures after which a connection is rebuilt.
    pub max_error_count: u32,

    /// Protocol client timeouts.
    pub timeouts: ClientTimeouts,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
            max_error_count: 3,
            timeouts: ClientTimeouts::default(),
        }
    }
}

impl PoolSettings {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `initial * 2^(attempt-1)`, capped at `max_backoff_ms`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Tool-call orchestration behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Complete the batch automatically once every call is terminal.
    pub auto_complete: bool,

    /// Delay between the last call turning terminal and auto-completion.
    pub settle_delay_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            auto_complete: true,
            settle_delay_ms: 1_000,
        }
    }
}

impl OrchestratorSettings {
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Top-level settings structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub pool: PoolSettings,
    pub orchestrator: OrchestratorSettings,
}

/// Settings validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("max_connections must be at least 1")]
    ZeroCapacity,

    #[error("max_connect_attempts must be at least 1")]
    ZeroAttempts,

    #[error("max_backoff_ms ({max}) must not be below initial_backoff_ms ({initial})")]
    BackoffCeilingTooLow { initial: u64, max: u64 },

    #[error("Timeout '{0}' must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Validate settings.
pub fn validate_settings(settings: &RelaySettings) -> Result<(), SettingsError> {
    let pool = &settings.pool;

    if pool.max_connections == 0 {
        return Err(SettingsError::ZeroCapacity);
    }

    if pool.max_connect_attempts == 0 {
        return Err(SettingsError::ZeroAttempts);
    }

    if pool.max_backoff_ms < pool.initial_backoff_ms {
        return Err(SettingsError::BackoffCeilingTooLow {
            initial: pool.initial_backoff_ms,
            max: pool.max_backoff_ms,
        });
    }

    let timeouts = &pool.timeouts;
    for (name, value) in [
        ("handshake_ms", timeouts.handshake_ms),
        ("list_tools_ms", timeouts.list_tools_ms),
        ("call_tool_ms", timeouts.call_tool_ms),
        ("shutdown_grace_ms", timeouts.shutdown_grace_ms),
    ] {
        if value == 0 {
            return Err(SettingsError::ZeroTimeout(name));
        }
    }

    Ok(())
}
