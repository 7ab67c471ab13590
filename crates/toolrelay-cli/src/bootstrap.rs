//! CLI bootstrap - the composition root.
//!
//! The only place where the config file, connection pool, MCP service and
//! event channel are wired together.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::UnboundedReceiver;
use toolrelay_core::{ChannelEmitter, EventEmitter, RelayEvent};
use toolrelay_mcp::{ConnectionPool, McpService};
use tracing::debug;

use crate::config::{FileConfigSource, RelayConfig};
use crate::error::CliError;

/// Fully composed context for command handlers.
pub struct CliContext {
    pub config: RelayConfig,
    pub service: Arc<McpService>,
    pub emitter: Arc<dyn EventEmitter>,
    events: Mutex<UnboundedReceiver<RelayEvent>>,
}

impl CliContext {
    /// Every event emitted since the last call.
    pub fn take_events(&self) -> Vec<RelayEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Load the config file and build the service stack.
pub async fn bootstrap(config_path: &Path) -> Result<CliContext, CliError> {
    let config = RelayConfig::load(config_path).await?;
    debug!(
        path = %config_path.display(),
        servers = config.servers.len(),
        "Loaded configuration"
    );

    let (emitter, events) = ChannelEmitter::new();
    let emitter: Arc<dyn EventEmitter> = Arc::new(emitter);
    let pool = ConnectionPool::new(config.settings.pool, Arc::clone(&emitter));
    let service = McpService::new(
        Arc::new(FileConfigSource::new(config_path)),
        Arc::new(pool),
        Arc::clone(&emitter),
    );

    Ok(CliContext {
        config,
        service: Arc::new(service),
        emitter,
        events: Mutex::new(events),
    })
}
