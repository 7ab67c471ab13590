//! Event emitter trait for broadcasting relay events.
//!
//! Implementations handle transport details (channels, IPC, SSE, etc.).

use tokio::sync::mpsc;

use crate::events::RelayEvent;

/// Trait for emitting relay events.
///
/// Keeps channel types out of the public API surface of the pool and the
/// orchestrator.
///
/// # Implementations
///
/// - `NoopEmitter` - For contexts that don't need events
/// - `ChannelEmitter` - Forwards into a tokio unbounded channel
pub trait EventEmitter: Send + Sync {
    /// Emit an event.
    ///
    /// This method must not block.
    fn emit(&self, event: RelayEvent);

    /// Clone this emitter into a boxed trait object.
    fn clone_box(&self) -> Box<dyn EventEmitter>;
}

/// A no-op event emitter.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    /// Create a new no-op emitter.
    pub const fn new() -> Self {
        Self
    }
}

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: RelayEvent) {}

    fn clone_box(&self) -> Box<dyn EventEmitter> {
        Box::new(self.clone())
    }
}

/// Emitter that forwards every event into an unbounded channel.
///
/// Events emitted after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl ChannelEmitter {
    /// Create an emitter and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: RelayEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped, discarding event");
        }
    }

    fn clone_box(&self) -> Box<dyn EventEmitter> {
        Box::new(self.clone())
    }
}
