//! One-line renderings of relay events.

use toolrelay_core::RelayEvent;

pub fn describe_event(event: &RelayEvent) -> String {
    match event {
        RelayEvent::ServerConnected {
            server_name,
            tool_count,
            ..
        } => format!("connected {server_name} ({tool_count} tools)"),
        RelayEvent::ServerDisconnected { server_name, .. } => {
            format!("disconnected {server_name}")
        }
        RelayEvent::ServerError { error } => {
            format!("{} error: {}", error.server_name, error.message)
        }
        RelayEvent::ToolCallUpdated {
            tool_call_id,
            state,
            ..
        } => format!("{tool_call_id} -> {state}"),
        RelayEvent::BatchCompleted { results, .. } => {
            format!("batch completed with {} results", results.len())
        }
        RelayEvent::BatchCancelled { results, .. } => {
            format!("batch cancelled with {} results", results.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolrelay_core::{BatchId, ExecutionState};

    #[test]
    fn test_describe_call_update() {
        let event = RelayEvent::ToolCallUpdated {
            batch_id: BatchId::new(),
            tool_call_id: "call_1".into(),
            state: ExecutionState::Executing,
            result: None,
        };
        assert_eq!(describe_event(&event), "call_1 -> executing");
    }

    #[test]
    fn test_describe_connected() {
        let event = RelayEvent::server_connected(1, "Files", 3);
        assert_eq!(describe_event(&event), "connected Files (3 tools)");
    }
}
