//! IPC protocol types for communication with the host shell.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> shell).
//! Commands use `{"command": "<name>", ...}` format (shell -> core).
//!
//! The host shell owns microphone capture and STT; by the time a command
//! reaches this process it is already plain text.

pub mod bridge;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Events: core -> shell (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the host shell via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
#[allow(dead_code)]
pub enum AgentEvent {
    Starting {},
    Loading {
        step: String,
    },
    Ready {},
    /// System mode changed (ready, processing, awaiting_placement).
    StateChange {
        state: String,
    },
    /// A command was accepted and assigned an execution id.
    CommandAccepted {
        id: String,
        text: String,
    },
    /// Final outcome of a routed command.
    Result {
        id: String,
        status: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        fallback_triggered: Option<bool>,
    },
    /// A deferred action generated its payload and is waiting for the
    /// placement click.
    AwaitingPlacement {
        id: String,
        action_type: String,
    },
    /// Ask the host shell to speak text via its TTS engine.
    Speak {
        text: String,
    },
    /// Current system status (answer to the `status` command).
    Status {
        mode: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        running_ms: Option<u64>,
        deferred_active: bool,
        metrics: serde_json::Value,
    },
    ConfigUpdated {
        config: serde_json::Value,
    },
    Error {
        message: String,
    },
    Pong {},
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: shell -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the host shell via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum ShellCommand {
    /// A transcribed user utterance to classify and route.
    Command {
        text: String,
    },
    /// Report current mode, deferred state, and fallback metrics.
    Status {},
    /// Dismiss a pending deferred action without running anything new.
    Cancel {},
    ConfigUpdate {
        #[serde(default)]
        config: serde_json::Value,
    },
    Ping {},
    Stop {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_deserializes_from_tagged_json() {
        let cmd: ShellCommand =
            serde_json::from_str(r#"{"command": "command", "text": "click save"}"#).unwrap();
        match cmd {
            ShellCommand::Command { text } => assert_eq!(text, "click save"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn event_serializes_with_tag_and_data() {
        let event = AgentEvent::AwaitingPlacement {
            id: "abc".into(),
            action_type: "type_text".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "awaiting_placement");
        assert_eq!(json["data"]["action_type"], "type_text");
    }

    #[test]
    fn result_omits_absent_fallback_flag() {
        let event = AgentEvent::Result {
            id: "abc".into(),
            status: "completed".into(),
            message: "done".into(),
            fallback_triggered: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("fallback_triggered"));
    }
}
