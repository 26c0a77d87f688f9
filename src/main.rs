//! voicepilot-core -- command orchestration core for a voice-driven
//! desktop agent.
//!
//! Communicates with the host shell via JSON-line IPC on stdin/stdout.
//! The shell owns microphone capture, STT, and TTS; this process owns
//! classification, element resolution, fallback escalation, deferred
//! placement, and input injection.

mod accessibility;
mod config;
mod deferred;
mod fallback;
mod intent;
mod ipc;
mod recovery;
mod resolver;
mod router;
mod services;

use std::sync::Arc;

use tracing::info;

use accessibility::{bridge::BridgeProvider, RoleSet, TreeAdapter};
use deferred::listener::ClickListener;
use deferred::DeferredActionEngine;
use fallback::FallbackCoordinator;
use intent::IntentClassifier;
use ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use ipc::{AgentEvent, ShellCommand};
use recovery::RecoveryManager;
use resolver::ElementResolver;
use router::{Command, CommandRouter, SystemState};
use services::audio::AudioFeedback;
use services::input::{InputAdapter, NativeInput};
use services::perception::{HttpPerception, PerceptionAdapter};
use services::reasoning::{HttpReasoning, ReasoningAdapter};

#[tokio::main]
async fn main() {
    services::logger::init();

    // Emit starting event immediately so the shell knows we're alive.
    emit_event(&AgentEvent::Starting {});

    emit_event(&AgentEvent::Loading {
        step: "Reading configuration...".to_string(),
    });
    let config = config::read_agent_config();
    info!(?config, "Configuration loaded");

    emit_event(&AgentEvent::Loading {
        step: "Starting IPC bridge...".to_string(),
    });
    let mut cmd_rx = spawn_stdin_reader();

    emit_event(&AgentEvent::Loading {
        step: "Starting pointer listener...".to_string(),
    });
    let listener = Arc::new(ClickListener::new());
    deferred::listener::spawn_global_listener(Arc::clone(&listener));

    emit_event(&AgentEvent::Loading {
        step: "Connecting collaborator services...".to_string(),
    });
    let request_timeout = config.services.request_timeout();
    let reasoning = Arc::new(ReasoningAdapter::Http(HttpReasoning::new(
        &config.services.reasoning_url,
        request_timeout,
    )));
    let perception = Arc::new(PerceptionAdapter::Http(HttpPerception::new(
        &config.services.perception_url,
        request_timeout,
    )));
    let tree = Arc::new(TreeAdapter::Bridge(BridgeProvider::new(
        &config.services.accessibility_url,
        request_timeout,
    )));
    let input = Arc::new(InputAdapter::Native(NativeInput));
    let audio = AudioFeedback::new(&config.audio);

    let exec_lock = Arc::new(tokio::sync::Mutex::new(()));
    let state = Arc::new(SystemState::new());

    let gui = Arc::new(FallbackCoordinator::new(
        ElementResolver::new(tree, config.resolver.clone()),
        RecoveryManager::new(config.recovery.clone()),
        perception,
        Arc::clone(&input),
        audio.clone(),
        RoleSet::interactive_with(&config.resolver.extra_roles),
        config.router.command_budget(),
    ));
    let deferred_engine = Arc::new(DeferredActionEngine::new(
        listener,
        Arc::clone(&exec_lock),
        Arc::clone(&reasoning),
        input,
        audio.clone(),
        config.router.lock_timeout(),
        config.deferred.wait_timeout(),
        Arc::clone(&state),
    ));
    let router = CommandRouter::new(
        exec_lock,
        state,
        IntentClassifier::new(Arc::clone(&reasoning)),
        gui,
        deferred_engine,
        reasoning,
        audio,
        config.router.lock_timeout(),
    );

    emit_event(&AgentEvent::Ready {});
    info!("Agent core ready");

    // Main loop: process commands from the shell one at a time, with a
    // periodic sweep backing up the deferred-action timeout.
    let mut sweep = tokio::time::interval(std::time::Duration::from_secs(5));
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(&router, command).await {
                            break; // Stop command received
                        }
                    }
                    None => {
                        // stdin closed -- host shell gone
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            _ = sweep.tick() => {
                router.sweep_timeouts();
            }
        }
    }

    info!("Agent core shutting down");
}

/// Handle a single command from the shell.
/// Returns `false` if the main loop should exit.
async fn handle_command(router: &CommandRouter, cmd: ShellCommand) -> bool {
    match cmd {
        ShellCommand::Ping {} => {
            emit_event(&AgentEvent::Pong {});
        }

        ShellCommand::Stop {} => {
            emit_event(&AgentEvent::Stopping {});
            return false;
        }

        ShellCommand::Status {} => {
            emit_event(&router.status_event());
        }

        ShellCommand::Cancel {} => {
            info!("Cancel requested by shell");
            router.cancel_pending();
        }

        ShellCommand::ConfigUpdate { config } => {
            // Thresholds and endpoints are wired at startup; the shell
            // restarts the core to apply them.
            info!("Config update received; restart required to apply");
            emit_event(&AgentEvent::ConfigUpdated { config });
        }

        ShellCommand::Command { text } => {
            if text.trim().is_empty() {
                emit_error("Empty command text");
                return true;
            }
            let command = Command::new(&text);
            let result = router.route(command).await;
            if result.status.is_terminal() {
                emit_event(&AgentEvent::Result {
                    id: result.id.to_string(),
                    status: result.status.as_str().to_string(),
                    message: result.message,
                    fallback_triggered: result.fallback_triggered,
                });
            }
            // A suspended command already announced itself through the
            // awaiting_placement event; its result arrives on trigger.
        }
    }

    true
}
