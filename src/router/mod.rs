//! Command routing: one execution lock, one system state, exhaustive
//! intent dispatch.
//!
//! Commands run one at a time under the execution lock. The only place
//! the lock is released before a command's work is finished is the
//! deferred-action suspension -- holding it across that wait would
//! deadlock every later command.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::deferred::{DeferredActionEngine, InitiateOutcome};
use crate::fallback::FallbackCoordinator;
use crate::intent::{Intent, IntentClassifier, IntentResult};
use crate::ipc::bridge::emit_event;
use crate::ipc::AgentEvent;
use crate::services::audio::{AudioFeedback, Cue};
use crate::services::input::ActionKind;
use crate::services::reasoning::ReasoningAdapter;

// ---------------------------------------------------------------------------
// System state
// ---------------------------------------------------------------------------

/// What the system is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMode {
    Ready,
    Processing,
    WaitingForUser,
}

impl SystemMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::WaitingForUser => "waiting_for_user",
        }
    }
}

fn mode_from_u8(v: u8) -> SystemMode {
    match v {
        1 => SystemMode::Processing,
        2 => SystemMode::WaitingForUser,
        _ => SystemMode::Ready,
    }
}

fn mode_to_u8(mode: SystemMode) -> u8 {
    match mode {
        SystemMode::Ready => 0,
        SystemMode::Processing => 1,
        SystemMode::WaitingForUser => 2,
    }
}

/// The command currently holding the system.
#[derive(Debug, Clone, Copy)]
pub struct ActiveCommand {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// The one process-wide system state. All transitions go through the
/// router and the deferred engine; mode reads are lock-free.
pub struct SystemState {
    mode: AtomicU8,
    current: StdMutex<Option<ActiveCommand>>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemState {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(mode_to_u8(SystemMode::Ready)),
            current: StdMutex::new(None),
        }
    }

    pub fn mode(&self) -> SystemMode {
        mode_from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Transition the mode, emitting a state-change event when it
    /// actually changes.
    pub fn set_mode(&self, mode: SystemMode) {
        let previous = self.mode.swap(mode_to_u8(mode), Ordering::AcqRel);
        if mode_from_u8(previous) != mode {
            emit_event(&AgentEvent::StateChange {
                state: mode.as_str().to_string(),
            });
        }
    }

    pub fn begin(&self, id: Uuid) {
        *self.current.lock().unwrap() = Some(ActiveCommand {
            id,
            started_at: Utc::now(),
        });
    }

    pub fn clear_current(&self) {
        *self.current.lock().unwrap() = None;
    }

    pub fn current(&self) -> Option<ActiveCommand> {
        *self.current.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// Commands and results
// ---------------------------------------------------------------------------

/// One user utterance on its way through the system. Immutable once
/// created; owned by the router for the duration of one routing cycle.
#[derive(Debug, Clone)]
pub struct Command {
    pub id: Uuid,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl Command {
    pub fn new(text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.trim().to_string(),
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Completed,
    Failed,
    AwaitingPlacement,
    Busy,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::AwaitingPlacement => "awaiting_placement",
            Self::Busy => "busy",
        }
    }

    /// Whether the command's work is finished (one way or the other).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Busy)
    }
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub id: Uuid,
    pub status: RouteStatus,
    pub message: String,
    pub fallback_triggered: Option<bool>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct CommandRouter {
    exec_lock: Arc<AsyncMutex<()>>,
    state: Arc<SystemState>,
    classifier: IntentClassifier,
    gui: Arc<FallbackCoordinator>,
    deferred: Arc<DeferredActionEngine>,
    reasoning: Arc<ReasoningAdapter>,
    audio: AudioFeedback,
    lock_timeout: Duration,
}

impl CommandRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exec_lock: Arc<AsyncMutex<()>>,
        state: Arc<SystemState>,
        classifier: IntentClassifier,
        gui: Arc<FallbackCoordinator>,
        deferred: Arc<DeferredActionEngine>,
        reasoning: Arc<ReasoningAdapter>,
        audio: AudioFeedback,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            exec_lock,
            state,
            classifier,
            gui,
            deferred,
            reasoning,
            audio,
            lock_timeout,
        }
    }

    /// Periodic sweep: enforce the deferred-action timeout even if the
    /// wait task's own timer was lost.
    pub fn sweep_timeouts(&self) {
        self.deferred.check_timeout();
    }

    /// Route one command through classification and the matching
    /// handler.
    pub async fn route(&self, command: Command) -> RouteResult {
        info!(
            id = %command.id,
            text = %command.text,
            queued_ms = (Utc::now() - command.received_at).num_milliseconds(),
            "Routing command"
        );
        emit_event(&AgentEvent::CommandAccepted {
            id: command.id.to_string(),
            text: command.text.clone(),
        });

        // A new command always takes priority over a pending placement.
        self.deferred.cancel();

        let guard = match tokio::time::timeout(
            self.lock_timeout,
            Arc::clone(&self.exec_lock).lock_owned(),
        )
        .await
        {
            Ok(guard) => guard,
            Err(_) => {
                warn!(id = %command.id, "Execution lock busy; rejecting command");
                return RouteResult {
                    id: command.id,
                    status: RouteStatus::Busy,
                    message: "The system is busy with another command.".into(),
                    fallback_triggered: None,
                };
            }
        };

        // A command that held the lock while we waited may have left a
        // fresh deferred action behind; it loses to us the same way.
        self.deferred.cancel();

        self.state.begin(command.id);
        self.state.set_mode(SystemMode::Processing);

        let intent = self.classifier.classify(&command.text).await;
        info!(
            id = %command.id,
            intent = intent.intent.as_str(),
            source = ?intent.source,
            "Dispatching"
        );
        let result = self.dispatch(&command, &intent).await;

        if result.status == RouteStatus::AwaitingPlacement {
            // Suspended: the lock must not be held while waiting for
            // the user. Release it before returning; the trigger
            // callback re-acquires it.
            self.state.set_mode(SystemMode::WaitingForUser);
            drop(guard);
            return result;
        }

        self.state.clear_current();
        self.state.set_mode(SystemMode::Ready);
        drop(guard);
        result
    }

    /// Exhaustive intent dispatch. Unknown or low-confidence intents
    /// never reach here -- classification already collapsed them into
    /// GUI interaction.
    async fn dispatch(&self, command: &Command, intent: &IntentResult) -> RouteResult {
        match intent.intent {
            Intent::GuiInteraction => {
                let outcome = self.gui.execute_gui_command(intent).await;
                RouteResult {
                    id: command.id,
                    status: if outcome.success {
                        RouteStatus::Completed
                    } else {
                        RouteStatus::Failed
                    },
                    message: outcome.message,
                    fallback_triggered: Some(outcome.fallback_triggered),
                }
            }
            Intent::DeferredAction => {
                let content_request = intent
                    .parameters
                    .get("content_request")
                    .cloned()
                    .unwrap_or_else(|| command.text.clone());
                let action = intent
                    .parameters
                    .get("action")
                    .and_then(|a| ActionKind::parse(a))
                    .unwrap_or(ActionKind::TypeText);
                match self
                    .deferred
                    .initiate(&content_request, action, command.id)
                    .await
                {
                    InitiateOutcome::AwaitingPlacement => RouteResult {
                        id: command.id,
                        status: RouteStatus::AwaitingPlacement,
                        message: "Content ready; waiting for a placement click.".into(),
                        fallback_triggered: None,
                    },
                    InitiateOutcome::Failed(message) => RouteResult {
                        id: command.id,
                        status: RouteStatus::Failed,
                        message,
                        fallback_triggered: None,
                    },
                }
            }
            Intent::ConversationalChat => {
                self.answer_with_reasoning(command, "conversation", "Reply briefly and warmly.")
                    .await
            }
            Intent::QuestionAnswering => {
                self.answer_with_reasoning(
                    command,
                    "question_answering",
                    "Answer the question concisely.",
                )
                .await
            }
        }
    }

    /// Shared body of the chat and question handlers: one reasoning
    /// round-trip, spoken aloud.
    async fn answer_with_reasoning(
        &self,
        command: &Command,
        task: &str,
        instruction: &str,
    ) -> RouteResult {
        let prompt = format!(
            "{} Reply as JSON {{\"content\": \"...\"}}.\nUser: {}",
            instruction, command.text
        );
        match self
            .reasoning
            .get_plan(&prompt, json!({ "task": task }))
            .await
        {
            Ok(reply) => {
                let text = reply
                    .get("content")
                    .and_then(|c| c.as_str())
                    .or_else(|| reply.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if text.is_empty() {
                    self.audio.play(Cue::Failure);
                    return RouteResult {
                        id: command.id,
                        status: RouteStatus::Failed,
                        message: "The reasoning service returned an empty reply.".into(),
                        fallback_triggered: None,
                    };
                }
                self.audio.speak(&text);
                RouteResult {
                    id: command.id,
                    status: RouteStatus::Completed,
                    message: text,
                    fallback_triggered: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Reasoning reply failed");
                self.audio.play(Cue::Failure);
                self.audio
                    .speak("Sorry, I can't reach the reasoning service right now.");
                RouteResult {
                    id: command.id,
                    status: RouteStatus::Failed,
                    message: format!("Reasoning unavailable: {}", e),
                    fallback_triggered: None,
                }
            }
        }
    }

    /// Snapshot for the `status` IPC command.
    pub fn status_event(&self) -> AgentEvent {
        let current = self.state.current();
        AgentEvent::Status {
            mode: self.state.mode().as_str().to_string(),
            execution_id: current.map(|c| c.id.to_string()),
            running_ms: current
                .map(|c| (Utc::now() - c.started_at).num_milliseconds().max(0) as u64),
            deferred_active: self.deferred.is_active(),
            metrics: self.gui.metrics().snapshot(),
        }
    }

    /// Dismiss any pending deferred action (host-initiated).
    pub fn cancel_pending(&self) {
        self.deferred.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::accessibility::{Bounds, RoleSet, ScriptedTree, TreeAdapter, UiElement};
    use crate::config::{RecoveryConfig, ResolverConfig};
    use crate::deferred::listener::ClickListener;
    use crate::recovery::RecoveryManager;
    use crate::resolver::ElementResolver;
    use crate::services::input::{InputAdapter, RecordingInput};
    use crate::services::perception::{PerceptionAdapter, ScriptedPerception, VisionAnalysis};
    use crate::services::reasoning::ScriptedReasoning;

    struct Harness {
        router: CommandRouter,
        listener: Arc<ClickListener>,
        input: Arc<InputAdapter>,
        lock: Arc<AsyncMutex<()>>,
        state: Arc<SystemState>,
        deferred: Arc<DeferredActionEngine>,
    }

    fn button(title: &str) -> UiElement {
        UiElement {
            role: "button".to_string(),
            title: Some(title.to_string()),
            bounds: Bounds {
                x: 10,
                y: 10,
                width: 60,
                height: 20,
            },
            depth: 3,
            ..UiElement::default()
        }
    }

    /// Full router over scripted collaborators. The reasoning script is
    /// shared by classification, generation, and chat, so most tests
    /// use `ScriptedReasoning::failing` to force heuristic
    /// classification.
    fn harness(
        elements: Vec<UiElement>,
        reasoning: ScriptedReasoning,
        lock_timeout: Duration,
    ) -> Harness {
        let lock = Arc::new(AsyncMutex::new(()));
        let state = Arc::new(SystemState::new());
        let listener = Arc::new(ClickListener::new());
        let input = Arc::new(InputAdapter::Recording(RecordingInput::new()));
        let reasoning = Arc::new(ReasoningAdapter::Scripted(reasoning));

        let resolver = ElementResolver::new(
            Arc::new(TreeAdapter::Scripted(ScriptedTree::always(elements))),
            ResolverConfig::default(),
        );
        let recovery = RecoveryManager::new(RecoveryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 4,
            backoff_factor: 2.0,
        });
        let gui = Arc::new(FallbackCoordinator::new(
            resolver,
            recovery,
            Arc::new(PerceptionAdapter::Scripted(ScriptedPerception::always(
                VisionAnalysis::default(),
            ))),
            Arc::clone(&input),
            AudioFeedback::disabled(),
            RoleSet::interactive(),
            Duration::from_secs(2),
        ));
        let deferred = Arc::new(DeferredActionEngine::new(
            Arc::clone(&listener),
            Arc::clone(&lock),
            Arc::clone(&reasoning),
            Arc::clone(&input),
            AudioFeedback::disabled(),
            Duration::from_millis(500),
            Duration::from_secs(300),
            Arc::clone(&state),
        ));
        let classifier = IntentClassifier::new(Arc::clone(&reasoning));
        let router = CommandRouter::new(
            Arc::clone(&lock),
            Arc::clone(&state),
            classifier,
            gui,
            Arc::clone(&deferred),
            reasoning,
            AudioFeedback::disabled(),
            lock_timeout,
        );
        Harness {
            router,
            listener,
            input,
            lock,
            state,
            deferred,
        }
    }

    fn recorded(input: &InputAdapter) -> usize {
        let InputAdapter::Recording(recording) = input else {
            unreachable!()
        };
        recording.count()
    }

    #[tokio::test]
    async fn gui_command_completes_and_releases_the_lock() {
        let h = harness(
            vec![button("Save")],
            ScriptedReasoning::failing("offline"),
            Duration::from_millis(500),
        );
        let result = h.router.route(Command::new("click the save button")).await;

        assert_eq!(result.status, RouteStatus::Completed);
        assert_eq!(result.fallback_triggered, Some(false));
        assert_eq!(h.state.mode(), SystemMode::Ready);
        assert!(h.state.current().is_none());
        assert!(h.lock.try_lock().is_ok());
        assert_eq!(recorded(&h.input), 1);
    }

    #[tokio::test]
    async fn busy_lock_returns_busy_without_side_effects() {
        let h = harness(
            vec![button("Save")],
            ScriptedReasoning::failing("offline"),
            Duration::from_millis(50),
        );
        let _held = h.lock.clone().lock_owned().await;

        let result = h.router.route(Command::new("click the save button")).await;

        assert_eq!(result.status, RouteStatus::Busy);
        assert_eq!(h.state.mode(), SystemMode::Ready);
        assert_eq!(recorded(&h.input), 0);
    }

    #[tokio::test]
    async fn deferred_command_suspends_without_holding_the_lock() {
        let reasoning =
            ScriptedReasoning::always(serde_json::json!({ "content": "Hello there" }));
        let h = harness(vec![], reasoning, Duration::from_millis(500));

        let result = h.router.route(Command::new("write a greeting")).await;

        assert_eq!(result.status, RouteStatus::AwaitingPlacement);
        assert_eq!(h.state.mode(), SystemMode::WaitingForUser);
        // The central correctness property: suspended without the lock.
        assert!(h.lock.try_lock().is_ok());
        assert!(h.deferred.is_active());

        // Placement click executes and returns the system to ready.
        h.listener.record_position(50.0, 50.0);
        assert!(h.listener.notify_click());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorded(&h.input), 1);
        assert_eq!(h.state.mode(), SystemMode::Ready);
        assert!(!h.deferred.is_active());
    }

    #[tokio::test]
    async fn new_command_cancels_a_waiting_deferred_action() {
        // Classification comes back confident for the deferred request,
        // then the generation reply, then failures force heuristics for
        // the follow-up GUI command.
        let reasoning = ScriptedReasoning::sequence(vec![
            Err("use heuristics".into()),
            Ok(serde_json::json!({ "content": "Generated text" })),
            Err("use heuristics".into()),
        ]);
        let h = harness(vec![button("Close")], reasoning, Duration::from_millis(500));

        let first = h.router.route(Command::new("write a note")).await;
        assert_eq!(first.status, RouteStatus::AwaitingPlacement);
        assert!(h.deferred.is_active());

        // New command arrives while waiting: the pending placement is
        // cancelled, the new command routes normally, nothing deadlocks.
        let second = h.router.route(Command::new("click the close button")).await;
        assert_eq!(second.status, RouteStatus::Completed);
        assert!(!h.deferred.is_active());
        assert!(!h.listener.is_armed());
        assert_eq!(h.state.mode(), SystemMode::Ready);

        // Only the GUI click ran; the deferred payload never landed.
        assert_eq!(recorded(&h.input), 1);

        // A stale click after cancellation does nothing.
        assert!(!h.listener.notify_click());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorded(&h.input), 1);
    }

    #[tokio::test]
    async fn chat_command_speaks_the_reply() {
        let reasoning = ScriptedReasoning::sequence(vec![
            Ok(serde_json::json!({
                "intent": "conversational_chat",
                "confidence": 0.95
            })),
            Ok(serde_json::json!({ "content": "Hi! Ready when you are." })),
        ]);
        let h = harness(vec![], reasoning, Duration::from_millis(500));

        let result = h.router.route(Command::new("hello")).await;
        assert_eq!(result.status, RouteStatus::Completed);
        assert_eq!(result.message, "Hi! Ready when you are.");
    }

    #[tokio::test]
    async fn question_with_unreachable_reasoning_fails_cleanly() {
        let h = harness(
            vec![],
            ScriptedReasoning::failing("offline"),
            Duration::from_millis(500),
        );
        let result = h
            .router
            .route(Command::new("what is the capital of France"))
            .await;
        assert_eq!(result.status, RouteStatus::Failed);
        assert_eq!(h.state.mode(), SystemMode::Ready);
        assert!(h.lock.try_lock().is_ok());
    }

    #[tokio::test]
    async fn status_event_reports_mode_and_metrics() {
        let h = harness(
            vec![],
            ScriptedReasoning::failing("offline"),
            Duration::from_millis(500),
        );
        let AgentEvent::Status {
            mode,
            execution_id,
            running_ms,
            deferred_active,
            metrics,
        } = h.router.status_event()
        else {
            unreachable!()
        };
        assert_eq!(mode, "ready");
        assert!(execution_id.is_none());
        assert!(running_ms.is_none());
        assert!(!deferred_active);
        assert_eq!(metrics["fast_path_hits"], 0);
    }
}
