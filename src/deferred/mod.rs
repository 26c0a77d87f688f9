//! Deferred actions: generate content now, place it on the user's next
//! click.
//!
//! State machine: Idle -> Generating -> WaitingForTrigger -> Executing
//! -> Idle, with every failure, cancellation, or timeout resetting to
//! Idle. The waiting state holds no execution lock -- that is the one
//! long-lived suspension in the system, and holding the lock there would
//! deadlock every subsequent command. The trigger callback re-acquires
//! the lock before executing the placement.

pub mod listener;

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ipc::bridge::emit_event;
use crate::ipc::AgentEvent;
use crate::router::{SystemMode, SystemState};
use crate::services::audio::{AudioFeedback, Cue};
use crate::services::input::{ActionKind, InputAdapter, InputRequest};
use crate::services::reasoning::ReasoningAdapter;

use listener::{ClickListener, TriggerEvent};

/// Where a deferred action currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredPhase {
    Idle,
    Generating,
    WaitingForTrigger,
    Executing,
}

/// The one process-wide deferred-action record.
#[derive(Debug)]
pub struct DeferredState {
    pub phase: DeferredPhase,
    pub content: Option<String>,
    pub action: ActionKind,
    pub execution_id: Option<Uuid>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
}

impl DeferredState {
    fn new() -> Self {
        Self {
            phase: DeferredPhase::Idle,
            content: None,
            action: ActionKind::TypeText,
            execution_id: None,
            initiated_at: None,
            timeout_at: None,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    /// Active means a background listener is waiting for the placement
    /// click.
    pub fn active(&self) -> bool {
        self.phase == DeferredPhase::WaitingForTrigger
    }
}

/// Outcome of initiating a deferred action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiateOutcome {
    /// Content generated; now waiting for the placement click.
    AwaitingPlacement,
    /// Generation failed; state was reset.
    Failed(String),
}

pub struct DeferredActionEngine {
    state: StdMutex<DeferredState>,
    listener: Arc<ClickListener>,
    exec_lock: Arc<AsyncMutex<()>>,
    reasoning: Arc<ReasoningAdapter>,
    input: Arc<InputAdapter>,
    audio: AudioFeedback,
    lock_timeout: Duration,
    wait_timeout: Duration,
    wait_task: StdMutex<Option<JoinHandle<()>>>,
    system: Arc<SystemState>,
}

impl DeferredActionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listener: Arc<ClickListener>,
        exec_lock: Arc<AsyncMutex<()>>,
        reasoning: Arc<ReasoningAdapter>,
        input: Arc<InputAdapter>,
        audio: AudioFeedback,
        lock_timeout: Duration,
        wait_timeout: Duration,
        system: Arc<SystemState>,
    ) -> Self {
        Self {
            state: StdMutex::new(DeferredState::new()),
            listener,
            exec_lock,
            reasoning,
            input,
            audio,
            lock_timeout,
            wait_timeout,
            wait_task: StdMutex::new(None),
            system,
        }
    }

    /// Whether a deferred action is currently awaiting its placement
    /// click.
    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().active()
    }

    /// Generate content for `content_request`, then suspend until the
    /// user clicks a placement target. Returns as soon as the listener
    /// is armed -- the caller must release the execution lock before any
    /// other command can run.
    pub async fn initiate(
        self: &Arc<Self>,
        content_request: &str,
        action: ActionKind,
        execution_id: Uuid,
    ) -> InitiateOutcome {
        // At most one deferred action system-wide: a second initiate
        // always cancels the first first.
        self.cancel();

        {
            let mut state = self.state.lock().unwrap();
            state.phase = DeferredPhase::Generating;
            state.execution_id = Some(execution_id);
            state.initiated_at = Some(Utc::now());
        }
        self.audio.play(Cue::Thinking);

        let content = match self.generate_content(content_request).await {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Content generation failed");
                self.state.lock().unwrap().reset();
                self.audio.play(Cue::Failure);
                self.audio
                    .speak("Sorry, I couldn't generate that content.");
                return InitiateOutcome::Failed(format!("content generation failed: {}", e));
            }
        };

        let (_fired, trigger_rx) = self.listener.arm();
        {
            let mut state = self.state.lock().unwrap();
            state.phase = DeferredPhase::WaitingForTrigger;
            state.content = Some(content);
            state.action = action;
            state.timeout_at = Some(Utc::now() + chrono::Duration::from_std(self.wait_timeout).unwrap_or_else(|_| chrono::Duration::seconds(300)));
        }

        let engine = Arc::clone(self);
        let wait = self.wait_timeout;
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(wait, trigger_rx).await {
                Ok(Ok(event)) => engine.on_trigger(event).await,
                Ok(Err(_)) => {
                    // Sender dropped: the action was cancelled.
                    debug!("Placement wait ended by cancellation");
                }
                Err(_) => engine.handle_timeout(),
            }
        });
        *self.wait_task.lock().unwrap() = Some(handle);

        info!(
            id = %execution_id,
            action = action.as_str(),
            wait_secs = self.wait_timeout.as_secs(),
            "Deferred action armed, waiting for placement click"
        );
        emit_event(&AgentEvent::AwaitingPlacement {
            id: execution_id.to_string(),
            action_type: action.as_str().to_string(),
        });
        self.audio
            .speak("Ready. Click where you want it placed.");
        InitiateOutcome::AwaitingPlacement
    }

    /// Execute the stored placement at the trigger location. Runs inside
    /// the wait task; re-acquires the execution lock first and resets
    /// state no matter how execution goes.
    async fn on_trigger(&self, event: TriggerEvent) {
        let guard = match tokio::time::timeout(
            self.lock_timeout,
            Arc::clone(&self.exec_lock).lock_owned(),
        )
        .await
        {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Could not re-acquire execution lock for placement; discarding action");
                self.listener.disarm();
                self.state.lock().unwrap().reset();
                self.system.set_mode(SystemMode::Ready);
                self.audio.play(Cue::Failure);
                return;
            }
        };

        // A cancel may have won the race between the click and the lock.
        let (content, action, execution_id) = {
            let mut state = self.state.lock().unwrap();
            if state.phase != DeferredPhase::WaitingForTrigger {
                debug!("Trigger fired but deferred action is no longer waiting");
                return;
            }
            state.phase = DeferredPhase::Executing;
            (
                state.content.take().unwrap_or_default(),
                state.action,
                state.execution_id.unwrap_or_else(Uuid::nil),
            )
        };
        self.system.set_mode(SystemMode::Processing);

        info!(
            x = event.x,
            y = event.y,
            at = %event.at,
            action = action.as_str(),
            "Executing deferred placement"
        );
        let request = InputRequest {
            kind: action,
            at: (event.x, event.y),
            payload: Some(content),
        };
        let outcome = self.input.execute(&request).await;

        match &outcome {
            Ok(()) => {
                self.audio.play(Cue::Success);
                emit_event(&AgentEvent::Result {
                    id: execution_id.to_string(),
                    status: "completed".into(),
                    message: "Placed the generated content.".into(),
                    fallback_triggered: None,
                });
            }
            Err(e) => {
                warn!(error = %e, "Deferred placement failed");
                self.audio.play(Cue::Failure);
                emit_event(&AgentEvent::Result {
                    id: execution_id.to_string(),
                    status: "failed".into(),
                    message: format!("Placement failed: {}", e),
                    fallback_triggered: None,
                });
            }
        }

        // Reset runs regardless of the execution outcome.
        self.state.lock().unwrap().reset();
        self.system.clear_current();
        self.system.set_mode(SystemMode::Ready);
        drop(guard);
    }

    /// Cancel a pending deferred action. Cooperative and idempotent:
    /// cancelling an idle engine, or cancelling twice, is a no-op. An
    /// action already executing is left to finish -- it holds the
    /// execution lock and resets itself.
    pub fn cancel(&self) {
        {
            let mut state = self.state.lock().unwrap();
            match state.phase {
                DeferredPhase::Idle | DeferredPhase::Executing => return,
                DeferredPhase::Generating | DeferredPhase::WaitingForTrigger => {
                    info!(id = ?state.execution_id, "Cancelling deferred action");
                    state.reset();
                }
            }
        }
        self.listener.disarm();
        if let Some(handle) = self.wait_task.lock().unwrap().take() {
            handle.abort();
        }
        self.system.clear_current();
        self.system.set_mode(SystemMode::Ready);
    }

    /// Timeout check: if the placement window has passed, behave like
    /// `cancel` plus a user-facing notification. The wait task calls
    /// this when its timer fires; it is also safe to call from a
    /// periodic sweep.
    pub fn check_timeout(&self) {
        let expired = {
            let state = self.state.lock().unwrap();
            state.active()
                && state
                    .timeout_at
                    .map(|deadline| Utc::now() > deadline)
                    .unwrap_or(false)
        };
        if expired {
            self.handle_timeout();
        }
    }

    fn handle_timeout(&self) {
        let (execution_id, waited_secs) = {
            let mut state = self.state.lock().unwrap();
            if state.phase != DeferredPhase::WaitingForTrigger {
                return;
            }
            let id = state.execution_id.unwrap_or_else(Uuid::nil);
            let waited = state
                .initiated_at
                .map(|t| (Utc::now() - t).num_seconds())
                .unwrap_or(0);
            state.reset();
            (id, waited)
        };
        self.listener.disarm();
        self.system.clear_current();
        self.system.set_mode(SystemMode::Ready);
        warn!(
            id = %execution_id,
            waited_secs,
            "Deferred action timed out waiting for placement"
        );
        self.audio.play(Cue::Failure);
        self.audio
            .speak("No placement click arrived in time, so I cancelled the pending action.");
        emit_event(&AgentEvent::Result {
            id: execution_id.to_string(),
            status: "timeout".into(),
            message: "No placement click arrived before the timeout.".into(),
            fallback_triggered: None,
        });
    }

    async fn generate_content(&self, content_request: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "Generate the content this request asks for. Reply as JSON \
             {{\"content\": \"...\"}}.\nRequest: {}",
            content_request
        );
        let reply = self
            .reasoning
            .get_plan(&prompt, json!({ "task": "content_generation" }))
            .await?;

        if let Some(content) = reply.get("content").and_then(|c| c.as_str()) {
            return Ok(content.to_string());
        }
        if let Some(content) = reply.as_str() {
            return Ok(content.to_string());
        }
        anyhow::bail!("reasoning reply carried no content field")
    }
}
