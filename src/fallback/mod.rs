//! GUI command execution: accessibility fast path, vision slow path.
//!
//! Per command the coordinator runs the fast path under a hard budget
//! (retries and cheap alternate strategies included) and escalates to
//! the vision service only when that is exhausted. Success through
//! either path is success to the caller; which path delivered it is
//! telemetry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::accessibility::{AccessError, RoleSet};
use crate::intent::IntentResult;
use crate::recovery::RecoveryManager;
use crate::resolver::{fuzzy, ElementResolver, MatchResult};
use crate::services::audio::{AudioFeedback, Cue};
use crate::services::input::{ActionKind, InputAdapter, InputRequest};
use crate::services::perception::PerceptionAdapter;

/// Minimum fuzzy score for a vision-located element to be clicked.
/// Vision labels are noisier than accessibility attributes, so the bar
/// sits below the fast-path threshold.
const VISION_MATCH_FLOOR: u8 = 60;

/// Why the coordinator left the fast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    NoMatch,
    PermissionError,
    Timeout,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::PermissionError => "permission_error",
            Self::Timeout => "timeout",
        }
    }
}

/// Final outcome of one GUI command.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,
    pub fallback_triggered: bool,
    pub message: String,
}

/// Counters for path outcomes, reported through the status surface.
#[derive(Debug, Default)]
pub struct FallbackMetrics {
    fast_path_hits: AtomicU64,
    vision_fallbacks: AtomicU64,
    failures: AtomicU64,
    escalations_no_match: AtomicU64,
    escalations_permission: AtomicU64,
    escalations_timeout: AtomicU64,
}

impl FallbackMetrics {
    fn record_escalation(&self, reason: EscalationReason) {
        let counter = match reason {
            EscalationReason::NoMatch => &self.escalations_no_match,
            EscalationReason::PermissionError => &self.escalations_permission,
            EscalationReason::Timeout => &self.escalations_timeout,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "fast_path_hits": self.fast_path_hits.load(Ordering::Relaxed),
            "vision_fallbacks": self.vision_fallbacks.load(Ordering::Relaxed),
            "failures": self.failures.load(Ordering::Relaxed),
            "escalations": {
                "no_match": self.escalations_no_match.load(Ordering::Relaxed),
                "permission_error": self.escalations_permission.load(Ordering::Relaxed),
                "timeout": self.escalations_timeout.load(Ordering::Relaxed),
            },
        })
    }
}

pub struct FallbackCoordinator {
    resolver: ElementResolver,
    recovery: RecoveryManager,
    perception: Arc<PerceptionAdapter>,
    input: Arc<InputAdapter>,
    audio: AudioFeedback,
    roles: RoleSet,
    budget: Duration,
    /// Set after a persistent permission failure; the fast path stays
    /// off for the rest of the session.
    fast_path_disabled: AtomicBool,
    metrics: FallbackMetrics,
}

impl FallbackCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: ElementResolver,
        recovery: RecoveryManager,
        perception: Arc<PerceptionAdapter>,
        input: Arc<InputAdapter>,
        audio: AudioFeedback,
        roles: RoleSet,
        budget: Duration,
    ) -> Self {
        Self {
            resolver,
            recovery,
            perception,
            input,
            audio,
            roles,
            budget,
            fast_path_disabled: AtomicBool::new(false),
            metrics: FallbackMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &FallbackMetrics {
        &self.metrics
    }

    pub fn fast_path_disabled(&self) -> bool {
        self.fast_path_disabled.load(Ordering::Relaxed)
    }

    /// Run one GUI command end to end.
    pub async fn execute_gui_command(&self, intent: &IntentResult) -> ActionOutcome {
        let Some(target) = intent
            .parameters
            .get("target")
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
        else {
            self.audio.play(Cue::Failure);
            return ActionOutcome {
                success: false,
                fallback_triggered: false,
                message: "No element target in the command.".into(),
            };
        };
        let app_scope = intent.parameters.get("app").map(String::as_str);
        let action = intent
            .parameters
            .get("action")
            .and_then(|a| ActionKind::parse(a))
            .unwrap_or(ActionKind::LeftClick);

        if self.fast_path_disabled() {
            return self
                .escalate(EscalationReason::PermissionError, target, app_scope, action)
                .await;
        }

        let started = std::time::Instant::now();
        match tokio::time::timeout(self.budget, self.fast_path(target, app_scope)).await {
            Ok(Ok(found)) => self.execute_fast_match(found, target, action, started).await,
            Ok(Err(AccessError::ElementNotFound(_))) => {
                self.escalate(EscalationReason::NoMatch, target, app_scope, action)
                    .await
            }
            Ok(Err(AccessError::PermissionDenied)) => {
                self.disable_fast_path();
                self.escalate(EscalationReason::PermissionError, target, app_scope, action)
                    .await
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Fast path failed after retries");
                self.escalate(EscalationReason::Timeout, target, app_scope, action)
                    .await
            }
            Err(_) => {
                warn!(
                    budget_ms = self.budget.as_millis() as u64,
                    "Fast path exceeded the command budget"
                );
                self.escalate(EscalationReason::Timeout, target, app_scope, action)
                    .await
            }
        }
    }

    /// Fast path: bounded-retry resolution, then cheap alternate
    /// strategies. A clean exhaustion comes back as `ElementNotFound`.
    async fn fast_path(
        &self,
        target: &str,
        app_scope: Option<&str>,
    ) -> Result<MatchResult, AccessError> {
        let resolved = self
            .recovery
            .with_retry(|| self.resolver.resolve(&self.roles, target, app_scope))
            .await?;
        if resolved.element.is_some() {
            return Ok(resolved);
        }
        debug!(
            target = %target,
            considered = ?resolved.candidates_considered,
            "Primary search had no qualifying candidate"
        );

        if let Some(rescued) = self
            .recovery
            .try_alternate_strategies(&self.resolver, target, app_scope)
            .await
        {
            return Ok(rescued);
        }
        Err(AccessError::ElementNotFound(target.to_string()))
    }

    async fn execute_fast_match(
        &self,
        found: MatchResult,
        target: &str,
        action: ActionKind,
        started: std::time::Instant,
    ) -> ActionOutcome {
        // fast_path only returns Ok once an element matched.
        let element = match found.element {
            Some(element) => element,
            None => {
                return self
                    .escalate(EscalationReason::NoMatch, target, None, action)
                    .await
            }
        };

        let label = element
            .title
            .clone()
            .or_else(|| element.description.clone())
            .unwrap_or_else(|| target.to_string());
        let request = InputRequest {
            kind: action,
            at: element.center(),
            payload: None,
        };

        match self.input.execute(&request).await {
            Ok(()) => {
                self.metrics.fast_path_hits.fetch_add(1, Ordering::Relaxed);
                info!(
                    target = %target,
                    matched = %label,
                    confidence = found.confidence,
                    attribute = ?found.matched_attribute,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Fast path action executed"
                );
                self.audio.play(Cue::Success);
                ActionOutcome {
                    success: true,
                    fallback_triggered: false,
                    message: format!("Done: {} \"{}\".", action_verb(action), label),
                }
            }
            Err(e) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Input injection failed on fast-path match");
                self.audio.play(Cue::Failure);
                ActionOutcome {
                    success: false,
                    fallback_triggered: false,
                    message: format!("Found \"{}\" but couldn't act on it: {}", label, e),
                }
            }
        }
    }

    /// Leave the fast path and try the vision service.
    async fn escalate(
        &self,
        reason: EscalationReason,
        target: &str,
        app_scope: Option<&str>,
        action: ActionKind,
    ) -> ActionOutcome {
        self.metrics.record_escalation(reason);
        info!(
            reason = reason.as_str(),
            target = %target,
            "Escalating to vision path"
        );

        match self.vision_path(target, app_scope, action).await {
            Ok(label) => {
                self.metrics.vision_fallbacks.fetch_add(1, Ordering::Relaxed);
                self.audio.play(Cue::Success);
                ActionOutcome {
                    success: true,
                    fallback_triggered: true,
                    message: format!("Done: {} \"{}\".", action_verb(action), label),
                }
            }
            Err(e) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, target = %target, "Vision path failed");
                self.audio.play(Cue::Failure);
                self.audio
                    .speak(&format!("I couldn't find {} on screen.", target));
                ActionOutcome {
                    success: false,
                    fallback_triggered: true,
                    message: format!("Could not locate \"{}\": {}", target, e),
                }
            }
        }
    }

    async fn vision_path(
        &self,
        target: &str,
        app_scope: Option<&str>,
        action: ActionKind,
    ) -> anyhow::Result<String> {
        let analysis = self.perception.analyze(app_scope).await?;
        debug!(
            description = %analysis.description,
            elements = analysis.elements.len(),
            "Vision analysis received"
        );

        let best = analysis
            .elements
            .iter()
            .map(|element| (fuzzy::score(target, &element.label), element))
            .filter(|(score, element)| *score >= VISION_MATCH_FLOOR && element.bounds.is_visible())
            .max_by_key(|(score, _)| *score);

        let Some((score, element)) = best else {
            anyhow::bail!(
                "vision located no element matching '{}' ({} candidates)",
                target,
                analysis.elements.len()
            );
        };

        info!(
            target = %target,
            label = %element.label,
            role = ?element.role,
            score,
            "Vision path located the element"
        );
        let request = InputRequest {
            kind: action,
            at: element.bounds.center(),
            payload: None,
        };
        self.input.execute(&request).await?;
        Ok(element.label.clone())
    }

    fn disable_fast_path(&self) {
        if !self.fast_path_disabled.swap(true, Ordering::Relaxed) {
            warn!("Accessibility permission denied; fast path disabled for this session");
            self.audio.speak(
                "I can't read the screen's elements. Please grant accessibility \
                 permission in your system settings; using the slower visual mode \
                 until then.",
            );
        }
    }
}

fn action_verb(action: ActionKind) -> &'static str {
    match action {
        ActionKind::LeftClick => "clicked",
        ActionKind::DoubleClick => "double-clicked",
        ActionKind::RightClick => "right-clicked",
        ActionKind::TypeText => "typed into",
    }
}
