//! Intent classification with a deterministic heuristic fallback.
//!
//! The reasoning model gets the first word; if it is unreachable, slow,
//! malformed, or unsure, a regex-based classifier takes over. Unmatched
//! commands default to GUI interaction with low confidence -- the most
//! backward-compatible, lowest-risk behavior.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::services::reasoning::ReasoningAdapter;

/// Model confidence below this is treated the same as no answer.
const LOW_CONFIDENCE: f32 = 0.5;

/// Confidence assigned when no heuristic pattern matches at all.
const DEFAULT_CONFIDENCE: f32 = 0.3;

/// Confidence assigned to a clean heuristic pattern hit.
const HEURISTIC_CONFIDENCE: f32 = 0.8;

/// The fixed set of command intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    GuiInteraction,
    ConversationalChat,
    DeferredAction,
    QuestionAnswering,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GuiInteraction => "gui_interaction",
            Self::ConversationalChat => "conversational_chat",
            Self::DeferredAction => "deferred_action",
            Self::QuestionAnswering => "question_answering",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "gui_interaction" => Some(Self::GuiInteraction),
            "conversational_chat" => Some(Self::ConversationalChat),
            "deferred_action" => Some(Self::DeferredAction),
            "question_answering" => Some(Self::QuestionAnswering),
            _ => None,
        }
    }
}

/// Which path produced a classification (telemetry only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSource {
    Model,
    Heuristic,
}

/// One classification outcome. Produced once per command, never mutated.
#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f32,
    pub parameters: HashMap<String, String>,
    pub source: ClassificationSource,
}

// ---------------------------------------------------------------------------
// Heuristic patterns
// ---------------------------------------------------------------------------

static DEFERRED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:please\s+)?(write|draft|compose|generate)\b|\bwhere(?:ver)?\s+i\s+click\b|\bthen\s+(?:paste|place|put)\s+it\b",
    )
    .expect("deferred pattern")
});

static GUI_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:please\s+)?(?:click|double[- ]?click|right[- ]?click|press|tap|open|close|select|choose|toggle|focus|launch|quit|minimi[sz]e|maximi[sz]e)\s+(?:on\s+)?(?:the\s+|a\s+|an\s+)?(.+)$",
    )
    .expect("gui target pattern")
});

static GUI_VERB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:please\s+)?(click|double[- ]?click|right[- ]?click|press|tap|open|close|select|choose|toggle|focus|launch|quit|minimi[sz]e|maximi[sz]e|scroll)\b",
    )
    .expect("gui verb pattern")
});

static QUESTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(what|who|when|where|why|how|which|is|are|was|were|does|do|did|can|could|should|tell\s+me)\b",
    )
    .expect("question pattern")
});

static CHAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(hi|hello|hey|thanks|thank\s+you|good\s+(?:morning|afternoon|evening)|goodbye|bye|never\s*mind)\b",
    )
    .expect("chat pattern")
});

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

pub struct IntentClassifier {
    reasoning: Arc<ReasoningAdapter>,
}

impl IntentClassifier {
    pub fn new(reasoning: Arc<ReasoningAdapter>) -> Self {
        Self { reasoning }
    }

    /// Classify a command. Never fails: any problem with the reasoning
    /// call drops to the deterministic heuristics.
    pub async fn classify(&self, command: &str) -> IntentResult {
        match self.classify_with_model(command).await {
            Some(result) if result.confidence >= LOW_CONFIDENCE => {
                info!(
                    intent = result.intent.as_str(),
                    confidence = result.confidence,
                    source = "model",
                    "Command classified"
                );
                return result;
            }
            Some(result) => {
                debug!(
                    confidence = result.confidence,
                    "Model classification below confidence floor, using heuristics"
                );
            }
            None => {}
        }

        let result = heuristic_classify(command);
        info!(
            intent = result.intent.as_str(),
            confidence = result.confidence,
            source = "heuristic",
            "Command classified"
        );
        result
    }

    async fn classify_with_model(&self, command: &str) -> Option<IntentResult> {
        let prompt = format!(
            "Classify this desktop voice command into one of: gui_interaction, \
             conversational_chat, deferred_action, question_answering. Reply as JSON \
             {{\"intent\": ..., \"confidence\": 0.0-1.0, \"parameters\": {{...}}}}.\n\
             Command: {}",
            command
        );
        let context = json!({ "task": "intent_classification" });

        match self.reasoning.get_plan(&prompt, context).await {
            Ok(reply) => match parse_model_reply(&reply) {
                Some(result) => Some(result),
                None => {
                    warn!(?reply, "Malformed classification reply, using heuristics");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Reasoning call failed, using heuristics");
                None
            }
        }
    }
}

/// Parse the model's `{"intent", "confidence", "parameters"}` reply.
fn parse_model_reply(reply: &serde_json::Value) -> Option<IntentResult> {
    let intent = Intent::parse(reply.get("intent")?.as_str()?)?;
    let confidence = reply
        .get("confidence")
        .and_then(|c| c.as_f64())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0) as f32;

    let mut parameters = HashMap::new();
    if let Some(params) = reply.get("parameters").and_then(|p| p.as_object()) {
        for (key, value) in params {
            let text = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            parameters.insert(key.clone(), text);
        }
    }

    Some(IntentResult {
        intent,
        confidence,
        parameters,
        source: ClassificationSource::Model,
    })
}

/// Deterministic pattern-based classification.
pub fn heuristic_classify(command: &str) -> IntentResult {
    let text = command.trim();

    if DEFERRED_RE.is_match(text) {
        let mut parameters = HashMap::new();
        parameters.insert("content_request".to_string(), text.to_string());
        return IntentResult {
            intent: Intent::DeferredAction,
            confidence: HEURISTIC_CONFIDENCE,
            parameters,
            source: ClassificationSource::Heuristic,
        };
    }

    if GUI_VERB_RE.is_match(text) {
        let mut parameters = HashMap::new();
        parameters.insert(
            "target".to_string(),
            extract_gui_target(text).unwrap_or_else(|| text.to_string()),
        );
        return IntentResult {
            intent: Intent::GuiInteraction,
            confidence: HEURISTIC_CONFIDENCE,
            parameters,
            source: ClassificationSource::Heuristic,
        };
    }

    if QUESTION_RE.is_match(text) {
        let mut parameters = HashMap::new();
        parameters.insert("question".to_string(), text.to_string());
        return IntentResult {
            intent: Intent::QuestionAnswering,
            confidence: HEURISTIC_CONFIDENCE,
            parameters,
            source: ClassificationSource::Heuristic,
        };
    }

    if CHAT_RE.is_match(text) {
        return IntentResult {
            intent: Intent::ConversationalChat,
            confidence: HEURISTIC_CONFIDENCE,
            parameters: HashMap::new(),
            source: ClassificationSource::Heuristic,
        };
    }

    // Nothing matched: GUI automation is the safe default.
    let mut parameters = HashMap::new();
    parameters.insert("target".to_string(), text.to_string());
    IntentResult {
        intent: Intent::GuiInteraction,
        confidence: DEFAULT_CONFIDENCE,
        parameters,
        source: ClassificationSource::Heuristic,
    }
}

/// Strip the leading action verb and articles from a GUI command to get
/// the element target ("click on the gmail link" -> "gmail link").
fn extract_gui_target(text: &str) -> Option<String> {
    let captures = GUI_TARGET_RE.captures(text)?;
    let target = captures
        .get(1)?
        .as_str()
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .trim()
        .to_string();
    if target.is_empty() {
        None
    } else {
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reasoning::ScriptedReasoning;
    use serde_json::json;

    fn classifier(reasoning: ScriptedReasoning) -> IntentClassifier {
        IntentClassifier::new(Arc::new(ReasoningAdapter::Scripted(reasoning)))
    }

    #[test]
    fn heuristic_gui_command_extracts_target() {
        let result = heuristic_classify("Click on the Gmail link");
        assert_eq!(result.intent, Intent::GuiInteraction);
        assert_eq!(result.parameters.get("target").unwrap(), "Gmail link");
        assert!(result.confidence >= 0.5);
    }

    #[test]
    fn heuristic_open_command_extracts_target() {
        let result = heuristic_classify("open the settings menu");
        assert_eq!(result.intent, Intent::GuiInteraction);
        assert_eq!(result.parameters.get("target").unwrap(), "settings menu");
    }

    #[test]
    fn heuristic_deferred_command() {
        let result = heuristic_classify("write a short thank you note");
        assert_eq!(result.intent, Intent::DeferredAction);
        assert_eq!(
            result.parameters.get("content_request").unwrap(),
            "write a short thank you note"
        );
    }

    #[test]
    fn heuristic_question_command() {
        let result = heuristic_classify("what time is my next meeting");
        assert_eq!(result.intent, Intent::QuestionAnswering);
        assert!(result.parameters.contains_key("question"));
    }

    #[test]
    fn heuristic_chat_command() {
        let result = heuristic_classify("hello there");
        assert_eq!(result.intent, Intent::ConversationalChat);
    }

    #[test]
    fn unmatched_command_defaults_to_gui_with_low_confidence() {
        let result = heuristic_classify("florble the wibbet");
        assert_eq!(result.intent, Intent::GuiInteraction);
        assert!(result.confidence < 0.5);
        assert_eq!(
            result.parameters.get("target").unwrap(),
            "florble the wibbet"
        );
    }

    #[tokio::test]
    async fn model_reply_is_used_when_confident() {
        let reasoning = ScriptedReasoning::always(json!({
            "intent": "question_answering",
            "confidence": 0.92,
            "parameters": { "question": "what is on screen" }
        }));
        let result = classifier(reasoning)
            .classify("what is on screen")
            .await;
        assert_eq!(result.intent, Intent::QuestionAnswering);
        assert_eq!(result.source, ClassificationSource::Model);
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_heuristics() {
        let result = classifier(ScriptedReasoning::failing("model offline"))
            .classify("click the save button")
            .await;
        assert_eq!(result.intent, Intent::GuiInteraction);
        assert_eq!(result.source, ClassificationSource::Heuristic);
        assert_eq!(result.parameters.get("target").unwrap(), "save button");
    }

    #[tokio::test]
    async fn low_model_confidence_falls_back_to_heuristics() {
        let reasoning = ScriptedReasoning::always(json!({
            "intent": "conversational_chat",
            "confidence": 0.2
        }));
        let result = classifier(reasoning).classify("click save").await;
        assert_eq!(result.intent, Intent::GuiInteraction);
        assert_eq!(result.source, ClassificationSource::Heuristic);
    }

    #[tokio::test]
    async fn malformed_model_reply_falls_back_to_heuristics() {
        let reasoning = ScriptedReasoning::always(json!({ "verdict": "sure" }));
        let result = classifier(reasoning).classify("hey").await;
        assert_eq!(result.intent, Intent::ConversationalChat);
        assert_eq!(result.source, ClassificationSource::Heuristic);
    }
}
