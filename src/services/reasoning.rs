//! Reasoning model client.
//!
//! The reasoning service answers plan requests with JSON: intent
//! classifications, generated content, or action plans. The core never
//! depends on which model sits behind the endpoint.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Common trait for reasoning backends.
#[allow(async_fn_in_trait)]
pub trait ReasoningService: Send + Sync {
    /// Request a plan for `prompt` with structured `context`; the reply
    /// shape depends on the prompt (intent, content, or plan).
    async fn get_plan(&self, prompt: &str, context: Value) -> anyhow::Result<Value>;
}

/// Enum-dispatch wrapper over reasoning backends.
///
/// This avoids dyn-compatibility issues with async trait methods.
pub enum ReasoningAdapter {
    Http(HttpReasoning),
    #[cfg(test)]
    Scripted(ScriptedReasoning),
}

impl ReasoningAdapter {
    pub async fn get_plan(&self, prompt: &str, context: Value) -> anyhow::Result<Value> {
        match self {
            Self::Http(r) => r.get_plan(prompt, context).await,
            #[cfg(test)]
            Self::Scripted(r) => r.get_plan(prompt, context).await,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// HTTP reasoning endpoint client.
pub struct HttpReasoning {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct PlanRequest<'a> {
    prompt: &'a str,
    context: Value,
}

impl HttpReasoning {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl ReasoningService for HttpReasoning {
    async fn get_plan(&self, prompt: &str, context: Value) -> anyhow::Result<Value> {
        debug!(endpoint = %self.endpoint, prompt_len = prompt.len(), "Requesting plan");

        let resp = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&PlanRequest { prompt, context })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Reasoning API error {}: {}", status, body);
        }

        let json: Value = resp.json().await?;
        Ok(json)
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Scripted reasoning backend for tests: replays a fixed sequence of
/// replies, repeating the last one once exhausted.
#[cfg(test)]
pub struct ScriptedReasoning {
    responses: std::sync::Mutex<Vec<Result<Value, String>>>,
    cursor: std::sync::atomic::AtomicUsize,
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedReasoning {
    pub fn always(value: Value) -> Self {
        Self::sequence(vec![Ok(value)])
    }

    pub fn failing(message: &str) -> Self {
        Self::sequence(vec![Err(message.to_string())])
    }

    pub fn sequence(responses: Vec<Result<Value, String>>) -> Self {
        assert!(!responses.is_empty(), "scripted reasoning needs a response");
        Self {
            responses: std::sync::Mutex::new(responses),
            cursor: std::sync::atomic::AtomicUsize::new(0),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
impl ReasoningService for ScriptedReasoning {
    async fn get_plan(&self, _prompt: &str, _context: Value) -> anyhow::Result<Value> {
        use std::sync::atomic::Ordering;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses.lock().unwrap();
        let idx = self
            .cursor
            .fetch_add(1, Ordering::SeqCst)
            .min(responses.len() - 1);
        responses[idx]
            .clone()
            .map_err(|m| anyhow::anyhow!("{}", m))
    }
}
