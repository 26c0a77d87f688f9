//! Vision/perception service client -- the slow path.
//!
//! The perception service captures a screenshot on its side of the
//! boundary, runs the vision model, and returns a scene description plus
//! located elements. Invoked only when the accessibility fast path has
//! been exhausted.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::accessibility::Bounds;

/// One element located by the vision model.
#[derive(Debug, Clone, Deserialize)]
pub struct VisionElement {
    pub label: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub bounds: Bounds,
}

/// Full analysis of one screenshot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisionAnalysis {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub elements: Vec<VisionElement>,
}

/// Common trait for perception backends.
#[allow(async_fn_in_trait)]
pub trait PerceptionService: Send + Sync {
    /// Capture and analyze the current screen (optionally scoped to one
    /// application's windows).
    async fn analyze(&self, app_scope: Option<&str>) -> anyhow::Result<VisionAnalysis>;
}

/// Enum-dispatch wrapper over perception backends.
pub enum PerceptionAdapter {
    Http(HttpPerception),
    #[cfg(test)]
    Scripted(ScriptedPerception),
}

impl PerceptionAdapter {
    pub async fn analyze(&self, app_scope: Option<&str>) -> anyhow::Result<VisionAnalysis> {
        match self {
            Self::Http(p) => p.analyze(app_scope).await,
            #[cfg(test)]
            Self::Scripted(p) => p.analyze(app_scope).await,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// HTTP perception endpoint client.
pub struct HttpPerception {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    app: Option<&'a str>,
}

impl HttpPerception {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl PerceptionService for HttpPerception {
    async fn analyze(&self, app_scope: Option<&str>) -> anyhow::Result<VisionAnalysis> {
        let resp = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&AnalyzeRequest { app: app_scope })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Perception API error {}: {}", status, body);
        }

        let analysis: VisionAnalysis = resp.json().await?;
        debug!(
            elements = analysis.elements.len(),
            "Vision analysis received"
        );
        Ok(analysis)
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Scripted perception backend for tests.
#[cfg(test)]
pub struct ScriptedPerception {
    response: Result<VisionAnalysis, String>,
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedPerception {
    pub fn always(analysis: VisionAnalysis) -> Self {
        Self {
            response: Ok(analysis),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
impl PerceptionService for ScriptedPerception {
    async fn analyze(&self, _app_scope: Option<&str>) -> anyhow::Result<VisionAnalysis> {
        use std::sync::atomic::Ordering;
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .clone()
            .map_err(|m| anyhow::anyhow!("{}", m))
    }
}
