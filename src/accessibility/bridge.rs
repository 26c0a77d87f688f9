//! HTTP client for the accessibility bridge service.
//!
//! The bridge is a small host-side daemon with direct OS accessibility
//! API access; this client asks it for flattened element snapshots.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::{AccessError, TreeProvider, UiElement};

/// Accessibility bridge client.
pub struct BridgeProvider {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct SnapshotRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    app: Option<&'a str>,
}

impl BridgeProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl TreeProvider for BridgeProvider {
    async fn snapshot(&self, app_scope: Option<&str>) -> Result<Vec<UiElement>, AccessError> {
        let request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&SnapshotRequest { app: app_scope });

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AccessError::Timeout(self.timeout.as_millis() as u64)
            } else {
                AccessError::TreeUnavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(AccessError::PermissionDenied);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AccessError::TreeUnavailable(format!(
                "bridge returned {}: {}",
                status, body
            )));
        }

        let elements: Vec<UiElement> = resp
            .json()
            .await
            .map_err(|e| AccessError::TreeUnavailable(format!("bad snapshot payload: {}", e)))?;

        debug!(
            count = elements.len(),
            app = app_scope.unwrap_or("<active>"),
            "Snapshot received from accessibility bridge"
        );
        Ok(elements)
    }
}
