//! Agent configuration: thresholds, timeouts, role sets, service endpoints.
//!
//! Loaded once at startup from `agent_config.json` in the data directory
//! (written by the host shell's settings panel). Every field has a default
//! so a missing or partial file still yields a working configuration.

pub mod paths;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::get_data_dir;

/// Top-level agent_config.json shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub deferred: DeferredConfig,
    #[serde(default)]
    pub services: ServiceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Element resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Minimum fuzzy score (0-100) for a candidate to count as a match.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: u8,
    /// Budget for one accessibility-tree search, snapshot included.
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    /// Extra roles treated as actionable on top of the built-in set.
    #[serde(default)]
    pub extra_roles: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            search_timeout_ms: default_search_timeout_ms(),
            extra_roles: Vec::new(),
        }
    }
}

impl ResolverConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

/// Retry/backoff settings for flaky accessibility-tree access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Command routing and lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// How long a new command waits for the execution lock before the
    /// router answers "busy".
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Overall fast-path budget for one GUI command.
    #[serde(default = "default_command_budget_ms")]
    pub command_budget_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            command_budget_ms: default_command_budget_ms(),
        }
    }
}

impl RouterConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn command_budget(&self) -> Duration {
        Duration::from_millis(self.command_budget_ms)
    }
}

/// Deferred-action (content-then-place) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredConfig {
    /// How long a generated payload waits for its placement click.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

impl DeferredConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

/// Endpoints for the external collaborator services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Reasoning model endpoint (classification, content, chat).
    #[serde(default = "default_reasoning_url")]
    pub reasoning_url: String,
    /// Vision/perception endpoint (screenshot analysis).
    #[serde(default = "default_perception_url")]
    pub perception_url: String,
    /// Accessibility bridge endpoint (element-tree snapshots).
    #[serde(default = "default_accessibility_url")]
    pub accessibility_url: String,
    /// Per-request HTTP timeout for all of the above.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reasoning_url: default_reasoning_url(),
            perception_url: default_perception_url(),
            accessibility_url: default_accessibility_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Audio feedback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Master switch for the local success/failure/thinking cues.
    #[serde(default = "default_cues_enabled")]
    pub cues_enabled: bool,
    /// Cue volume (1.0 = normal).
    #[serde(default = "default_cue_volume")]
    pub cue_volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            cues_enabled: default_cues_enabled(),
            cue_volume: default_cue_volume(),
        }
    }
}

fn default_match_threshold() -> u8 {
    85
}
fn default_search_timeout_ms() -> u64 {
    900
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    1_500
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_command_budget_ms() -> u64 {
    2_000
}
fn default_wait_timeout_secs() -> u64 {
    300
}
fn default_reasoning_url() -> String {
    "http://127.0.0.1:8765/v1/plan".to_string()
}
fn default_perception_url() -> String {
    "http://127.0.0.1:8766/v1/analyze".to_string()
}
fn default_accessibility_url() -> String {
    "http://127.0.0.1:8767/v1/snapshot".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_cues_enabled() -> bool {
    true
}
fn default_cue_volume() -> f32 {
    1.0
}

/// Read agent_config.json from the data directory.
pub fn read_agent_config() -> AgentConfig {
    let path = get_config_path();
    read_json_file(&path).unwrap_or_default()
}

/// Path to agent_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("agent_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AgentConfig::default();
        assert_eq!(config.resolver.match_threshold, 85);
        assert_eq!(config.deferred.wait_timeout_secs, 300);
        assert!(config.recovery.backoff_factor > 1.0);
        assert!(config.router.lock_timeout() > Duration::ZERO);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"resolver": {"match_threshold": 70}}"#).unwrap();
        assert_eq!(config.resolver.match_threshold, 70);
        assert_eq!(config.recovery.max_attempts, 3);
        assert_eq!(config.services.request_timeout_ms, 10_000);
    }

    #[test]
    fn empty_object_is_all_defaults() {
        let config: AgentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.resolver.search_timeout_ms, 900);
        assert_eq!(config.router.command_budget_ms, 2_000);
    }
}
