//! Accessibility element model and tree-provider seam.
//!
//! The OS accessibility tree itself lives behind a bridge service; this
//! module owns the element snapshot types, the role vocabulary, and the
//! typed error classes that drive retry and fallback decisions.

pub mod bridge;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Element snapshot types
// ---------------------------------------------------------------------------

/// Pixel bounds of an element on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Bounds {
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Zero-area elements are not clickable targets.
    pub fn is_visible(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// One element from an accessibility-tree snapshot.
///
/// Ephemeral: reconstructed per search, never cached across resolutions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiElement {
    pub role: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Owning application name.
    #[serde(default)]
    pub app: String,
    /// Depth in the element tree; used to break score ties (shallower wins).
    #[serde(default)]
    pub depth: usize,
}

fn default_enabled() -> bool {
    true
}

impl Default for UiElement {
    fn default() -> Self {
        Self {
            role: String::new(),
            title: None,
            description: None,
            value: None,
            bounds: Bounds::default(),
            enabled: true,
            app: String::new(),
            depth: 0,
        }
    }
}

impl UiElement {
    pub fn center(&self) -> (i32, i32) {
        self.bounds.center()
    }
}

// ---------------------------------------------------------------------------
// Role sets
// ---------------------------------------------------------------------------

/// Roles considered actionable by default. Covers the common button-like,
/// link-like, and field-like kinds across platforms.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "push button",
    "toggle button",
    "link",
    "menu item",
    "menuitem",
    "list item",
    "check box",
    "checkbox",
    "radio button",
    "tab",
    "combo box",
    "combobox",
    "text box",
    "textbox",
    "text field",
    "entry",
    "edit",
];

/// The set of element roles a search considers.
///
/// `any()` matches every role (used by relaxed retry strategies);
/// an empty explicit set falls back to the interactive defaults.
#[derive(Debug, Clone)]
pub struct RoleSet(Option<HashSet<String>>);

impl RoleSet {
    /// Match every role.
    pub fn any() -> Self {
        Self(None)
    }

    /// The built-in actionable roles.
    pub fn interactive() -> Self {
        Self::of(INTERACTIVE_ROLES.iter().copied())
    }

    /// An explicit role set; an empty iterator yields the interactive set.
    pub fn of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: HashSet<String> = roles
            .into_iter()
            .map(|r| r.as_ref().trim().to_ascii_lowercase())
            .filter(|r| !r.is_empty())
            .collect();
        if set.is_empty() {
            Self::interactive()
        } else {
            Self(Some(set))
        }
    }

    /// The interactive defaults plus configured extras.
    pub fn interactive_with(extra: &[String]) -> Self {
        let mut set: HashSet<String> = INTERACTIVE_ROLES
            .iter()
            .map(|r| r.to_string())
            .collect();
        set.extend(
            extra
                .iter()
                .map(|r| r.trim().to_ascii_lowercase())
                .filter(|r| !r.is_empty()),
        );
        Self(Some(set))
    }

    pub fn contains(&self, role: &str) -> bool {
        match &self.0 {
            None => true,
            Some(set) => set.contains(&role.trim().to_ascii_lowercase()),
        }
    }
}

// ---------------------------------------------------------------------------
// Error classes
// ---------------------------------------------------------------------------

/// Failures surfaced by accessibility-tree access and element search.
///
/// The transient variants are retried by the recovery layer; permission
/// and not-found failures are not.
#[derive(Debug, Clone, Error)]
pub enum AccessError {
    /// The OS denied access to the element tree.
    #[error("accessibility permission denied")]
    PermissionDenied,
    /// The search or snapshot exceeded its budget.
    #[error("element search timed out after {0}ms")]
    Timeout(u64),
    /// The tree was temporarily unavailable (bridge restart, busy app).
    #[error("element tree unavailable: {0}")]
    TreeUnavailable(String),
    /// No candidate scored above the match threshold.
    #[error("no matching element found for '{0}'")]
    ElementNotFound(String),
}

impl AccessError {
    /// Whether a retry with backoff can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::TreeUnavailable(_))
    }
}

// ---------------------------------------------------------------------------
// Provider seam
// ---------------------------------------------------------------------------

/// Common trait for accessibility-tree snapshot providers.
#[allow(async_fn_in_trait)]
pub trait TreeProvider: Send + Sync {
    /// Take a flattened snapshot of the active (or named) application's
    /// element tree.
    async fn snapshot(&self, app_scope: Option<&str>) -> Result<Vec<UiElement>, AccessError>;
}

/// Enum-dispatch wrapper over tree providers.
///
/// This avoids dyn-compatibility issues with async trait methods.
pub enum TreeAdapter {
    Bridge(bridge::BridgeProvider),
    #[cfg(test)]
    Scripted(ScriptedTree),
}

impl TreeAdapter {
    pub async fn snapshot(&self, app_scope: Option<&str>) -> Result<Vec<UiElement>, AccessError> {
        match self {
            Self::Bridge(p) => p.snapshot(app_scope).await,
            #[cfg(test)]
            Self::Scripted(p) => p.snapshot(app_scope).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Scripted snapshot provider for tests: replays a fixed sequence of
/// responses, repeating the last one once exhausted.
#[cfg(test)]
pub struct ScriptedTree {
    responses: std::sync::Mutex<Vec<Result<Vec<UiElement>, AccessError>>>,
    cursor: std::sync::atomic::AtomicUsize,
    delay_ms: u64,
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedTree {
    pub fn always(elements: Vec<UiElement>) -> Self {
        Self::sequence(vec![Ok(elements)])
    }

    pub fn sequence(responses: Vec<Result<Vec<UiElement>, AccessError>>) -> Self {
        assert!(!responses.is_empty(), "scripted tree needs a response");
        Self {
            responses: std::sync::Mutex::new(responses),
            cursor: std::sync::atomic::AtomicUsize::new(0),
            delay_ms: 0,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Delay every snapshot, for exercising search-budget timeouts.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

#[cfg(test)]
impl TreeProvider for ScriptedTree {
    async fn snapshot(&self, _app_scope: Option<&str>) -> Result<Vec<UiElement>, AccessError> {
        use std::sync::atomic::Ordering;
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses.lock().unwrap();
        let idx = self
            .cursor
            .fetch_add(1, Ordering::SeqCst)
            .min(responses.len() - 1);
        responses[idx].clone()
    }
}
