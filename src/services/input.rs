//! OS input injection: pointer clicks and text placement.
//!
//! Clicks are simulated with rdev (move, press, release with short
//! settle delays). Text is placed via clipboard + simulated Ctrl+V -- the
//! same paste strategy the dictation path uses -- with the previous
//! clipboard contents restored afterwards.

use rdev::{simulate, Button, EventType, Key};
use tracing::{debug, info, warn};

/// What to do at the resolved location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    LeftClick,
    DoubleClick,
    RightClick,
    /// Click to focus, then paste the payload text.
    TypeText,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeftClick => "left_click",
            Self::DoubleClick => "double_click",
            Self::RightClick => "right_click",
            Self::TypeText => "type_text",
        }
    }

    /// Parse an action name as it appears in intent parameters.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left_click" | "left-click" | "click" => Some(Self::LeftClick),
            "double_click" | "double-click" => Some(Self::DoubleClick),
            "right_click" | "right-click" => Some(Self::RightClick),
            "type_text" | "type" | "paste" => Some(Self::TypeText),
            _ => None,
        }
    }
}

/// One injection request: an action, a screen point, and an optional
/// text payload (required for `TypeText`).
#[derive(Debug, Clone)]
pub struct InputRequest {
    pub kind: ActionKind,
    pub at: (i32, i32),
    pub payload: Option<String>,
}

/// Common trait for input injection backends.
#[allow(async_fn_in_trait)]
pub trait InputInjector: Send + Sync {
    async fn execute(&self, request: &InputRequest) -> anyhow::Result<()>;
}

/// Enum-dispatch wrapper over input backends.
pub enum InputAdapter {
    Native(NativeInput),
    #[cfg(test)]
    Recording(RecordingInput),
}

impl InputAdapter {
    pub async fn execute(&self, request: &InputRequest) -> anyhow::Result<()> {
        match self {
            Self::Native(i) => i.execute(request).await,
            #[cfg(test)]
            Self::Recording(i) => i.execute(request).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Native backend
// ---------------------------------------------------------------------------

/// Real OS-level injection via rdev + clipboard paste.
pub struct NativeInput;

impl InputInjector for NativeInput {
    async fn execute(&self, request: &InputRequest) -> anyhow::Result<()> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || execute_sync(&request))
            .await
            .map_err(|e| anyhow::anyhow!("Input task panicked: {}", e))?
    }
}

fn execute_sync(request: &InputRequest) -> anyhow::Result<()> {
    info!(
        kind = request.kind.as_str(),
        x = request.at.0,
        y = request.at.1,
        "Injecting input"
    );

    move_pointer(request.at)?;

    match request.kind {
        ActionKind::LeftClick => click_button(Button::Left, 1)?,
        ActionKind::DoubleClick => click_button(Button::Left, 2)?,
        ActionKind::RightClick => click_button(Button::Right, 1)?,
        ActionKind::TypeText => {
            // Focus the target field first, then paste.
            click_button(Button::Left, 1)?;
            let payload = request
                .payload
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("type_text requires a payload"))?;
            paste_text(payload)?;
        }
    }
    Ok(())
}

fn move_pointer(at: (i32, i32)) -> anyhow::Result<()> {
    send(EventType::MouseMove {
        x: at.0 as f64,
        y: at.1 as f64,
    })?;
    // Let the window under the pointer receive the hover before pressing.
    std::thread::sleep(std::time::Duration::from_millis(30));
    Ok(())
}

fn click_button(button: Button, times: u32) -> anyhow::Result<()> {
    for _ in 0..times {
        send(EventType::ButtonPress(button))?;
        std::thread::sleep(std::time::Duration::from_millis(20));
        send(EventType::ButtonRelease(button))?;
        std::thread::sleep(std::time::Duration::from_millis(40));
    }
    Ok(())
}

/// Place text into the focused field via clipboard + Ctrl+V, restoring
/// the previous clipboard contents afterwards (best-effort).
fn paste_text(text: &str) -> anyhow::Result<()> {
    use arboard::Clipboard;

    debug!(len = text.len(), "Placing text via clipboard paste");

    let mut clipboard =
        Clipboard::new().map_err(|e| anyhow::anyhow!("Failed to open clipboard: {}", e))?;

    let previous = clipboard.get_text().ok();

    clipboard
        .set_text(text)
        .map_err(|e| anyhow::anyhow!("Failed to set clipboard text: {}", e))?;

    // Small delay to ensure the clipboard is ready before the paste.
    std::thread::sleep(std::time::Duration::from_millis(30));

    send(EventType::KeyPress(Key::ControlLeft))?;
    send(EventType::KeyPress(Key::KeyV))?;
    std::thread::sleep(std::time::Duration::from_millis(20));
    send(EventType::KeyRelease(Key::KeyV))?;
    send(EventType::KeyRelease(Key::ControlLeft))?;

    // Restore the previous clipboard once the paste has landed.
    if let Some(prev) = previous {
        std::thread::sleep(std::time::Duration::from_millis(200));
        if let Err(e) = clipboard.set_text(&prev) {
            warn!("Failed to restore clipboard: {}", e);
        }
    }

    Ok(())
}

fn send(event: EventType) -> anyhow::Result<()> {
    simulate(&event).map_err(|_| anyhow::anyhow!("Failed to simulate input event: {:?}", event))
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Recording input backend for tests: stores every request instead of
/// touching the OS.
#[cfg(test)]
pub struct RecordingInput {
    pub requests: std::sync::Mutex<Vec<InputRequest>>,
    fail: bool,
}

#[cfg(test)]
impl RecordingInput {
    pub fn new() -> Self {
        Self {
            requests: std::sync::Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            requests: std::sync::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[cfg(test)]
impl InputInjector for RecordingInput {
    async fn execute(&self, request: &InputRequest) -> anyhow::Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            anyhow::bail!("injection refused");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_names_are_stable() {
        assert_eq!(ActionKind::LeftClick.as_str(), "left_click");
        assert_eq!(ActionKind::TypeText.as_str(), "type_text");
    }

    #[test]
    fn action_kind_parses_common_spellings() {
        assert_eq!(ActionKind::parse("click"), Some(ActionKind::LeftClick));
        assert_eq!(ActionKind::parse("Double-Click"), Some(ActionKind::DoubleClick));
        assert_eq!(ActionKind::parse("type"), Some(ActionKind::TypeText));
        assert_eq!(ActionKind::parse("hover"), None);
    }

    #[tokio::test]
    async fn recording_backend_captures_requests() {
        let input = RecordingInput::new();
        input
            .execute(&InputRequest {
                kind: ActionKind::LeftClick,
                at: (10, 20),
                payload: None,
            })
            .await
            .unwrap();
        input
            .execute(&InputRequest {
                kind: ActionKind::TypeText,
                at: (5, 5),
                payload: Some("hello".into()),
            })
            .await
            .unwrap();
        let requests = input.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].kind, ActionKind::LeftClick);
        assert_eq!(requests[1].payload.as_deref(), Some("hello"));
    }
}
