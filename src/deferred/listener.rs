//! Global placement-trigger listener.
//!
//! One rdev listen thread lives for the whole process (low-level hooks
//! cannot be torn down per-action); arming installs a one-shot slot that
//! the next global left-button press consumes. The slot's atomic
//! "already fired" flag guarantees at-most-once delivery even when
//! trigger and cancel race.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// The placement click: where and when it landed.
#[derive(Debug, Clone, Copy)]
pub struct TriggerEvent {
    pub x: i32,
    pub y: i32,
    pub at: DateTime<Utc>,
}

struct TriggerSlot {
    fired: Arc<AtomicBool>,
    tx: Option<oneshot::Sender<TriggerEvent>>,
}

/// One-shot click trigger shared between the global pointer thread and
/// the deferred-action engine.
pub struct ClickListener {
    slot: Mutex<Option<TriggerSlot>>,
    // rdev reports button presses without coordinates; the pointer
    // position comes from the most recent move event.
    last_x: AtomicI32,
    last_y: AtomicI32,
}

impl Default for ClickListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ClickListener {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            last_x: AtomicI32::new(0),
            last_y: AtomicI32::new(0),
        }
    }

    /// Arm the one-shot trigger, replacing any previously armed slot
    /// (whose receiver then observes cancellation).
    pub fn arm(&self) -> (Arc<AtomicBool>, oneshot::Receiver<TriggerEvent>) {
        let fired = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();
        let mut guard = self.slot.lock().unwrap();
        if guard.is_some() {
            debug!("Replacing an armed trigger slot");
        }
        *guard = Some(TriggerSlot {
            fired: Arc::clone(&fired),
            tx: Some(tx),
        });
        (fired, rx)
    }

    /// Disarm the trigger. Idempotent; a disarmed slot swallows any
    /// late click events, and the waiting receiver observes
    /// cancellation through the dropped sender.
    pub fn disarm(&self) {
        if let Some(slot) = self.slot.lock().unwrap().take() {
            slot.fired.store(true, Ordering::SeqCst);
            debug!("Trigger slot disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    /// Track the pointer so the next press knows its coordinates.
    pub fn record_position(&self, x: f64, y: f64) {
        self.last_x.store(x.round() as i32, Ordering::Relaxed);
        self.last_y.store(y.round() as i32, Ordering::Relaxed);
    }

    /// Deliver a click to the armed slot, if any. The atomic swap makes
    /// delivery at-most-once even under concurrent press events.
    /// Returns whether the event was delivered.
    pub fn notify_click(&self) -> bool {
        let mut guard = self.slot.lock().unwrap();
        let Some(slot) = guard.as_mut() else {
            return false;
        };
        if slot.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(tx) = slot.tx.take() else {
            return false;
        };
        let event = TriggerEvent {
            x: self.last_x.load(Ordering::Relaxed),
            y: self.last_y.load(Ordering::Relaxed),
            at: Utc::now(),
        };
        *guard = None;
        tx.send(event).is_ok()
    }
}

/// Spawn the process-wide pointer listener thread feeding `listener`.
///
/// rdev's listen callback runs for the process lifetime; per-action
/// arming and disarming happens on the slot, never on the thread.
pub fn spawn_global_listener(listener: Arc<ClickListener>) {
    std::thread::Builder::new()
        .name("trigger-listener".into())
        .spawn(move || {
            info!("Global pointer listener starting");
            let result = rdev::listen(move |event| match event.event_type {
                rdev::EventType::MouseMove { x, y } => listener.record_position(x, y),
                rdev::EventType::ButtonPress(rdev::Button::Left) => {
                    if listener.notify_click() {
                        debug!("Placement trigger delivered");
                    }
                }
                _ => {}
            });
            if let Err(e) = result {
                warn!("Global pointer listener failed: {:?}", e);
            }
        })
        .expect("Failed to spawn trigger listener thread");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn click_is_delivered_once() {
        let listener = ClickListener::new();
        listener.record_position(120.0, 80.0);
        let (_fired, rx) = listener.arm();

        assert!(listener.notify_click());
        assert!(!listener.notify_click()); // one-shot: second press is swallowed

        let event = rx.await.unwrap();
        assert_eq!((event.x, event.y), (120, 80));
        assert!(!listener.is_armed());
    }

    #[tokio::test]
    async fn disarm_cancels_the_receiver() {
        let listener = ClickListener::new();
        let (fired, rx) = listener.arm();
        listener.disarm();
        assert!(fired.load(Ordering::SeqCst));
        assert!(rx.await.is_err());
        assert!(!listener.notify_click());
    }

    #[test]
    fn disarm_is_idempotent() {
        let listener = ClickListener::new();
        listener.disarm();
        let (_fired, _rx) = listener.arm();
        listener.disarm();
        listener.disarm();
        assert!(!listener.is_armed());
    }

    #[tokio::test]
    async fn rearming_replaces_the_previous_slot() {
        let listener = ClickListener::new();
        let (_first_fired, first_rx) = listener.arm();
        let (_second_fired, second_rx) = listener.arm();

        assert!(listener.notify_click());
        assert!(first_rx.await.is_err());
        assert!(second_rx.await.is_ok());
    }

    #[test]
    fn unarmed_clicks_are_ignored() {
        let listener = ClickListener::new();
        listener.record_position(5.0, 5.0);
        assert!(!listener.notify_click());
    }
}
