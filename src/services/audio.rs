//! Audio feedback: short local cues plus spoken replies via the host TTS.
//!
//! Cues are small generated PCM tones played through a rodio `Sink` on a
//! blocking thread, fire-and-forget. Spoken text is not synthesized here;
//! it is forwarded to the host shell as a `speak` event.

use std::time::Duration;

use rodio::{OutputStream, Sink};
use tracing::{debug, warn};

use crate::config::AudioConfig;
use crate::ipc::bridge::emit_event;
use crate::ipc::AgentEvent;

/// Cue sample rate. Plain tones do not need more.
const SAMPLE_RATE: u32 = 22_050;

/// Feedback cue kinds, played at state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Success,
    Failure,
    Thinking,
}

/// Audio feedback sink. Cheap to clone around; playback never blocks the
/// caller and failures are logged, not surfaced.
#[derive(Debug, Clone)]
pub struct AudioFeedback {
    enabled: bool,
    volume: f32,
}

impl AudioFeedback {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            enabled: config.cues_enabled,
            volume: config.cue_volume,
        }
    }

    /// A silent instance for contexts where cues are unwanted.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            volume: 0.0,
        }
    }

    /// Play a cue, fire-and-forget.
    pub fn play(&self, cue: Cue) {
        if !self.enabled {
            return;
        }
        let samples = cue_samples(cue);
        let volume = self.volume;
        std::thread::Builder::new()
            .name("audio-cue".into())
            .spawn(move || {
                if let Err(e) = play_samples(samples, volume) {
                    warn!("Cue playback failed: {}", e);
                }
            })
            .map(|_| ())
            .unwrap_or_else(|e| warn!("Failed to spawn cue thread: {}", e));
        debug!(?cue, "Cue queued");
    }

    /// Forward text to the host shell's TTS engine, fire-and-forget.
    pub fn speak(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        emit_event(&AgentEvent::Speak {
            text: text.to_string(),
        });
    }
}

/// Play f32 PCM samples through the default output device.
///
/// Runs on a blocking thread; returns once playback finishes.
fn play_samples(samples: Vec<f32>, volume: f32) -> Result<(), String> {
    let (_stream, stream_handle) = OutputStream::try_default()
        .map_err(|e| format!("No audio output device available: {}", e))?;

    let sink = Sink::try_new(&stream_handle)
        .map_err(|e| format!("Failed to create audio sink: {}", e))?;

    sink.set_volume(volume.clamp(0.0, 2.0));
    sink.append(rodio::buffer::SamplesBuffer::new(1, SAMPLE_RATE, samples));
    sink.sleep_until_end();
    Ok(())
}

/// Generate the PCM for one cue.
///
/// Success is a rising two-tone, failure a falling two-tone, thinking a
/// single soft blip.
fn cue_samples(cue: Cue) -> Vec<f32> {
    match cue {
        Cue::Success => {
            let mut samples = tone(660.0, 90);
            samples.extend(tone(880.0, 120));
            samples
        }
        Cue::Failure => {
            let mut samples = tone(440.0, 90);
            samples.extend(tone(294.0, 160));
            samples
        }
        Cue::Thinking => tone(523.0, 70),
    }
}

/// A sine tone with a short linear fade at both ends to avoid clicks.
fn tone(freq: f32, millis: u64) -> Vec<f32> {
    let total = (SAMPLE_RATE as u64 * millis / 1_000) as usize;
    let fade = (total / 10).max(1);
    (0..total)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let envelope = if i < fade {
                i as f32 / fade as f32
            } else if i >= total - fade {
                (total - i) as f32 / fade as f32
            } else {
                1.0
            };
            0.35 * envelope * (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect()
}

#[allow(dead_code)]
fn cue_duration(cue: Cue) -> Duration {
    Duration::from_millis(cue_samples(cue).len() as u64 * 1_000 / SAMPLE_RATE as u64)
}
