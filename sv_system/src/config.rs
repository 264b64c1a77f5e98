use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and capture parameters for the per-device coordination core.
///
/// Embedded verbatim into the server configuration so every knob can be
/// overridden from the config file or environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// How long to wait for further streaming ASR partials before treating
    /// the last one as the full utterance.
    pub instruction_debounce_ms: u64,
    /// Guard window between a playback-end event and advancing the queue,
    /// absorbing the spurious Idle emitted between a TTS segment and the
    /// next track.
    pub auto_play_guard_ms: u64,
    /// Lifetime of a multi-turn confirmation slot.
    pub pending_action_timeout_secs: u64,
    /// How long `request_reply` waits for the device to answer.
    pub reply_timeout_secs: u64,
    pub audio: AudioConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            instruction_debounce_ms: 1500,
            auto_play_guard_ms: 1500,
            pending_action_timeout_secs: 30,
            reply_timeout_secs: 10,
            audio: AudioConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn instruction_debounce(&self) -> Duration {
        Duration::from_millis(self.instruction_debounce_ms)
    }

    pub fn auto_play_guard(&self) -> Duration {
        Duration::from_millis(self.auto_play_guard_ms)
    }

    pub fn pending_action_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_action_timeout_secs)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

/// Capture format and endpointing thresholds for the device microphone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Bytes per sample, 2 for S16_LE.
    pub sample_width: u16,
    pub channels: u16,
    /// Seconds of continuous silence that end a recording.
    pub silence_threshold: f64,
    /// Hard cap on a single recording, seconds.
    pub max_duration: f64,
    /// Recordings shorter than this are never endpointed by silence.
    pub min_duration: f64,
    /// Seconds to wait for the first audio frame after a wake word.
    pub wake_timeout: f64,
    /// RMS level above which a chunk counts as voice.
    pub energy_threshold: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            sample_width: 2,
            channels: 1,
            silence_threshold: 0.5,
            max_duration: 10.0,
            min_duration: 0.3,
            wake_timeout: 5.0,
            energy_threshold: 500.0,
        }
    }
}

impl AudioConfig {
    pub fn wake_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.wake_timeout)
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.sample_width * 8
    }
}
