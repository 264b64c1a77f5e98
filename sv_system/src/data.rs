use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

/// What a handler asks the response phase to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerResponse {
    /// Spoken reply, synthesized through TTS. Empty means say nothing.
    pub text: String,
    /// Audio content to play after the spoken reply.
    pub play_url: Option<String>,
    /// Extra player commands, executed in order after playback is set up.
    pub commands: Vec<DeviceCommand>,
    /// Re-open the microphone once the response is out.
    pub continue_listening: bool,
    /// Whether auto-advance of the play queue should change.
    pub queue: QueueDirective,
    /// Skip the abort + pause preamble. Required for volume adjustments and
    /// resume, where interrupting would destroy the paused media state.
    pub skip_interrupt: bool,
}

impl HandlerResponse {
    pub fn say(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Player commands a handler can append to its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Pause,
    Play,
    VolumeUp,
    VolumeDown,
    Next,
    Previous,
}

/// Three-state queue directive. `Unchanged` is the common case and must stay
/// distinct from an explicit disable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueDirective {
    Enable,
    Disable,
    #[default]
    Unchanged,
}

/// One-shot slot letting a handler interpret the next utterance as a
/// confirmation instead of a fresh command.
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub action_type: String,
    /// Opaque payload only the originating handler understands.
    pub data: Value,
    /// Registry key used to route the follow-up text.
    pub handler_name: String,
    pub created_at: Instant,
    pub timeout: Duration,
}

impl PendingAction {
    /// Default lifetime; the pipeline overrides it with the configured
    /// value when installing the slot.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(action_type: &str, data: Value, handler_name: &str) -> Self {
        Self {
            action_type: action_type.to_string(),
            data,
            handler_name: handler_name.to_string(),
            created_at: Instant::now(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.timeout
    }
}

/// Kinds of playable catalog content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Story,
    Music,
}

/// A catalog entry as the core sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub title: String,
    pub kind: ContentKind,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    /// Absent when the audio blob has not been ingested yet; such entries
    /// are skipped by every playback path.
    #[serde(default)]
    pub play_url: Option<String>,
    #[serde(default)]
    pub play_count: u64,
}

/// An English vocabulary entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordEntry {
    pub word: String,
    pub translation: String,
    #[serde(default)]
    pub phonetic: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
}

/// Queue advancement behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    #[default]
    Sequential,
    SingleLoop,
    PlaylistLoop,
    Shuffle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of conversation history for the chat handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pending_action_expires_after_timeout() {
        let action = PendingAction::new(
            "delete_content",
            serde_json::json!({"content_ids": [1]}),
            "delete",
        );
        assert!(!action.is_expired());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(action.is_expired());
    }
}
