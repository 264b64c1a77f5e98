//! Ports for the external collaborators the core calls, plus their default
//! implementations.
//!
//! The coordination layer only ever talks to these traits; a deployment
//! swaps the in-memory stores for its real catalog and queue backends
//! without touching the core.

use async_trait::async_trait;

use crate::data::{ChatMessage, ChatRole, ContentItem, ContentKind, PlayMode, WordEntry};

pub mod asr;
pub mod catalog;
pub mod conversation;
pub mod llm;
pub mod queue;
pub mod tts;

pub use asr::HttpAsr;
pub use catalog::MemoryCatalog;
pub use conversation::MemoryConversationStore;
pub use llm::HttpLlm;
pub use queue::MemoryQueueStore;
pub use tts::HttpTts;

/// Speech recognition. Empty text is a valid outcome ("not caught").
#[async_trait]
pub trait AsrService: Send + Sync {
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> eyre::Result<String>;
}

/// Speech synthesis to a playable URL. Identical input yields the same URL;
/// the cache behind that contract lives in the collaborator, not here.
#[async_trait]
pub trait TtsService: Send + Sync {
    async fn synthesize_to_url(&self, text: &str, language: Option<&str>) -> eyre::Result<String>;
}

/// Conversational model used by the chat handler and the NLU fallback.
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn chat(&self, message: &str, history: &[ChatMessage]) -> eyre::Result<String>;

    /// One-shot completion with an explicit system prompt, used for
    /// classification-style calls.
    async fn complete(&self, message: &str, system: &str) -> eyre::Result<String>;
}

/// The content catalog (stories, music, English words) behind its store.
#[async_trait]
pub trait ContentCatalog: Send + Sync {
    async fn random_story(&self, category: Option<&str>) -> eyre::Result<Option<ContentItem>>;
    async fn random_music(&self, category: Option<&str>) -> eyre::Result<Option<ContentItem>>;
    async fn content_by_name(&self, kind: ContentKind, name: &str)
        -> eyre::Result<Option<ContentItem>>;
    async fn content_by_id(&self, id: i64) -> eyre::Result<Option<ContentItem>>;
    async fn search_by_artist(
        &self,
        artist: &str,
        kind: ContentKind,
        limit: usize,
    ) -> eyre::Result<Vec<ContentItem>>;
    async fn search_by_artist_and_title(
        &self,
        artist: &str,
        title: &str,
    ) -> eyre::Result<Option<ContentItem>>;
    async fn content_list(
        &self,
        kind: ContentKind,
        category: Option<&str>,
        limit: usize,
        shuffle: bool,
    ) -> eyre::Result<Vec<ContentItem>>;
    /// Substring search over titles and artists, for voice-driven lookup.
    async fn smart_search(&self, keyword: &str, limit: usize) -> eyre::Result<Vec<ContentItem>>;
    async fn increment_play_count(&self, id: i64) -> eyre::Result<()>;
    /// Returns whether the entry existed. `hard` removes it outright instead
    /// of tombstoning.
    async fn delete_content(&self, id: i64, hard: bool) -> eyre::Result<bool>;
    async fn random_word(&self, level: Option<&str>) -> eyre::Result<Option<WordEntry>>;
    async fn word(&self, word: &str) -> eyre::Result<Option<WordEntry>>;
}

/// Per-device play queue. Failures inside a store degrade to "no content";
/// they never break a session.
#[async_trait]
pub trait PlayQueueStore: Send + Sync {
    async fn set_mode(&self, device_id: &str, mode: PlayMode);
    async fn mode(&self, device_id: &str) -> PlayMode;
    async fn set_queue(&self, device_id: &str, content_ids: Vec<i64>, start_index: usize);
    async fn add_to_queue(&self, device_id: &str, content_ids: Vec<i64>);
    /// Advance and return the next content id. `wrap` forces wrap-around for
    /// user-initiated navigation regardless of mode.
    async fn next(&self, device_id: &str, wrap: bool) -> Option<i64>;
    async fn previous(&self, device_id: &str, wrap: bool) -> Option<i64>;
    async fn clear(&self, device_id: &str);
    async fn queue(&self, device_id: &str) -> Vec<i64>;
}

/// Per-device conversation history for the chat handler.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn context(&self, device_id: &str, limit: usize) -> Vec<ChatMessage>;
    async fn add(&self, device_id: &str, role: ChatRole, content: &str);
    async fn clear(&self, device_id: &str);
}
