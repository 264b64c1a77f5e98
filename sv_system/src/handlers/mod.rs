//! Intent handlers and their registry.
//!
//! A handler is a pure async function from an NLU result to a
//! [`HandlerResponse`]; everything with side effects on the device happens
//! later, in the response phase. Handlers never panic the pipeline: routing
//! wraps every call and degrades to an apology.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::data::{HandlerResponse, PendingAction};
use crate::nlu::{Intent, NluResult};
use crate::services::{ContentCatalog, ConversationStore, LlmService, PlayQueueStore};

mod chat;
mod control;
mod delete;
mod english;
mod music;
mod story;
mod system;

pub use chat::ChatHandler;
pub use control::ControlHandler;
pub use delete::DeleteHandler;
pub use english::EnglishHandler;
pub use music::MusicHandler;
pub use story::StoryHandler;
pub use system::SystemHandler;

/// Spoken when a handler or a downstream collaborator fails.
pub const SERVICE_APOLOGY: &str = "抱歉，服务暂时不可用，请稍后再试";

/// Per-invocation context a handler can write into.
#[derive(Default)]
pub struct HandlerContext {
    pending: Mutex<Option<PendingAction>>,
}

impl HandlerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for the next utterance to be routed back as a confirmation.
    pub fn set_pending_action(&self, action: PendingAction) {
        *self.pending.lock().expect("handler context poisoned") = Some(action);
    }

    /// Consumed by the pipeline after the handler returns.
    pub fn take_pending_action(&self) -> Option<PendingAction> {
        self.pending.lock().expect("handler context poisoned").take()
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        nlu: &NluResult,
        device_id: &str,
        context: &HandlerContext,
    ) -> eyre::Result<HandlerResponse>;

    /// Follow-up entry for a consumed [`PendingAction`]. Handlers that never
    /// install one keep the default.
    async fn handle_confirmation(
        &self,
        _text: &str,
        _data: &serde_json::Value,
        _device_id: &str,
    ) -> eyre::Result<HandlerResponse> {
        Ok(HandlerResponse::say("好的"))
    }
}

/// Routes an intent to its handler; also indexes handlers by name for the
/// pending-action follow-up path. Seeded once at startup.
pub struct HandlerRouter {
    by_intent: HashMap<Intent, Arc<dyn Handler>>,
    by_name: HashMap<&'static str, Arc<dyn Handler>>,
    chat: Arc<dyn Handler>,
}

impl HandlerRouter {
    pub fn new(
        catalog: Arc<dyn ContentCatalog>,
        queue: Arc<dyn PlayQueueStore>,
        llm: Arc<dyn LlmService>,
        conversation: Arc<dyn ConversationStore>,
    ) -> Self {
        let story = Arc::new(StoryHandler::new(catalog.clone()));
        let music = Arc::new(MusicHandler::new(catalog.clone(), queue.clone()));
        let english = Arc::new(EnglishHandler::new(catalog.clone()));
        let chat: Arc<dyn Handler> = Arc::new(ChatHandler::new(llm, conversation));
        let control = Arc::new(ControlHandler::new(catalog.clone(), queue.clone()));
        let system = Arc::new(SystemHandler::new());
        let delete = Arc::new(DeleteHandler::new(catalog));

        let mut by_intent: HashMap<Intent, Arc<dyn Handler>> = HashMap::new();
        for intent in [
            Intent::PlayStory,
            Intent::PlayStoryCategory,
            Intent::PlayStoryByName,
        ] {
            by_intent.insert(intent, story.clone());
        }
        for intent in [
            Intent::PlayMusic,
            Intent::PlayMusicCategory,
            Intent::PlayMusicByName,
            Intent::PlayMusicByArtist,
        ] {
            by_intent.insert(intent, music.clone());
        }
        for intent in [
            Intent::ControlPause,
            Intent::ControlResume,
            Intent::ControlStop,
            Intent::ControlNext,
            Intent::ControlPrevious,
            Intent::ControlVolumeUp,
            Intent::ControlVolumeDown,
            Intent::ControlPlayMode,
        ] {
            by_intent.insert(intent, control.clone());
        }
        for intent in [
            Intent::EnglishLearn,
            Intent::EnglishWord,
            Intent::EnglishFollow,
        ] {
            by_intent.insert(intent, english.clone());
        }
        by_intent.insert(Intent::Chat, chat.clone());
        by_intent.insert(Intent::DeleteContent, delete.clone());
        by_intent.insert(Intent::SystemTime, system.clone());
        by_intent.insert(Intent::SystemWeather, system.clone());

        let mut by_name: HashMap<&'static str, Arc<dyn Handler>> = HashMap::new();
        by_name.insert("delete", delete);

        Self {
            by_intent,
            by_name,
            chat,
        }
    }

    /// Dispatch to the matching handler; unknown intents fall back to chat,
    /// handler failures to the apology response.
    #[tracing::instrument(skip(self, nlu, context), fields(intent = ?nlu.intent))]
    pub async fn route(
        &self,
        nlu: &NluResult,
        device_id: &str,
        context: &HandlerContext,
    ) -> HandlerResponse {
        let handler = match self.by_intent.get(&nlu.intent) {
            Some(handler) => handler,
            None => {
                tracing::warn!(intent = ?nlu.intent, "no handler registered, using chat");
                &self.chat
            }
        };

        match handler.handle(nlu, device_id, context).await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(%error, intent = ?nlu.intent, "handler failed");
                HandlerResponse::say(SERVICE_APOLOGY)
            }
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.by_name.get(name)
    }
}
