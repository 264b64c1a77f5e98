use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::data::{ChatRole, HandlerResponse};
use crate::handlers::{Handler, HandlerContext};
use crate::nlu::NluResult;
use crate::services::{ConversationStore, LlmService};

/// Turns of history handed to the model.
const HISTORY_LIMIT: usize = 10;

pub struct ChatHandler {
    llm: Arc<dyn LlmService>,
    conversation: Arc<dyn ConversationStore>,
    /// Farewells end the continuous conversation; trailing punctuation from
    /// the recognizer is tolerated.
    farewell: Regex,
}

impl ChatHandler {
    pub fn new(llm: Arc<dyn LlmService>, conversation: Arc<dyn ConversationStore>) -> Self {
        Self {
            llm,
            conversation,
            farewell: Regex::new(
                r"(?i)^(再见|拜拜|不聊了|不说了|不想聊了|晚安|bye|886|88|结束对话|退出)[。！!.~？?，,]*$",
            )
            .expect("static farewell pattern"),
        }
    }
}

#[async_trait]
impl Handler for ChatHandler {
    async fn handle(
        &self,
        nlu: &NluResult,
        device_id: &str,
        _context: &HandlerContext,
    ) -> eyre::Result<HandlerResponse> {
        let message = nlu.raw_text.trim();

        if self.farewell.is_match(message) {
            tracing::info!(device_id, "farewell detected, closing conversation");
            self.conversation.clear(device_id).await;
            return Ok(HandlerResponse::say("再见！下次再聊哦！"));
        }

        let history = self.conversation.context(device_id, HISTORY_LIMIT).await;
        let reply = self.llm.chat(message, &history).await?;

        self.conversation.add(device_id, ChatRole::User, message).await;
        self.conversation
            .add(device_id, ChatRole::Assistant, &reply)
            .await;

        Ok(HandlerResponse {
            text: reply,
            continue_listening: true,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlu::Intent;
    use crate::services::MemoryConversationStore;
    use std::collections::HashMap;

    struct EchoLlm;

    #[async_trait]
    impl LlmService for EchoLlm {
        async fn chat(
            &self,
            message: &str,
            history: &[crate::data::ChatMessage],
        ) -> eyre::Result<String> {
            Ok(format!("echo({}, history={})", message, history.len()))
        }

        async fn complete(&self, _message: &str, _system: &str) -> eyre::Result<String> {
            Ok(String::new())
        }
    }

    fn chat_nlu(text: &str) -> NluResult {
        NluResult {
            intent: Intent::Chat,
            slots: HashMap::new(),
            confidence: 0.5,
            raw_text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn chat_keeps_listening_and_records_history() {
        let store = Arc::new(MemoryConversationStore::new());
        let handler = ChatHandler::new(Arc::new(EchoLlm), store.clone());

        let first = handler
            .handle(&chat_nlu("你好"), "dev", &HandlerContext::new())
            .await
            .unwrap();
        assert!(first.continue_listening);
        assert_eq!(first.text, "echo(你好, history=0)");

        let second = handler
            .handle(&chat_nlu("再说一个"), "dev", &HandlerContext::new())
            .await
            .unwrap();
        assert_eq!(second.text, "echo(再说一个, history=2)");
    }

    #[tokio::test]
    async fn farewell_clears_history_and_stops_listening() {
        let store = Arc::new(MemoryConversationStore::new());
        let handler = ChatHandler::new(Arc::new(EchoLlm), store.clone());

        handler
            .handle(&chat_nlu("你好"), "dev", &HandlerContext::new())
            .await
            .unwrap();
        let farewell = handler
            .handle(&chat_nlu("再见！"), "dev", &HandlerContext::new())
            .await
            .unwrap();

        assert!(!farewell.continue_listening);
        assert_eq!(farewell.text, "再见！下次再聊哦！");
        assert!(store.context("dev", 10).await.is_empty());
    }
}
