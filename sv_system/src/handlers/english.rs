use std::sync::Arc;

use async_trait::async_trait;

use crate::data::{HandlerResponse, WordEntry};
use crate::handlers::{Handler, HandlerContext};
use crate::nlu::{Intent, NluResult};
use crate::services::ContentCatalog;

pub struct EnglishHandler {
    catalog: Arc<dyn ContentCatalog>,
}

impl EnglishHandler {
    pub fn new(catalog: Arc<dyn ContentCatalog>) -> Self {
        Self { catalog }
    }

    fn word_response(entry: WordEntry) -> HandlerResponse {
        let mut text = format!("{}的英语是{}", entry.translation, entry.word);
        if let Some(phonetic) = &entry.phonetic {
            text.push_str(&format!("，读作{phonetic}"));
        }
        HandlerResponse {
            text,
            play_url: entry.audio_url,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Handler for EnglishHandler {
    async fn handle(
        &self,
        nlu: &NluResult,
        _device_id: &str,
        _context: &HandlerContext,
    ) -> eyre::Result<HandlerResponse> {
        match nlu.intent {
            Intent::EnglishLearn => match self.catalog.random_word(Some("basic")).await? {
                Some(entry) => Ok(Self::word_response(entry)),
                None => Ok(HandlerResponse::say("英语学习功能暂时不可用，稍后再试吧")),
            },
            Intent::EnglishWord => {
                let word = nlu.slot("word").unwrap_or_default();
                match self.catalog.word(word).await? {
                    Some(entry) => Ok(Self::word_response(entry)),
                    None => Ok(HandlerResponse::say(format!(
                        "抱歉，我不知道{word}用英语怎么说"
                    ))),
                }
            }
            Intent::EnglishFollow => {
                let word = nlu.slot("word").unwrap_or_default();
                Ok(HandlerResponse {
                    text: format!("请跟我读：{word}"),
                    continue_listening: true,
                    ..Default::default()
                })
            }
            _ => Ok(HandlerResponse::say("我们来学英语吧！")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryCatalog;
    use std::collections::HashMap;

    #[tokio::test]
    async fn word_lookup_speaks_translation_and_plays_audio() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert_word(WordEntry {
            word: "apple".to_string(),
            translation: "苹果".to_string(),
            phonetic: Some("ˈæpl".to_string()),
            audio_url: Some("http://h/apple.mp3".to_string()),
        });
        let handler = EnglishHandler::new(catalog);

        let nlu = NluResult {
            intent: Intent::EnglishWord,
            slots: HashMap::from([("word".to_string(), "苹果".to_string())]),
            confidence: 0.9,
            raw_text: "苹果用英语怎么说".to_string(),
        };
        let response = handler.handle(&nlu, "dev", &HandlerContext::new()).await.unwrap();

        assert_eq!(response.text, "苹果的英语是apple，读作ˈæpl");
        assert_eq!(response.play_url.as_deref(), Some("http://h/apple.mp3"));
    }

    #[tokio::test]
    async fn follow_mode_reopens_the_microphone() {
        let handler = EnglishHandler::new(Arc::new(MemoryCatalog::new()));
        let nlu = NluResult {
            intent: Intent::EnglishFollow,
            slots: HashMap::from([("word".to_string(), "hello".to_string())]),
            confidence: 0.9,
            raw_text: "跟我读hello".to_string(),
        };
        let response = handler.handle(&nlu, "dev", &HandlerContext::new()).await.unwrap();
        assert!(response.continue_listening);
        assert_eq!(response.text, "请跟我读：hello");
    }
}
