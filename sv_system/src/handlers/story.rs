use std::sync::Arc;

use async_trait::async_trait;

use crate::data::{ContentKind, HandlerResponse};
use crate::handlers::{Handler, HandlerContext};
use crate::nlu::{Intent, NluResult};
use crate::services::ContentCatalog;

pub struct StoryHandler {
    catalog: Arc<dyn ContentCatalog>,
}

impl StoryHandler {
    pub fn new(catalog: Arc<dyn ContentCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Handler for StoryHandler {
    async fn handle(
        &self,
        nlu: &NluResult,
        _device_id: &str,
        _context: &HandlerContext,
    ) -> eyre::Result<HandlerResponse> {
        let content = match nlu.intent {
            Intent::PlayStory => self.catalog.random_story(None).await?,
            Intent::PlayStoryCategory => self.catalog.random_story(nlu.slot("category")).await?,
            Intent::PlayStoryByName => match nlu.slot("story_name") {
                Some(name) => self.catalog.content_by_name(ContentKind::Story, name).await?,
                None => None,
            },
            _ => None,
        };

        // Entries without ingested audio are not playable.
        let content = content.filter(|c| c.play_url.is_some());

        let Some(content) = content else {
            return Ok(HandlerResponse::say("抱歉，没有找到你想听的故事，换一个试试吧"));
        };

        self.catalog.increment_play_count(content.id).await?;

        Ok(HandlerResponse {
            text: format!("好的，给你讲{}", content.title),
            play_url: content.play_url,
            ..Default::default()
        })
    }
}
