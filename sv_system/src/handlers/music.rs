use std::sync::Arc;

use async_trait::async_trait;

use crate::data::{ContentItem, ContentKind, HandlerResponse, QueueDirective};
use crate::handlers::{Handler, HandlerContext};
use crate::nlu::{Intent, NluResult};
use crate::services::{ContentCatalog, PlayQueueStore};

pub struct MusicHandler {
    catalog: Arc<dyn ContentCatalog>,
    queue: Arc<dyn PlayQueueStore>,
}

impl MusicHandler {
    pub fn new(catalog: Arc<dyn ContentCatalog>, queue: Arc<dyn PlayQueueStore>) -> Self {
        Self { catalog, queue }
    }

    /// Keep the playable results, queue them, and return the first track and
    /// how many were queued.
    async fn setup_queue(
        &self,
        results: Vec<ContentItem>,
        device_id: &str,
    ) -> (Option<ContentItem>, usize) {
        let playable: Vec<ContentItem> =
            results.into_iter().filter(|c| c.play_url.is_some()).collect();
        let Some(first) = playable.first().cloned() else {
            return (None, 0);
        };

        let mut queued = 0;
        if playable.len() > 1 {
            let ids = playable.iter().map(|c| c.id).collect();
            self.queue.set_queue(device_id, ids, 0).await;
            queued = playable.len();
        }
        (Some(first), queued)
    }
}

#[async_trait]
impl Handler for MusicHandler {
    async fn handle(
        &self,
        nlu: &NluResult,
        device_id: &str,
        _context: &HandlerContext,
    ) -> eyre::Result<HandlerResponse> {
        let mut content = None;
        let mut queued = 0;
        let mut category_label = String::new();

        match nlu.intent {
            Intent::PlayMusic => {
                let results = self
                    .catalog
                    .content_list(ContentKind::Music, None, 30, true)
                    .await?;
                (content, queued) = self.setup_queue(results, device_id).await;
            }
            Intent::PlayMusicCategory => {
                let Some(category) = nlu.slot("category") else {
                    return Ok(HandlerResponse::say("请告诉我你想听什么类型的音乐"));
                };
                category_label = category.to_string();
                let results = self
                    .catalog
                    .content_list(ContentKind::Music, Some(category), 30, true)
                    .await?;
                (content, queued) = self.setup_queue(results, device_id).await;
            }
            Intent::PlayMusicByArtist => {
                if let Some(artist) = nlu.slot("artist_name") {
                    let results = self
                        .catalog
                        .search_by_artist(artist, ContentKind::Music, 20)
                        .await?;
                    (content, queued) = self.setup_queue(results, device_id).await;
                }
            }
            Intent::PlayMusicByName => {
                let title = nlu.slot("music_name");
                let artist = nlu.slot("artist_name");
                content = match (artist, title) {
                    (Some(artist), Some(title)) => {
                        self.catalog.search_by_artist_and_title(artist, title).await?
                    }
                    (None, Some(title)) => {
                        self.catalog.content_by_name(ContentKind::Music, title).await?
                    }
                    _ => None,
                };
            }
            _ => {}
        }

        let content = match content {
            Some(content) if content.play_url.is_none() => {
                tracing::warn!(id = content.id, title = %content.title, "content has no audio, skipping");
                None
            }
            other => other,
        };

        let Some(content) = content else {
            let text = if matches!(nlu.intent, Intent::PlayMusic | Intent::PlayMusicCategory) {
                let hint = if category_label.is_empty() {
                    "音乐".to_string()
                } else {
                    format!("{category_label}分类")
                };
                format!("抱歉，{hint}暂时没有内容，你可以在管理后台添加")
            } else {
                let artist = nlu.slot("artist_name").unwrap_or_default();
                let title = nlu.slot("music_name").unwrap_or_default();
                let hint = if !artist.is_empty() && !title.is_empty() {
                    format!("{artist}的{title}")
                } else if !artist.is_empty() {
                    artist.to_string()
                } else if !title.is_empty() {
                    title.to_string()
                } else {
                    "这首歌".to_string()
                };
                format!("抱歉，没有找到{hint}，换一首试试吧")
            };
            return Ok(HandlerResponse::say(text));
        };

        self.catalog.increment_play_count(content.id).await?;

        // Single-track playback drops any stale queue, so "next" never jumps
        // into an old playlist.
        if queued == 0 {
            self.queue.clear(device_id).await;
        }

        let text = if queued > 1 {
            match nlu.intent {
                Intent::PlayMusicByArtist => {
                    let artist = nlu.slot("artist_name").unwrap_or_default();
                    format!("找到{artist}的{queued}首歌，先为你播放{}", content.title)
                }
                Intent::PlayMusicCategory => {
                    format!("为你播放{category_label}，共{queued}首，先来一首{}", content.title)
                }
                _ => format!("为你随机播放音乐，共{queued}首，先来一首{}", content.title),
            }
        } else {
            format!("为你播放{}", content.title)
        };

        Ok(HandlerResponse {
            text,
            play_url: content.play_url,
            queue: if queued > 1 {
                QueueDirective::Enable
            } else {
                QueueDirective::Disable
            },
            ..Default::default()
        })
    }
}
