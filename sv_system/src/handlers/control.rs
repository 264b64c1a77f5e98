use std::sync::Arc;

use async_trait::async_trait;

use crate::data::{DeviceCommand, HandlerResponse, PlayMode, QueueDirective};
use crate::handlers::{Handler, HandlerContext};
use crate::nlu::{Intent, NluResult};
use crate::services::{ContentCatalog, PlayQueueStore};

pub struct ControlHandler {
    catalog: Arc<dyn ContentCatalog>,
    queue: Arc<dyn PlayQueueStore>,
}

impl ControlHandler {
    pub fn new(catalog: Arc<dyn ContentCatalog>, queue: Arc<dyn PlayQueueStore>) -> Self {
        Self { catalog, queue }
    }

    /// Next/previous with wrap-around, skipping entries without audio. Caps
    /// the skip walk at the queue length.
    async fn navigate(&self, intent: Intent, device_id: &str) -> eyre::Result<HandlerResponse> {
        let queue = self.queue.queue(device_id).await;
        if queue.is_empty() {
            return Ok(HandlerResponse::say("没有播放队列"));
        }

        for _ in 0..queue.len() {
            let content_id = match intent {
                Intent::ControlNext => self.queue.next(device_id, true).await,
                _ => self.queue.previous(device_id, true).await,
            };
            let Some(content_id) = content_id else {
                break;
            };

            if let Some(content) = self.catalog.content_by_id(content_id).await? {
                if let Some(play_url) = content.play_url.clone() {
                    self.catalog.increment_play_count(content_id).await?;
                    let direction = if intent == Intent::ControlNext {
                        "下一个"
                    } else {
                        "上一个"
                    };
                    return Ok(HandlerResponse {
                        text: format!("好的，{direction}，{}", content.title),
                        play_url: Some(play_url),
                        queue: QueueDirective::Enable,
                        ..Default::default()
                    });
                }
            }
            tracing::warn!(content_id, "queued content not playable, skipping");
        }

        Ok(HandlerResponse::say("队列中没有可播放的内容"))
    }

    /// Resume keeps the paused media state intact: no interrupt, no TTS
    /// (playing one would replace the paused track), just a `play`.
    async fn resume(&self, device_id: &str) -> HandlerResponse {
        let has_queue = !self.queue.queue(device_id).await.is_empty();
        HandlerResponse {
            skip_interrupt: true,
            commands: vec![DeviceCommand::Play],
            queue: if has_queue {
                QueueDirective::Enable
            } else {
                QueueDirective::Unchanged
            },
            ..Default::default()
        }
    }

    async fn stop(&self, device_id: &str) -> HandlerResponse {
        self.queue.clear(device_id).await;
        HandlerResponse::say("已停止")
    }

    async fn play_mode(&self, nlu: &NluResult, device_id: &str) -> HandlerResponse {
        let mode = match nlu.slot("play_mode") {
            Some("单曲循环") => PlayMode::SingleLoop,
            Some("列表循环") => PlayMode::PlaylistLoop,
            Some("随机播放") => PlayMode::Shuffle,
            Some("顺序播放") => PlayMode::Sequential,
            _ => return HandlerResponse::say("不支持的播放模式"),
        };

        self.queue.set_mode(device_id, mode).await;

        let label = match mode {
            PlayMode::Sequential => "顺序播放",
            PlayMode::SingleLoop => "单曲循环",
            PlayMode::PlaylistLoop => "列表循环",
            PlayMode::Shuffle => "随机播放",
        };

        // Re-arm auto-advance if there is a queue to continue with: the
        // interrupt preceding the TTS cleared it.
        let has_queue = !self.queue.queue(device_id).await.is_empty();
        HandlerResponse {
            text: format!("已切换到{label}模式"),
            queue: if has_queue {
                QueueDirective::Enable
            } else {
                QueueDirective::Unchanged
            },
            ..Default::default()
        }
    }
}

#[async_trait]
impl Handler for ControlHandler {
    async fn handle(
        &self,
        nlu: &NluResult,
        device_id: &str,
        _context: &HandlerContext,
    ) -> eyre::Result<HandlerResponse> {
        match nlu.intent {
            Intent::ControlPlayMode => Ok(self.play_mode(nlu, device_id).await),
            Intent::ControlNext | Intent::ControlPrevious => {
                self.navigate(nlu.intent, device_id).await
            }
            // The interrupt preamble already stops playback; the text is all
            // that is left to do.
            Intent::ControlPause => Ok(HandlerResponse::say("已暂停")),
            Intent::ControlStop => Ok(self.stop(device_id).await),
            Intent::ControlResume => Ok(self.resume(device_id).await),
            // Volume changes must not interrupt the music. The trailing
            // `play` is a no-op while playing and recovers the track when
            // the instruction path pre-paused it.
            Intent::ControlVolumeUp | Intent::ControlVolumeDown => {
                let command = if nlu.intent == Intent::ControlVolumeUp {
                    DeviceCommand::VolumeUp
                } else {
                    DeviceCommand::VolumeDown
                };
                Ok(HandlerResponse {
                    skip_interrupt: true,
                    commands: vec![command, DeviceCommand::Play],
                    ..Default::default()
                })
            }
            _ => Ok(HandlerResponse::say("好的")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ContentItem, ContentKind};
    use crate::services::{MemoryCatalog, MemoryQueueStore};
    use std::collections::HashMap;

    fn nlu(intent: Intent) -> NluResult {
        NluResult {
            intent,
            slots: HashMap::new(),
            confidence: 0.9,
            raw_text: String::new(),
        }
    }

    async fn handler_with_queue(ids: &[(i64, Option<&str>)], index: usize) -> ControlHandler {
        let catalog = Arc::new(MemoryCatalog::new());
        for (id, url) in ids {
            catalog.insert_content(ContentItem {
                id: *id,
                title: format!("track-{id}"),
                kind: ContentKind::Music,
                category: None,
                artist: None,
                play_url: url.map(str::to_string),
                play_count: 0,
            });
        }
        let queue = Arc::new(MemoryQueueStore::new());
        let ids: Vec<i64> = ids.iter().map(|(id, _)| *id).collect();
        queue.set_queue("dev", ids, index).await;
        ControlHandler::new(catalog, queue)
    }

    #[tokio::test]
    async fn volume_up_skips_interrupt_and_recovers_playback() {
        let handler = handler_with_queue(&[], 0).await;
        let response = handler
            .handle(&nlu(Intent::ControlVolumeUp), "dev", &HandlerContext::new())
            .await
            .unwrap();

        assert_eq!(response.text, "");
        assert!(response.skip_interrupt);
        assert_eq!(
            response.commands,
            vec![DeviceCommand::VolumeUp, DeviceCommand::Play]
        );
        assert_eq!(response.queue, QueueDirective::Unchanged);
    }

    #[tokio::test]
    async fn resume_keeps_paused_media_and_restores_queue() {
        let handler = handler_with_queue(&[(1, Some("http://h/1.mp3"))], 0).await;
        let response = handler
            .handle(&nlu(Intent::ControlResume), "dev", &HandlerContext::new())
            .await
            .unwrap();

        assert!(response.skip_interrupt);
        assert_eq!(response.text, "");
        assert_eq!(response.commands, vec![DeviceCommand::Play]);
        assert_eq!(response.queue, QueueDirective::Enable);
    }

    #[tokio::test]
    async fn previous_wraps_and_skips_unplayable_entries() {
        // Index at 1; previous lands on 0 which is unplayable, so the walk
        // wraps on to the tail.
        let handler = handler_with_queue(
            &[(1, None), (2, Some("http://h/2.mp3")), (3, Some("http://h/3.mp3"))],
            1,
        )
        .await;
        let response = handler
            .handle(&nlu(Intent::ControlPrevious), "dev", &HandlerContext::new())
            .await
            .unwrap();

        assert_eq!(response.play_url.as_deref(), Some("http://h/3.mp3"));
        assert_eq!(response.queue, QueueDirective::Enable);
        assert!(response.text.contains("上一个"));
    }

    #[tokio::test]
    async fn navigation_without_a_queue_says_so() {
        let handler = handler_with_queue(&[], 0).await;
        let response = handler
            .handle(&nlu(Intent::ControlNext), "dev", &HandlerContext::new())
            .await
            .unwrap();
        assert_eq!(response.text, "没有播放队列");
    }

    #[tokio::test]
    async fn all_unplayable_gives_up_after_a_full_lap() {
        let handler = handler_with_queue(&[(1, None), (2, None)], 0).await;
        let response = handler
            .handle(&nlu(Intent::ControlNext), "dev", &HandlerContext::new())
            .await
            .unwrap();
        assert_eq!(response.text, "队列中没有可播放的内容");
    }

    #[tokio::test]
    async fn stop_clears_the_queue() {
        let handler = handler_with_queue(&[(1, Some("http://h/1.mp3"))], 0).await;
        let response = handler
            .handle(&nlu(Intent::ControlStop), "dev", &HandlerContext::new())
            .await
            .unwrap();
        assert_eq!(response.text, "已停止");
        assert!(handler.queue.queue("dev").await.is_empty());
    }
}
