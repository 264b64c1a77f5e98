//! Voice-driven content deletion with a confirmation turn.
//!
//! Turn one searches and installs a pending action; turn two interprets the
//! reply. Cancellation wins over confirmation on ambiguous replies.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::data::{HandlerResponse, PendingAction};
use crate::handlers::{Handler, HandlerContext};
use crate::nlu::NluResult;
use crate::services::ContentCatalog;

/// Multi-character phrases match as substrings; single characters only match
/// exactly, so "不是" can never read as "是".
const CONFIRM_PHRASES: &[&str] = &["是的", "确认", "好的", "可以", "没问题", "删除", "删吧", "嗯嗯"];
const CONFIRM_EXACT: &[&str] = &["是", "对", "好", "嗯", "行"];
const CANCEL_PHRASES: &[&str] = &["取消", "不要", "不用", "算了", "不删", "别删", "不是", "不好", "不对"];
const CANCEL_EXACT: &[&str] = &["不", "否"];

/// Voice deletion refuses to touch more entries than this.
const MAX_VOICE_DELETE: usize = 10;

pub struct DeleteHandler {
    catalog: Arc<dyn ContentCatalog>,
}

#[derive(Debug, Deserialize)]
struct DeletePayload {
    #[serde(default)]
    content_name: String,
    #[serde(default)]
    content_ids: Vec<i64>,
}

impl DeleteHandler {
    pub fn new(catalog: Arc<dyn ContentCatalog>) -> Self {
        Self { catalog }
    }

    fn is_confirm(text: &str) -> bool {
        CONFIRM_PHRASES.iter().any(|phrase| text.contains(phrase))
            || CONFIRM_EXACT.contains(&text)
    }

    fn is_cancel(text: &str) -> bool {
        CANCEL_PHRASES.iter().any(|phrase| text.contains(phrase)) || CANCEL_EXACT.contains(&text)
    }

    async fn execute_delete(&self, content_ids: &[i64]) -> HandlerResponse {
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for &id in content_ids {
            match self.catalog.delete_content(id, false).await {
                Ok(true) => succeeded += 1,
                Ok(false) => failed += 1,
                Err(error) => {
                    tracing::error!(id, %error, "content deletion failed");
                    failed += 1;
                }
            }
        }

        if failed == 0 {
            HandlerResponse::say(format!("已成功删除{succeeded}条内容"))
        } else if succeeded == 0 {
            HandlerResponse::say("删除失败，请稍后再试")
        } else {
            HandlerResponse::say(format!("已删除{succeeded}条内容，{failed}条删除失败"))
        }
    }
}

#[async_trait]
impl Handler for DeleteHandler {
    async fn handle(
        &self,
        nlu: &NluResult,
        _device_id: &str,
        context: &HandlerContext,
    ) -> eyre::Result<HandlerResponse> {
        let content_name = nlu.slot("content_name").unwrap_or_default().trim();
        if content_name.is_empty() {
            return Ok(HandlerResponse::say("请告诉我要删除什么内容"));
        }

        let results = self
            .catalog
            .smart_search(content_name, MAX_VOICE_DELETE + 1)
            .await?;
        if results.is_empty() {
            return Ok(HandlerResponse::say(format!(
                "没有找到关于{content_name}的内容"
            )));
        }
        if results.len() > MAX_VOICE_DELETE {
            return Ok(HandlerResponse::say(format!(
                "找到了超过{MAX_VOICE_DELETE}条关于{content_name}的内容，数量太多，请在管理后台操作"
            )));
        }

        let content_ids: Vec<i64> = results.iter().map(|item| item.id).collect();
        let count = content_ids.len();
        context.set_pending_action(PendingAction::new(
            "delete_content",
            serde_json::json!({
                "content_name": content_name,
                "content_ids": content_ids,
                "count": count,
            }),
            "delete",
        ));

        Ok(HandlerResponse {
            text: format!("找到了{count}条关于{content_name}的内容，是否要删除？"),
            continue_listening: true,
            ..Default::default()
        })
    }

    async fn handle_confirmation(
        &self,
        text: &str,
        data: &serde_json::Value,
        _device_id: &str,
    ) -> eyre::Result<HandlerResponse> {
        let text = text.trim();
        let payload: DeletePayload = serde_json::from_value(data.clone())?;

        // Cancellation is checked first: for deletion, missing one is far
        // cheaper than a false positive.
        if Self::is_cancel(text) {
            Ok(HandlerResponse::say("好的，已取消删除"))
        } else if Self::is_confirm(text) {
            tracing::info!(
                name = %payload.content_name,
                count = payload.content_ids.len(),
                "voice deletion confirmed"
            );
            Ok(self.execute_delete(&payload.content_ids).await)
        } else {
            Ok(HandlerResponse::say("没有听懂，已取消删除操作"))
        }
    }
}
