use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::data::{ChatMessage, ChatRole};
use crate::services::LlmService;

/// System prompt shaping the assistant for a young audience.
const CHILD_SYSTEM_PROMPT: &str = "你是小芽，一个专为儿童设计的智能语音助手。\n\
请遵循以下规则：\n\
1. 使用简单、易懂的语言，适合 3-10 岁儿童\n\
2. 回答要简短，适合语音播放（不超过 100 字）\n\
3. 保持友好、温暖的语气，像一个有耐心的大姐姐\n\
4. 不讨论任何不适合儿童的话题\n\
5. 对于不确定的问题，诚实说“我不太确定，我们可以一起查一查”\n\
6. 鼓励好奇心和学习，多用“你真棒”、“好问题”等鼓励语";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmApiConfig {
    pub address: Url,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmApiConfig {
    fn default() -> Self {
        Self {
            address: Url::parse("http://localhost:8000/").unwrap(),
            api_key: String::new(),
            model: "gemini-2.0-flash".to_string(),
            max_tokens: 300,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Chat completion over the remote model gateway.
#[derive(Debug, Clone)]
pub struct HttpLlm {
    config: LlmApiConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    response: String,
}

impl HttpLlm {
    pub fn new(config: LlmApiConfig) -> eyre::Result<Self> {
        let client = reqwest::ClientBuilder::default()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, client })
    }

    async fn request(
        &self,
        system: &str,
        history: &[ChatMessage],
        message: &str,
        temperature: f32,
    ) -> eyre::Result<String> {
        let mut messages: Vec<WireMessage> = history
            .iter()
            .map(|turn| WireMessage {
                role: match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: &turn.content,
            })
            .collect();
        messages.push(WireMessage {
            role: "user",
            content: message,
        });

        let body = ChatRequest {
            model: &self.config.model,
            system,
            messages,
            max_tokens: self.config.max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(self.config.address.join("/api/v1/llm/chat")?)
            .header("X-API-Key", &self.config.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let body: ChatBody = response.json().await?;
        Ok(body.response)
    }
}

#[async_trait]
impl LlmService for HttpLlm {
    #[tracing::instrument(skip_all)]
    async fn chat(&self, message: &str, history: &[ChatMessage]) -> eyre::Result<String> {
        self.request(CHILD_SYSTEM_PROMPT, history, message, self.config.temperature)
            .await
    }

    #[tracing::instrument(skip_all)]
    async fn complete(&self, message: &str, system: &str) -> eyre::Result<String> {
        // Classification-style calls want determinism, not creativity.
        self.request(system, &[], message, 0.1).await
    }
}
