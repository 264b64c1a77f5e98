use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ServiceError;
use crate::services::TtsService;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsApiConfig {
    pub address: Url,
    #[serde(default)]
    pub api_key: String,
    /// Voice used for Chinese output.
    pub voice_zh: String,
    /// Voice used for English output.
    pub voice_en: String,
    pub speaking_rate: f32,
    pub timeout: Duration,
}

impl Default for TtsApiConfig {
    fn default() -> Self {
        Self {
            address: Url::parse("http://localhost:8000/").unwrap(),
            api_key: String::new(),
            voice_zh: "cmn-CN-Wavenet-C".to_string(),
            voice_en: "en-US-Wavenet-C".to_string(),
            speaking_rate: 0.9,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Synthesis over the remote TTS API. The service deduplicates by input, so
/// repeated prompts come back as the same cached URL.
#[derive(Debug, Clone)]
pub struct HttpTts {
    config: TtsApiConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    language: &'a str,
    voice: &'a str,
    speaking_rate: f32,
}

#[derive(Debug, Deserialize)]
struct SynthesizeBody {
    url: String,
}

impl HttpTts {
    pub fn new(config: TtsApiConfig) -> eyre::Result<Self> {
        let client = reqwest::ClientBuilder::default()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, client })
    }

    async fn attempt(&self, url: Url, body: &SynthesizeRequest<'_>) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(url)
            .header("X-API-Key", &self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::from_status(status.as_u16()));
        }

        let body: SynthesizeBody = response.json().await?;
        Ok(body.url)
    }
}

#[async_trait]
impl TtsService for HttpTts {
    #[tracing::instrument(skip(self, text))]
    async fn synthesize_to_url(&self, text: &str, language: Option<&str>) -> eyre::Result<String> {
        let language = language.unwrap_or("zh");
        let voice = if language.starts_with("en") {
            &self.config.voice_en
        } else {
            &self.config.voice_zh
        };
        let body = SynthesizeRequest {
            text,
            language,
            voice: voice.as_str(),
            speaking_rate: self.config.speaking_rate,
        };
        let url = self.config.address.join("/api/v1/tts/synthesize")?;

        let mut last_error = None;
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                tracing::info!(attempt, "retrying synthesis");
            }

            match self.attempt(url.clone(), &body).await {
                Ok(audio_url) => return Ok(audio_url),
                Err(error) => {
                    let retryable = error.is_retryable();
                    tracing::warn!(%error, retryable, "synthesis attempt failed");
                    last_error = Some(error);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(eyre::eyre!(last_error.expect("at least one attempt ran")))
    }
}
