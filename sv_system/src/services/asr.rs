use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::audio::pcm_to_wav;
use crate::error::ServiceError;
use crate::services::AsrService;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrApiConfig {
    pub address: Url,
    #[serde(default)]
    pub api_key: String,
    /// Target language hint passed to the recognizer.
    pub language: String,
    pub timeout: Duration,
}

impl Default for AsrApiConfig {
    fn default() -> Self {
        Self {
            address: Url::parse("http://localhost:10000/").unwrap(),
            api_key: String::new(),
            language: "zh".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Speech-to-text over the remote recognizer API.
///
/// Two attempts with a fixed 1 s backoff on retryable statuses and network
/// errors; a 429 means quota and is never retried.
#[derive(Debug, Clone)]
pub struct HttpAsr {
    config: AsrApiConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TranscribeBody {
    #[serde(default)]
    text: String,
}

impl HttpAsr {
    pub fn new(config: AsrApiConfig) -> eyre::Result<Self> {
        let client = reqwest::ClientBuilder::default()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, client })
    }

    async fn attempt(&self, url: Url, wav: Vec<u8>) -> Result<String, ServiceError> {
        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(wav)
                .file_name("audio.wav")
                .mime_str("audio/wav")?,
        );

        let response = self
            .client
            .post(url)
            .header("X-API-Key", &self.config.api_key)
            .query(&[("language", self.config.language.as_str())])
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::from_status(status.as_u16()));
        }

        let body: TranscribeBody = response.json().await?;
        Ok(body.text.trim().to_string())
    }
}

#[async_trait]
impl AsrService for HttpAsr {
    #[tracing::instrument(skip(self, pcm), fields(bytes = pcm.len()))]
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> eyre::Result<String> {
        let wav = pcm_to_wav(pcm, sample_rate, 1)?;
        let url = self.config.address.join("/api/v1/stt/transcribe")?;

        let mut last_error = None;
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                tracing::info!(attempt, "retrying transcription");
            }

            match self.attempt(url.clone(), wav.clone()).await {
                Ok(text) => {
                    tracing::info!(text = %text, "transcription complete");
                    return Ok(text);
                }
                Err(error) => {
                    let retryable = error.is_retryable();
                    tracing::warn!(%error, retryable, "transcription attempt failed");
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
