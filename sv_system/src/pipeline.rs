//! Thin orchestration from recognized speech to emitted response:
//! ASR → NLU → handler → response protocol (TTS prompt, play-url, extra
//! commands). Nothing here raises to the caller; every failure collapses to
//! an apology so the inbound loop stays healthy.

use std::sync::Arc;

use crate::config::CoreConfig;
use crate::data::{DeviceCommand, HandlerResponse, QueueDirective};
use crate::handlers::{HandlerContext, HandlerRouter, SERVICE_APOLOGY};
use crate::nlu::{NluResult, NluService};
use crate::protocol::Request;
use crate::services::{AsrService, ContentCatalog, PlayQueueStore, TtsService};
use crate::session::DeviceSession;

/// Spoken when a recording produced no recognizable speech.
const NOT_CAUGHT: &str = "抱歉，我没有听清楚，请再说一遍";
/// Spoken when something downstream broke.
const GENERIC_APOLOGY: &str = "抱歉，出了点问题，请稍后再试";

pub struct VoicePipeline {
    asr: Arc<dyn AsrService>,
    nlu: Arc<dyn NluService>,
    tts: Arc<dyn TtsService>,
    router: HandlerRouter,
    queue: Arc<dyn PlayQueueStore>,
    catalog: Arc<dyn ContentCatalog>,
    config: Arc<CoreConfig>,
}

impl VoicePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        asr: Arc<dyn AsrService>,
        nlu: Arc<dyn NluService>,
        tts: Arc<dyn TtsService>,
        router: HandlerRouter,
        queue: Arc<dyn PlayQueueStore>,
        catalog: Arc<dyn ContentCatalog>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            asr,
            nlu,
            tts,
            router,
            queue,
            catalog,
            config,
        }
    }

    pub(crate) fn queue_store(&self) -> &Arc<dyn PlayQueueStore> {
        &self.queue
    }

    pub(crate) fn catalog(&self) -> &Arc<dyn ContentCatalog> {
        &self.catalog
    }

    /// Serve an utterance that arrived as text (device-side ASR already ran).
    ///
    /// A fresh, unexpired pending action bypasses NLU entirely: the text is
    /// the answer to the question the previous turn asked.
    #[tracing::instrument(skip(self, session), fields(device_id = %session.device_id))]
    pub async fn process_text(&self, text: &str, session: &Arc<DeviceSession>) {
        if let Some(pending) = session.take_valid_pending_action() {
            tracing::info!(action = %pending.action_type, "routing follow-up to confirmation");
            let response = match self.router.by_name(&pending.handler_name) {
                Some(handler) => handler
                    .handle_confirmation(text, &pending.data, &session.device_id)
                    .await
                    .unwrap_or_else(|error| {
                        tracing::error!(%error, "confirmation handler failed");
                        HandlerResponse::say(SERVICE_APOLOGY)
                    }),
                None => {
                    tracing::error!(
                        handler = %pending.handler_name,
                        "pending action references an unknown handler"
                    );
                    HandlerResponse::say(SERVICE_APOLOGY)
                }
            };
            self.respond(session, &response).await;
            return;
        }

        let nlu = self.nlu.recognize(text).await;
        tracing::info!(intent = ?nlu.intent, confidence = nlu.confidence, "intent recognized");

        let response = self.route(&nlu, session).await;
        self.respond(session, &response).await;
    }

    /// Serve a locally captured recording: transcribe, then continue like
    /// text. Returns the response for the caller to emit, so the listening
    /// state can move to Responding around the emission.
    #[tracing::instrument(skip_all, fields(device_id = %session.device_id, bytes = audio.len()))]
    pub async fn process_audio(
        &self,
        audio: &[u8],
        session: &Arc<DeviceSession>,
    ) -> HandlerResponse {
        let text = match self
            .asr
            .transcribe(audio, self.config.audio.sample_rate)
            .await
        {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(%error, "transcription failed");
                return HandlerResponse::say(GENERIC_APOLOGY);
            }
        };

        if text.trim().is_empty() {
            tracing::warn!("empty transcription");
            return HandlerResponse::say(NOT_CAUGHT);
        }

        let nlu = self.nlu.recognize(&text).await;
        tracing::info!(intent = ?nlu.intent, "intent recognized");
        self.route(&nlu, session).await
    }

    /// Route through the handler registry and install any pending action the
    /// handler left behind, stamped with the configured timeout.
    async fn route(&self, nlu: &NluResult, session: &Arc<DeviceSession>) -> HandlerResponse {
        let context = HandlerContext::new();
        let response = self.router.route(nlu, &session.device_id, &context).await;

        if let Some(mut pending) = context.take_pending_action() {
            pending.timeout = self.config.pending_action_timeout();
            tracing::info!(
                action = %pending.action_type,
                handler = %pending.handler_name,
                "pending action installed"
            );
            session.state().pending_action = Some(pending);
        }

        response
    }

    /// Emit a handler response to the device.
    #[tracing::instrument(skip_all, fields(device_id = %session.device_id))]
    pub async fn respond(&self, session: &Arc<DeviceSession>, response: &HandlerResponse) {
        // Cut off whatever the cloud assistant is doing, except for the
        // responses that must preserve the current media state.
        if !response.skip_interrupt {
            session.send(&Request::abort_xiaoai()).await;
            session.send(&Request::pause()).await;
        }

        if let Some(play_url) = &response.play_url {
            // Spoken prompt first, then the content itself.
            if !response.text.is_empty() {
                if let Some(tts_url) = self.synthesize(&response.text).await {
                    session.send(&Request::play_url(&tts_url)).await;
                }
            }
            session.send(&Request::play_url(play_url)).await;
        } else if !response.text.is_empty() {
            if let Some(tts_url) = self.synthesize(&response.text).await {
                session.send(&Request::play_url(&tts_url)).await;
            }
        }

        for command in &response.commands {
            match command {
                DeviceCommand::Pause => session.send(&Request::pause()).await,
                DeviceCommand::Play => session.send(&Request::play()).await,
                DeviceCommand::VolumeUp => session.send(&Request::volume_up()).await,
                DeviceCommand::VolumeDown => session.send(&Request::volume_down()).await,
                DeviceCommand::Next | DeviceCommand::Previous => {
                    self.play_queue_track(session, *command).await;
                }
            }
        }

        match response.queue {
            QueueDirective::Enable => session.set_queue_active(true),
            QueueDirective::Disable => session.set_queue_active(false),
            QueueDirective::Unchanged => {}
        }

        if response.continue_listening {
            session.send(&Request::wake_up(true)).await;
        }
    }

    async fn synthesize(&self, text: &str) -> Option<String> {
        match self.tts.synthesize_to_url(text, None).await {
            Ok(url) => Some(url),
            Err(error) => {
                tracing::error!(%error, "synthesis failed, skipping spoken reply");
                None
            }
        }
    }

    /// The `next`/`previous` command path: advance the queue respecting the
    /// play mode and play the result, or say the queue is done. Also entered
    /// from the admin surface via [`crate::VoiceSystem::skip_track`].
    pub(crate) async fn play_queue_track(
        &self,
        session: &Arc<DeviceSession>,
        command: DeviceCommand,
    ) {
        let content_id = match command {
            DeviceCommand::Next => self.queue.next(&session.device_id, false).await,
            DeviceCommand::Previous => self.queue.previous(&session.device_id, false).await,
            _ => return,
        };

        let Some(content_id) = content_id else {
            tracing::info!(device_id = %session.device_id, "no more queue content");
            if let Some(tts_url) = self.synthesize("没有更多内容了").await {
                session.send(&Request::play_url(&tts_url)).await;
            }
            return;
        };

        match self.catalog.content_by_id(content_id).await {
            Ok(Some(content)) if content.play_url.is_some() => {
                let play_url = content.play_url.as_deref().unwrap_or_default();
                session.state().current_content_id = Some(content_id);
                session.send(&Request::play_url(play_url)).await;
            }
            Ok(_) => {
                tracing::warn!(content_id, "queued content missing or not playable");
            }
            Err(error) => {
                tracing::error!(content_id, %error, "catalog lookup failed");
            }
        }
    }
}
