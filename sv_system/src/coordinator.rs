//! The per-device event handlers: wake word, playing state, streaming
//! instruction partials, audio endpointing, and the auto-play scheduler.
//!
//! Ordering discipline: every state write that closes a race window (the
//! Processing transition, `instruction_dispatched`, `pipeline_active`,
//! cancelling the auto-play task) happens on the caller's stack before the
//! first await of the handler that performs it. Long-running pipeline work
//! always runs in a detached task so the inbound frame loop keeps parsing
//! (and intercepting) while a command is being served.

use std::sync::Arc;

use crate::audio::AudioBuffer;
use crate::config::CoreConfig;
use crate::manager::ConnectionManager;
use crate::pipeline::VoicePipeline;
use crate::protocol::{Event, InboundFrame, PlayingState, Request, Response, parse_binary_frame,
                      parse_text_frame};
use crate::session::{DeviceSession, ListenState, cancel_task};

/// Unplayable queue entries skipped before auto-advance gives up.
const AUTO_PLAY_MAX_SKIP: usize = 5;

#[derive(Clone)]
pub struct Coordinator {
    manager: Arc<ConnectionManager>,
    pipeline: Arc<VoicePipeline>,
    config: Arc<CoreConfig>,
}

impl Coordinator {
    pub fn new(
        manager: Arc<ConnectionManager>,
        pipeline: Arc<VoicePipeline>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            manager,
            pipeline,
            config,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Entry point for an inbound text frame.
    pub async fn handle_text(&self, session: &Arc<DeviceSession>, text: &str) {
        match parse_text_frame(text) {
            Some(InboundFrame::Event(event)) => self.on_event(session, &event).await,
            Some(InboundFrame::Response(response)) => self.on_response(session, response).await,
            None => {
                let preview: String = text.chars().take(100).collect();
                tracing::warn!(frame = %preview, "dropping unparseable frame");
            }
        }
    }

    /// Entry point for an inbound binary frame (microphone audio).
    pub async fn handle_binary(&self, session: &Arc<DeviceSession>, data: &[u8]) {
        if !matches!(
            session.listen_state(),
            ListenState::Woken | ListenState::Listening
        ) {
            return;
        }

        // JSON stream record, or raw PCM from older firmware.
        let pcm = match parse_binary_frame(data) {
            Some(stream) if stream.is_audio() => stream.bytes,
            _ => data.to_vec(),
        };
        if pcm.is_empty() {
            return;
        }

        let endpoint_reached = {
            let mut state = session.state();
            if state.listen == ListenState::Woken {
                state.listen = ListenState::Listening;
                if let Some(buffer) = state.audio.as_mut() {
                    buffer.start();
                }
                cancel_task(&mut state.wake_timeout);
                tracing::info!(device_id = %session.device_id, "recording started");
            }

            match state.audio.as_mut() {
                Some(buffer) => {
                    buffer.append(&pcm);
                    buffer.should_stop()
                }
                None => false,
            }
        };

        if endpoint_reached {
            // Processing is entered synchronously so further frames cannot
            // re-trigger the dispatch while the detached task spins up.
            session.state().listen = ListenState::Processing;
            let this = self.clone();
            let sess = session.clone();
            let task = tokio::spawn(async move {
                this.on_audio_complete(sess).await;
            });
            session.state().pipeline_task = Some(task);
        }
    }

    async fn on_event(&self, session: &Arc<DeviceSession>, event: &Event) {
        tracing::debug!(device_id = %session.device_id, event = %event.event, "event received");

        if event.is_wake_word() {
            self.on_wake(session, event).await;
        } else if event.is_playing() {
            self.on_playing(session, event).await;
        } else if event.is_instruction() {
            self.on_instruction(session, event).await;
        } else {
            tracing::debug!(event = %event.event, "ignoring unrecognized event");
        }
    }

    /// Wake word: interrupt the cloud assistant, open the shared capture
    /// device, and optimistically enter `Woken`. The `start_recording`
    /// reply is observed asynchronously in [`Self::on_response`]; awaiting
    /// it here would deadlock the inbound loop that must deliver it.
    async fn on_wake(&self, session: &Arc<DeviceSession>, event: &Event) {
        tracing::info!(device_id = %session.device_id, wake_word = ?event.data, "wake word");

        // The user is addressing us: stop auto-advance before anything can
        // suspend.
        session.set_queue_active(false);
        cancel_task(&mut session.state().auto_play);

        session.send(&Request::abort_xiaoai()).await;

        let audio = &self.config.audio;
        let start = Request::start_recording(
            audio.sample_rate,
            audio.channels,
            audio.bits_per_sample(),
        );
        session.state().start_recording_id = Some(start.id.clone());
        session.send(&start).await;

        session.set_instruction_dispatched(false);
        {
            let mut state = session.state();
            state.listen = ListenState::Woken;
            cancel_task(&mut state.instruction_timer);
            state.instruction_text = None;
            state.audio = Some(AudioBuffer::new(audio.clone()));

            cancel_task(&mut state.wake_timeout);
            let wake_timeout = audio.wake_timeout_duration();
            let sess = session.clone();
            state.wake_timeout = Some(tokio::spawn(async move {
                tokio::time::sleep(wake_timeout).await;
                if sess.listen_state() == ListenState::Woken {
                    tracing::info!(device_id = %sess.device_id, "wake timed out without speech");
                    sess.send(&Request::stop_recording()).await;
                    sess.state().listen = ListenState::Idle;
                }
            }));
        }
    }

    async fn on_playing(&self, session: &Arc<DeviceSession>, event: &Event) {
        let Some(playing) = event.playing_state() else {
            return;
        };
        session.state().playing = playing;
        tracing::debug!(device_id = %session.device_id, ?playing, "playing state");

        // The cloud assistant grabbing the player mid-pipeline gets cut off.
        if playing == PlayingState::Playing && session.pipeline_active() {
            tracing::info!(device_id = %session.device_id, "intercepting cloud playback");
            session.send(&Request::abort_xiaoai()).await;
            session.send(&Request::pause()).await;
        }

        // Track finished with an active queue: schedule the next one.
        if playing == PlayingState::Idle && session.queue_active() && !session.pipeline_active() {
            let mut state = session.state();
            cancel_task(&mut state.auto_play);
            let this = self.clone();
            let sess = session.clone();
            state.auto_play = Some(tokio::spawn(async move {
                this.auto_play_next(sess).await;
            }));
        }
    }

    /// Streaming ASR partials from the device's own cloud recognizer.
    ///
    /// A round is a run of non-final partials closed by a final one; the
    /// debounce timer covers rounds whose final never arrives.
    /// `instruction_dispatched` stays set until the next round opens, which
    /// is what suppresses an `is_final` duplicated after an `is_stop`.
    async fn on_instruction(&self, session: &Arc<DeviceSession>, event: &Event) {
        if matches!(
            session.listen_state(),
            ListenState::Woken | ListenState::Listening | ListenState::Processing
        ) {
            tracing::debug!(
                device_id = %session.device_id,
                state = ?session.listen_state(),
                "local audio path owns this turn, instruction ignored"
            );
            return;
        }

        if session.pipeline_active() && event.is_cloud_playback() {
            tracing::info!(device_id = %session.device_id, "intercepting cloud playback command");
            session.send(&Request::abort_xiaoai()).await;
            session.send(&Request::pause()).await;
            return;
        }

        let Some((text, is_final)) = event.transcript() else {
            return;
        };
        tracing::info!(device_id = %session.device_id, text = %text, is_final, "instruction partial");
        session.state().instruction_text = Some(text);

        if is_final {
            if session.instruction_dispatched() {
                tracing::debug!(device_id = %session.device_id, "duplicate final suppressed");
                return;
            }
            // Gate writes before the first await: a playback-Idle event
            // arriving during the sends below must not be able to schedule
            // an auto-play under us.
            session.set_instruction_dispatched(true);
            {
                let mut state = session.state();
                cancel_task(&mut state.instruction_timer);
                cancel_task(&mut state.auto_play);
            }
            session.set_pipeline_active(true);

            session.send(&Request::abort_xiaoai()).await;

            let this = self.clone();
            let sess = session.clone();
            let task = tokio::spawn(async move {
                this.on_instruction_complete(&sess).await;
            });
            session.state().pipeline_task = Some(task);
        } else {
            // A fresh non-final partial opens a new round.
            session.set_instruction_dispatched(false);
            // The user has begun to speak; the queue pointer must not move
            // before their command is processed.
            cancel_task(&mut session.state().auto_play);
            self.reset_instruction_timer(session);
        }
    }

    fn reset_instruction_timer(&self, session: &Arc<DeviceSession>) {
        let debounce = self.config.instruction_debounce();
        let this = self.clone();
        let sess = session.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if sess.instruction_dispatched() {
                return;
            }
            sess.set_instruction_dispatched(true);
            this.on_instruction_complete(&sess).await;
        });

        let mut state = session.state();
        cancel_task(&mut state.instruction_timer);
        state.instruction_timer = Some(handle);
    }

    /// The debounced (or final-flagged) utterance is complete.
    ///
    /// `instruction_dispatched` is deliberately not reset here; only the
    /// next round's first non-final partial resets it.
    async fn on_instruction_complete(&self, session: &Arc<DeviceSession>) {
        let text = {
            let mut state = session.state();
            state.instruction_timer = None;
            state.instruction_text.take()
        };

        let text = text.map(|t| t.trim().to_string()).unwrap_or_default();
        if text.is_empty() {
            // The final path may have marked the pipeline active already.
            session.set_pipeline_active(false);
            return;
        }

        tracing::info!(device_id = %session.device_id, text = %text, "instruction complete");

        // Both entry paths converge here; assert the gates before awaiting.
        session.set_pipeline_active(true);
        cancel_task(&mut session.state().auto_play);

        session.send(&Request::abort_xiaoai()).await;
        session.send(&Request::pause()).await;

        self.pipeline.process_text(&text, session).await;
        session.set_pipeline_active(false);
    }

    /// Runs detached from the inbound loop so cloud events arriving during
    /// ASR/NLU can still be observed and intercepted.
    async fn on_audio_complete(&self, session: Arc<DeviceSession>) {
        tracing::info!(device_id = %session.device_id, "endpoint reached");

        session.send(&Request::stop_recording()).await;

        let audio = {
            let mut state = session.state();
            cancel_task(&mut state.auto_play);
            state.audio.as_mut().map(AudioBuffer::stop).unwrap_or_default()
        };

        session.set_pipeline_active(true);
        let response = self.pipeline.process_audio(&audio, &session).await;

        session.state().listen = ListenState::Responding;
        self.pipeline.respond(&session, &response).await;

        session.set_pipeline_active(false);
        session.state().listen = ListenState::Idle;
    }

    async fn on_response(&self, session: &Arc<DeviceSession>, response: Response) {
        tracing::debug!(
            device_id = %session.device_id,
            response_id = %response.id,
            code = ?response.code,
            "response received"
        );

        let matches_start_recording = {
            let mut state = session.state();
            if state.start_recording_id.as_deref() == Some(response.id.as_str()) {
                state.start_recording_id = None;
                true
            } else {
                false
            }
        };

        if matches_start_recording {
            if response.is_failure() {
                tracing::warn!(
                    device_id = %session.device_id,
                    msg = ?response.msg,
                    "start_recording failed, falling back to the instruction path"
                );
                // Roll back the optimistic wake if no audio arrived yet.
                let mut state = session.state();
                if state.listen == ListenState::Woken {
                    state.listen = ListenState::Idle;
                    cancel_task(&mut state.wake_timeout);
                }
            } else {
                tracing::info!(device_id = %session.device_id, "start_recording confirmed");
            }
            return;
        }

        session.complete_reply(response);
    }

    /// Deferred queue advancement after a track ends. Sleeps through the
    /// guard window, re-checks every gate, then walks the queue past
    /// unplayable entries. Cancellation at any await is the normal signal
    /// that the user intervened.
    async fn auto_play_next(&self, session: Arc<DeviceSession>) {
        tokio::time::sleep(self.config.auto_play_guard()).await;

        if session.playing_state() == PlayingState::Playing
            || !session.queue_active()
            || session.pipeline_active()
        {
            return;
        }

        let queue = self.pipeline.queue_store();
        let catalog = self.pipeline.catalog();

        for _ in 0..AUTO_PLAY_MAX_SKIP {
            let Some(content_id) = queue.next(&session.device_id, false).await else {
                tracing::info!(device_id = %session.device_id, "play queue exhausted");
                session.set_queue_active(false);
                return;
            };

            match catalog.content_by_id(content_id).await {
                Ok(Some(content)) => {
                    if let Some(play_url) = &content.play_url {
                        tracing::info!(
                            device_id = %session.device_id,
                            content_id,
                            title = %content.title,
                            "auto-playing next track"
                        );
                        if let Err(error) = catalog.increment_play_count(content_id).await {
                            tracing::error!(content_id, %error, "play count update failed");
                            session.set_queue_active(false);
                            return;
                        }
                        session.state().current_content_id = Some(content_id);
                        session.send(&Request::play_url(play_url)).await;
                        return;
                    }
                    tracing::warn!(content_id, "queued content not playable, skipping");
                }
                Ok(None) => {
                    tracing::warn!(content_id, "queued content missing, skipping");
                }
                Err(error) => {
                    tracing::error!(content_id, %error, "catalog lookup failed");
                    session.set_queue_active(false);
                    return;
                }
            }
        }

        tracing::warn!(
            device_id = %session.device_id,
            skipped = AUTO_PLAY_MAX_SKIP,
            "too many unplayable entries, stopping the queue"
        );
        session.set_queue_active(false);
    }
}
