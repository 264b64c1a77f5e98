//! End-to-end event-trace scenarios for a single device session: wake and
//! timeout, endpointing, the streaming-instruction debouncer, cloud
//! interception, auto-play cancellation, the skip-interrupt contract and the
//! delete confirmation flow.
//!
//! The device side is a channel standing in for the socket; downstream
//! services are in-process fakes; timers run on the paused tokio clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Semaphore, mpsc};

use sv_system::config::CoreConfig;
use sv_system::data::{ChatMessage, ContentItem, ContentKind, DeviceCommand};
use sv_system::nlu::{NluResult, NluService, RuleNlu};
use sv_system::protocol::{Envelope, PlayingState, Request};
use sv_system::services::{
    AsrService, ContentCatalog, LlmService, MemoryCatalog, MemoryConversationStore,
    MemoryQueueStore, PlayQueueStore, TtsService,
};
use sv_system::session::{DeviceSession, ListenState};
use sv_system::{Collaborators, VoiceSystem};

const ABORT_SHELL: &str = "/etc/init.d/mico_aivs_lab restart >/dev/null 2>&1";
const PAUSE_SHELL: &str = "mphelper pause";
const PLAY_SHELL: &str = "mphelper play";
const VOLUME_UP_SHELL: &str = r#"ubus call player_command volume_ctrl '{"action":"up","value":10}'"#;
const WAKE_SILENT_SHELL: &str = r#"ubus call pnshelper event_notify '{"src":1,"event":0}'"#;

struct FakeAsr {
    transcript: Mutex<String>,
    calls: Mutex<Vec<usize>>,
}

impl FakeAsr {
    fn new(transcript: &str) -> Self {
        Self {
            transcript: Mutex::new(transcript.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AsrService for FakeAsr {
    async fn transcribe(&self, pcm: &[u8], _sample_rate: u32) -> eyre::Result<String> {
        self.calls.lock().unwrap().push(pcm.len());
        Ok(self.transcript.lock().unwrap().clone())
    }
}

/// Deterministic synthesis: the "URL" embeds the prompt so assertions can
/// read what would have been spoken.
struct FakeTts;

#[async_trait]
impl TtsService for FakeTts {
    async fn synthesize_to_url(&self, text: &str, _language: Option<&str>) -> eyre::Result<String> {
        Ok(format!("tts://{text}"))
    }
}

/// LLM whose replies are held back until the test releases the gate, for
/// exercising interception while a pipeline is in flight.
struct GatedLlm {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl LlmService for GatedLlm {
    async fn chat(&self, _message: &str, _history: &[ChatMessage]) -> eyre::Result<String> {
        let permit = self.gate.acquire().await?;
        permit.forget();
        Ok("好呀好呀".to_string())
    }

    async fn complete(&self, _message: &str, _system: &str) -> eyre::Result<String> {
        Ok(String::new())
    }
}

/// Wraps the real rule NLU, recording every text that reaches it.
struct RecordingNlu {
    inner: RuleNlu,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NluService for RecordingNlu {
    async fn recognize(&self, text: &str) -> NluResult {
        self.calls.lock().unwrap().push(text.to_string());
        self.inner.recognize(text).await
    }
}

struct Harness {
    system: Arc<VoiceSystem>,
    session: Arc<DeviceSession>,
    outbound: mpsc::Receiver<String>,
    nlu_calls: Arc<Mutex<Vec<String>>>,
    asr: Arc<FakeAsr>,
    catalog: Arc<MemoryCatalog>,
    queue: Arc<MemoryQueueStore>,
    llm_gate: Arc<Semaphore>,
}

impl Harness {
    async fn new(transcript: &str) -> Self {
        let asr = Arc::new(FakeAsr::new(transcript));
        let catalog = Arc::new(MemoryCatalog::new());
        let queue = Arc::new(MemoryQueueStore::new());
        let conversation = Arc::new(MemoryConversationStore::new());
        let llm_gate = Arc::new(Semaphore::new(0));
        let nlu_calls = Arc::new(Mutex::new(Vec::new()));

        let system = Arc::new(VoiceSystem::new(
            CoreConfig::default(),
            Collaborators {
                asr: asr.clone(),
                nlu: Arc::new(RecordingNlu {
                    inner: RuleNlu::new(None),
                    calls: nlu_calls.clone(),
                }),
                tts: Arc::new(FakeTts),
                llm: Arc::new(GatedLlm {
                    gate: llm_gate.clone(),
                }),
                catalog: catalog.clone(),
                queue: queue.clone(),
                conversation,
            },
        ));

        let (tx, rx) = mpsc::channel(64);
        let session = system.manager().accept_with_id("dev".to_string(), tx).await;

        Self {
            system,
            session,
            outbound: rx,
            nlu_calls,
            asr,
            catalog,
            queue,
            llm_gate,
        }
    }

    async fn feed(&self, frame: &str) {
        self.system
            .coordinator()
            .handle_text(&self.session, frame)
            .await;
    }

    async fn feed_binary(&self, data: &[u8]) {
        self.system
            .coordinator()
            .handle_binary(&self.session, data)
            .await;
    }

    /// Let detached tasks run through their (immediately ready) awaits.
    async fn settle(&self) {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    /// Pop everything queued toward the device, reduced to shell payloads or
    /// command names.
    fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(describe(&frame));
        }
        frames
    }

    fn nlu_texts(&self) -> Vec<String> {
        self.nlu_calls.lock().unwrap().clone()
    }

    fn seed_music(&self, entries: &[(i64, &str, Option<&str>)]) {
        for (id, title, url) in entries {
            self.catalog.insert_content(ContentItem {
                id: *id,
                title: title.to_string(),
                kind: ContentKind::Music,
                category: None,
                artist: None,
                play_url: url.map(str::to_string),
                play_count: 0,
            });
        }
    }
}

fn describe(frame: &str) -> String {
    match serde_json::from_str::<Envelope>(frame) {
        Ok(Envelope::Request(request)) => {
            if request.command == "run_shell" {
                request
                    .payload
                    .as_ref()
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string()
            } else {
                request.command
            }
        }
        _ => panic!("server sent a non-request frame: {frame}"),
    }
}

fn wake_frame() -> String {
    r#"{"Event":{"id":"e1","event":"kws","data":"小爱同学"}}"#.to_string()
}

fn playing_frame(state: &str) -> String {
    json!({"Event": {"id": "p1", "event": "playing", "data": state}}).to_string()
}

enum Finality {
    Partial,
    IsStop,
    IsFinal,
}

fn instruction_frame(text: &str, finality: Finality) -> String {
    let inner = match finality {
        Finality::Partial => json!({
            "header": {"namespace": "SpeechRecognizer", "name": "RecognizeResult"},
            "payload": {"is_final": false, "results": [{"text": text}]},
        }),
        Finality::IsStop => json!({
            "header": {"namespace": "SpeechRecognizer", "name": "RecognizeResult"},
            "payload": {"is_final": false, "results": [{"text": text, "is_stop": true}]},
        }),
        Finality::IsFinal => json!({
            "header": {"namespace": "SpeechRecognizer", "name": "RecognizeResult"},
            "payload": {"is_final": true, "results": [{"text": text}]},
        }),
    };
    json!({"Event": {"id": "i1", "event": "instruction", "data": {"NewLine": inner.to_string()}}})
        .to_string()
}

fn cloud_playback_frame() -> String {
    let inner = json!({
        "header": {"namespace": "AudioPlayer", "name": "Play"},
        "payload": {},
    });
    json!({"Event": {"id": "c1", "event": "instruction", "data": {"NewLine": inner.to_string()}}})
        .to_string()
}

fn pcm_chunk(amplitude: i16, samples: usize) -> Vec<u8> {
    amplitude
        .to_le_bytes()
        .iter()
        .copied()
        .cycle()
        .take(samples * 2)
        .collect()
}

// ── S1: wake → silence → timeout ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn wake_without_speech_times_out_back_to_idle() {
    let mut h = Harness::new("").await;

    h.feed(&wake_frame()).await;
    h.settle().await;

    let frames = h.drain();
    assert_eq!(frames[0], ABORT_SHELL);
    assert_eq!(frames[1], "start_recording");
    assert_eq!(frames.len(), 2);
    assert_eq!(h.session.listen_state(), ListenState::Woken);
    assert!(!h.session.queue_active());

    tokio::time::advance(Duration::from_secs(5)).await;
    h.settle().await;

    assert_eq!(h.drain(), vec!["stop_recording".to_string()]);
    assert_eq!(h.session.listen_state(), ListenState::Idle);
}

#[tokio::test(start_paused = true)]
async fn start_recording_failure_rolls_the_wake_back() {
    let mut h = Harness::new("").await;

    h.feed(&wake_frame()).await;
    h.settle().await;

    // Recover the request id from the emitted frame.
    let raw = {
        let mut id = None;
        // Re-derive by peeking at what was sent: the second frame is the
        // start_recording request.
        let frames: Vec<String> = std::iter::from_fn(|| h.outbound.try_recv().ok()).collect();
        for frame in frames {
            if let Ok(Envelope::Request(request)) = serde_json::from_str::<Envelope>(&frame) {
                if request.command == "start_recording" {
                    id = Some(request.id);
                }
            }
        }
        id.expect("start_recording was sent")
    };

    h.feed(&json!({"Response": {"id": raw, "code": -1, "msg": "arecord busy"}}).to_string())
        .await;

    assert_eq!(h.session.listen_state(), ListenState::Idle);

    // The wake timeout was cancelled with the rollback: nothing more fires.
    tokio::time::advance(Duration::from_secs(6)).await;
    h.settle().await;
    assert!(h.drain().is_empty());
}

// ── S2: wake → speech → endpoint ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn speech_is_endpointed_and_transcribed_once() {
    let mut h = Harness::new("").await;

    h.feed(&wake_frame()).await;
    h.settle().await;
    h.drain();

    // 200 ms of loud audio flips Woken → Listening.
    h.feed_binary(&pcm_chunk(2000, 3200)).await;
    assert_eq!(h.session.listen_state(), ListenState::Listening);

    tokio::time::advance(Duration::from_millis(300)).await;
    h.feed_binary(&pcm_chunk(50, 3200)).await;
    assert_eq!(h.session.listen_state(), ListenState::Listening);

    tokio::time::advance(Duration::from_millis(300)).await;
    h.feed_binary(&pcm_chunk(50, 3200)).await;
    // 600 ms of silence endpoints the recording synchronously.
    assert_eq!(h.session.listen_state(), ListenState::Processing);

    h.settle().await;

    // The whole capture went to ASR exactly once.
    assert_eq!(h.asr.call_sizes(), vec![3 * 3200 * 2]);
    assert_eq!(h.session.listen_state(), ListenState::Idle);
    assert!(!h.session.pipeline_active());

    // Empty transcript → "didn't catch that" apology.
    let frames = h.drain();
    assert!(frames.contains(&"stop_recording".to_string()));
    assert!(
        frames
            .iter()
            .any(|frame| frame.contains("tts://抱歉，我没有听清楚"))
    );
}

#[tokio::test(start_paused = true)]
async fn json_stream_frames_feed_the_endpointer() {
    let mut h = Harness::new("").await;

    h.feed(&wake_frame()).await;
    h.settle().await;
    h.drain();

    // A JSON stream record is unwrapped to its bytes; six bytes of PCM.
    let stream = json!({"id": "s1", "tag": "record", "bytes": [0, 1, 2, 3, 4, 5], "data": null});
    h.feed_binary(stream.to_string().as_bytes()).await;
    assert_eq!(h.session.listen_state(), ListenState::Listening);

    // Force the endpoint via max duration and check the byte count that
    // reached ASR is the decoded payload, not the JSON envelope.
    tokio::time::advance(Duration::from_secs(11)).await;
    h.feed_binary(stream.to_string().as_bytes()).await;
    h.settle().await;

    assert_eq!(h.asr.call_sizes(), vec![12]);
}

// ── S3/S4: streaming instruction debounce ────────────────────────────────

#[tokio::test(start_paused = true)]
async fn back_to_back_commands_each_dispatch_once() {
    let mut h = Harness::new("").await;
    h.seed_music(&[
        (1, "两只老虎", Some("http://h/1.mp3")),
        (2, "小毛驴", Some("http://h/2.mp3")),
    ]);

    h.feed(&instruction_frame("播放音乐", Finality::Partial)).await;
    h.feed(&instruction_frame("播放音乐", Finality::IsStop)).await;
    h.settle().await;

    assert_eq!(h.nlu_texts(), vec!["播放音乐".to_string()]);
    assert!(h.session.queue_active());
    let frames = h.drain();
    assert!(frames.iter().any(|frame| frame.contains("player_play_url")));

    // A fresh non-final partial opens round two and re-arms dispatch.
    h.feed(&instruction_frame("下一首", Finality::Partial)).await;
    h.feed(&instruction_frame("下一首", Finality::IsStop)).await;
    h.settle().await;

    assert_eq!(
        h.nlu_texts(),
        vec!["播放音乐".to_string(), "下一首".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn duplicate_final_within_a_round_is_suppressed() {
    let h = Harness::new("").await;

    h.feed(&instruction_frame("上一首", Finality::Partial)).await;
    h.feed(&instruction_frame("上一首", Finality::IsStop)).await;
    h.feed(&instruction_frame("上一首", Finality::IsFinal)).await;
    h.settle().await;

    assert_eq!(h.nlu_texts(), vec!["上一首".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn debounce_fires_when_no_final_arrives() {
    let h = Harness::new("").await;

    h.feed(&instruction_frame("讲个故事", Finality::Partial)).await;
    h.settle().await;
    assert!(h.nlu_texts().is_empty());

    tokio::time::advance(Duration::from_millis(1500)).await;
    h.settle().await;

    assert_eq!(h.nlu_texts(), vec!["讲个故事".to_string()]);
}

// ── S5: cloud-playback interception while the pipeline is active ─────────

#[tokio::test(start_paused = true)]
async fn cloud_playback_is_intercepted_while_pipeline_runs() {
    let mut h = Harness::new("").await;

    // Chat goes through the gated LLM, holding the pipeline open.
    h.feed(&instruction_frame("给我讲讲恐龙", Finality::Partial))
        .await;
    h.feed(&instruction_frame("给我讲讲恐龙", Finality::IsStop))
        .await;
    h.settle().await;
    assert!(h.session.pipeline_active());
    h.drain();

    // The device's own assistant tries to seize playback mid-flight.
    h.feed(&cloud_playback_frame()).await;
    assert_eq!(
        h.drain(),
        vec![ABORT_SHELL.to_string(), PAUSE_SHELL.to_string()]
    );

    // Same for a Playing report.
    h.feed(&playing_frame("Playing")).await;
    assert_eq!(
        h.drain(),
        vec![ABORT_SHELL.to_string(), PAUSE_SHELL.to_string()]
    );

    // Neither interception reached the pipeline.
    assert_eq!(h.nlu_texts().len(), 1);

    // Release the model; the pipeline finishes and clears the gate.
    h.llm_gate.add_permits(1);
    h.settle().await;
    assert!(!h.session.pipeline_active());
    assert!(h.drain().iter().any(|frame| frame.contains("tts://好呀好呀")));
}

// ── S6: auto-play yields to user speech ──────────────────────────────────

#[tokio::test(start_paused = true)]
async fn auto_play_is_cancelled_by_user_speech() {
    let mut h = Harness::new("").await;
    h.seed_music(&[
        (1, "A", Some("http://h/a.mp3")),
        (2, "B", Some("http://h/b.mp3")),
        (3, "C", Some("http://h/c.mp3")),
    ]);
    h.queue.set_queue("dev", vec![1, 2, 3], 1).await;
    h.session.set_queue_active(true);

    // Track B just finished.
    h.feed(&playing_frame("Idle")).await;

    // The user starts speaking before the guard elapses.
    h.feed(&instruction_frame("上一首", Finality::Partial)).await;
    h.feed(&instruction_frame("上一首", Finality::IsStop)).await;
    h.settle().await;

    // Previous from index 1 lands on A: the pointer was never advanced by
    // the (cancelled) auto-play task.
    let frames = h.drain();
    assert!(frames.iter().any(|frame| frame.contains("http://h/a.mp3")));
    assert!(h.session.queue_active());
    assert_eq!(
        h.catalog.content_by_id(1).await.unwrap().unwrap().play_count,
        1
    );

    // And the cancelled task never wakes up to advance the queue.
    tokio::time::advance(Duration::from_secs(3)).await;
    h.settle().await;
    assert!(h.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn auto_play_advances_after_the_guard_window() {
    let mut h = Harness::new("").await;
    h.seed_music(&[
        (1, "A", Some("http://h/a.mp3")),
        (2, "B", Some("http://h/b.mp3")),
    ]);
    h.queue.set_queue("dev", vec![1, 2], 0).await;
    h.session.set_queue_active(true);

    h.feed(&playing_frame("Idle")).await;
    tokio::time::advance(Duration::from_millis(1500)).await;
    h.settle().await;

    let frames = h.drain();
    assert!(frames.iter().any(|frame| frame.contains("http://h/b.mp3")));
    assert_eq!(
        h.catalog.content_by_id(2).await.unwrap().unwrap().play_count,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn skip_track_advances_the_queue_from_the_admin_surface() {
    let mut h = Harness::new("").await;
    h.seed_music(&[
        (1, "A", Some("http://h/a.mp3")),
        (2, "B", Some("http://h/b.mp3")),
    ]);
    h.queue.set_queue("dev", vec![1, 2], 0).await;

    assert!(h.system.skip_track("dev", DeviceCommand::Next).await);
    let frames = h.drain();
    assert!(frames.iter().any(|frame| frame.contains("http://h/b.mp3")));

    // End of a sequential queue: a spoken notice instead of playback.
    assert!(h.system.skip_track("dev", DeviceCommand::Next).await);
    let frames = h.drain();
    assert!(frames.iter().any(|frame| frame.contains("tts://没有更多内容了")));

    // Unknown devices are reported, not panicked on.
    assert!(!h.system.skip_track("ghost", DeviceCommand::Next).await);
}

#[tokio::test(start_paused = true)]
async fn exhausted_queue_disables_auto_play() {
    let mut h = Harness::new("").await;
    h.seed_music(&[(1, "A", Some("http://h/a.mp3"))]);
    // Sequential mode at the last index: nothing left to play.
    h.queue.set_queue("dev", vec![1], 0).await;
    h.session.set_queue_active(true);

    h.feed(&playing_frame("Idle")).await;
    tokio::time::advance(Duration::from_millis(1500)).await;
    h.settle().await;

    assert!(h.drain().is_empty());
    assert!(!h.session.queue_active());
}

// ── S7: volume adjustments do not stop the music ─────────────────────────

#[tokio::test(start_paused = true)]
async fn volume_up_preserves_playback() {
    let mut h = Harness::new("").await;

    h.feed(&instruction_frame("大声一点", Finality::IsStop)).await;
    h.settle().await;

    let frames = h.drain();
    // The instruction path interrupts once up front.
    assert_eq!(frames[0], ABORT_SHELL);
    assert_eq!(frames[1], ABORT_SHELL);
    assert_eq!(frames[2], PAUSE_SHELL);
    // The response itself must not: no further abort/pause, no TTS,
    // just the volume bump and the playback recovery.
    assert_eq!(frames[3..], [VOLUME_UP_SHELL.to_string(), PLAY_SHELL.to_string()]);
    assert!(!frames[3..].iter().any(|f| f == ABORT_SHELL || f == PAUSE_SHELL));
}

// ── S8: delete with multi-turn confirmation ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn delete_confirmation_round_trip() {
    let mut h = Harness::new("").await;
    h.seed_music(&[
        (1, "小星星", Some("http://h/1.mp3")),
        (2, "小星星变奏曲", Some("http://h/2.mp3")),
        (3, "一闪一闪小星星", Some("http://h/3.mp3")),
        (4, "晴天", Some("http://h/4.mp3")),
    ]);

    // Turn one: search and ask.
    h.feed(&instruction_frame("删除小星星", Finality::Partial)).await;
    h.feed(&instruction_frame("删除小星星", Finality::IsStop)).await;
    h.settle().await;

    let frames = h.drain();
    assert!(frames.iter().any(|frame| frame.contains("找到了3条")));
    // continue_listening reopens the microphone silently.
    assert_eq!(frames.last().map(String::as_str), Some(WAKE_SILENT_SHELL));

    // Turn two, within the 30 s window: confirm.
    h.feed(&instruction_frame("是的", Finality::Partial)).await;
    h.feed(&instruction_frame("是的", Finality::IsStop)).await;
    h.settle().await;

    // The confirmation bypassed NLU entirely.
    assert_eq!(h.nlu_texts(), vec!["删除小星星".to_string()]);

    let frames = h.drain();
    assert!(frames.iter().any(|frame| frame.contains("已成功删除3条内容")));
    for id in [1, 2, 3] {
        assert_eq!(h.catalog.content_by_id(id).await.unwrap(), None);
    }
    assert!(h.catalog.content_by_id(4).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn expired_pending_action_falls_back_to_nlu() {
    let mut h = Harness::new("").await;
    h.seed_music(&[(1, "小星星", Some("http://h/1.mp3"))]);

    h.feed(&instruction_frame("删除小星星", Finality::Partial)).await;
    h.feed(&instruction_frame("删除小星星", Finality::IsStop)).await;
    h.settle().await;
    h.drain();

    // Let the confirmation window lapse.
    tokio::time::advance(Duration::from_secs(31)).await;
    h.settle().await;
    h.drain();

    h.feed(&instruction_frame("是的", Finality::Partial)).await;
    h.feed(&instruction_frame("是的", Finality::IsStop)).await;
    h.settle().await;

    // "是的" went through normal recognition this time, and nothing was
    // deleted.
    assert_eq!(
        h.nlu_texts(),
        vec!["删除小星星".to_string(), "是的".to_string()]
    );
    assert!(h.catalog.content_by_id(1).await.unwrap().is_some());
}

// ── Teardown hygiene ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn disconnect_releases_every_timer_and_reply() {
    let h = Harness::new("").await;

    // Arm a debounce timer and a wake timeout.
    h.feed(&instruction_frame("播放音乐", Finality::Partial)).await;
    h.feed(&wake_frame()).await;
    h.settle().await;

    let session = h.session.clone();
    h.system.manager().disconnect("dev").await;

    assert!(session.is_closed());
    assert_eq!(session.open_task_count(), 0);
    assert_eq!(session.pending_reply_count(), 0);
    assert_eq!(session.playing_state(), PlayingState::Idle);

    // A send after teardown is a silent no-op.
    session.send(&Request::pause()).await;
}
