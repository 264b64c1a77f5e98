//! Wire protocol between the server and the speaker firmware.
//!
//! Text frames carry one of three envelopes, `{"Request": …}`,
//! `{"Response": …}` or `{"Event": …}`; older firmware revisions send the
//! event/response objects without the wrapper, so the parser accepts both.
//! Binary frames are JSON-encoded [`Stream`] records whose `bytes` array is
//! raw S16_LE PCM; a frame that is not valid JSON is treated as bare PCM.
//!
//! The firmware only registers six RPC handlers (`run_shell`,
//! `start_recording`, `stop_recording`, `start_play`, `stop_play`,
//! `get_version`). Every higher-level device control is a `run_shell`
//! payload, and the exact strings below are what the firmware interprets;
//! changing them breaks device compatibility.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Media player state as reported by the `playing` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayingState {
    Playing,
    Paused,
    #[default]
    Idle,
}

impl PlayingState {
    /// Case-insensitive parse, unknown labels collapse to `Idle`.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "playing" => Self::Playing,
            "paused" => Self::Paused,
            _ => Self::Idle,
        }
    }
}

/// The wrapped frame format used by current firmware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    Request(Request),
    Response(Response),
    Event(Event),
}

impl Envelope {
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization cannot fail")
    }
}

/// A frame received from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Event(Event),
    Response(Response),
}

/// Parse a text frame, accepting both the wrapped and the legacy flat shape.
///
/// Returns `None` for unparseable or unrecognized frames; the caller logs
/// and drops those.
pub fn parse_text_frame(text: &str) -> Option<InboundFrame> {
    let value: Value = serde_json::from_str(text).ok()?;

    if let Ok(envelope) = Envelope::deserialize(&value) {
        return match envelope {
            Envelope::Event(event) => Some(InboundFrame::Event(event)),
            Envelope::Response(response) => Some(InboundFrame::Response(response)),
            // The device never sends us requests.
            Envelope::Request(_) => None,
        };
    }

    let object = value.as_object()?;
    if object.contains_key("event") {
        Event::deserialize(&value).ok().map(InboundFrame::Event)
    } else if object.contains_key("code") || object.contains_key("id") {
        Response::deserialize(&value).ok().map(InboundFrame::Response)
    } else {
        None
    }
}

/// Parse a binary frame into a [`Stream`].
///
/// Returns `None` when the frame is not a JSON stream record, in which case
/// the caller falls back to treating the whole frame as raw PCM.
pub fn parse_binary_frame(data: &[u8]) -> Option<Stream> {
    let stream: Stream = serde_json::from_slice(data).ok()?;
    if stream.tag.is_empty() {
        return None;
    }
    Some(stream)
}

/// Event notification pushed by the device.
///
/// Recognized `event` values: `kws` (wake word, `data` is the phrase),
/// `playing` (`data` is the player state label) and `instruction`
/// (streaming cloud-ASR output, see [`Event::transcript`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Event {
    pub fn is_wake_word(&self) -> bool {
        self.event == "kws"
    }

    pub fn is_playing(&self) -> bool {
        self.event == "playing"
    }

    pub fn is_instruction(&self) -> bool {
        self.event == "instruction"
    }

    pub fn playing_state(&self) -> Option<PlayingState> {
        if !self.is_playing() {
            return None;
        }
        self.data
            .as_ref()
            .and_then(Value::as_str)
            .map(PlayingState::from_label)
    }

    /// The transcript carried by a streaming ASR partial, with its finality
    /// flag (`payload.is_final` or `results[0].is_stop`).
    ///
    /// `None` for the `NewFile` marker, execution directives and empty
    /// results.
    pub fn transcript(&self) -> Option<(String, bool)> {
        let envelope = self.instruction_envelope()?;
        let result = envelope.payload.results.into_iter().next()?;
        let text = result.text?;
        if text.is_empty() {
            return None;
        }
        Some((text, envelope.payload.is_final || result.is_stop))
    }

    /// Whether this instruction is the device-side assistant trying to seize
    /// playback (`AudioPlayer/Play` or `SpeechSynthesizer/Speak`).
    ///
    /// While a server pipeline is in flight these must be intercepted with
    /// an abort + pause instead of reaching the player.
    pub fn is_cloud_playback(&self) -> bool {
        let Some(envelope) = self.instruction_envelope() else {
            return false;
        };
        matches!(
            (envelope.header.namespace.as_str(), envelope.header.name.as_str()),
            ("AudioPlayer", "Play") | ("SpeechSynthesizer", "Speak")
        )
    }

    /// Decode the instruction payload.
    ///
    /// The streaming format is `{"NewLine": "<json string>"}` where the
    /// inner string is itself a JSON document; a flat (already-decoded)
    /// object is accepted for older firmware. The bare `"NewFile"` marker
    /// carries nothing.
    fn instruction_envelope(&self) -> Option<AsrEnvelope> {
        if !self.is_instruction() {
            return None;
        }
        let data = self.data.as_ref()?;
        let object = data.as_object()?;

        if let Some(inner) = object.get("NewLine") {
            let inner = inner.as_str()?;
            return serde_json::from_str(inner).ok();
        }

        AsrEnvelope::deserialize(data).ok()
    }
}

#[derive(Debug, Default, Deserialize)]
struct AsrEnvelope {
    #[serde(default)]
    header: AsrHeader,
    #[serde(default)]
    payload: AsrPayload,
}

#[derive(Debug, Default, Deserialize)]
struct AsrHeader {
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct AsrPayload {
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    results: Vec<AsrResult>,
}

#[derive(Debug, Default, Deserialize)]
struct AsrResult {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    is_stop: bool,
}

/// Command sent to the device. `code` semantics on the reply: 0 success,
/// -1 failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Request {
    fn new(command: &str, payload: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            command: command.to_string(),
            payload,
        }
    }

    pub fn to_frame(&self) -> String {
        Envelope::Request(self.clone()).to_frame()
    }

    pub fn run_shell(script: impl Into<String>) -> Self {
        Self::new("run_shell", Some(Value::String(script.into())))
    }

    /// Interrupt the built-in cloud assistant by restarting its service.
    pub fn abort_xiaoai() -> Self {
        Self::run_shell("/etc/init.d/mico_aivs_lab restart >/dev/null 2>&1")
    }

    pub fn pause() -> Self {
        Self::run_shell("mphelper pause")
    }

    pub fn play() -> Self {
        Self::run_shell("mphelper play")
    }

    pub fn get_play_status() -> Self {
        Self::run_shell("mphelper mute_stat")
    }

    pub fn play_url(url: &str) -> Self {
        Self::run_shell(format!(
            "ubus call mediaplayer player_play_url '{{\"url\":\"{url}\",\"type\": 1}}'"
        ))
    }

    /// Speak `text` through the device's own TTS binary. Single quotes in
    /// the payload are shell-escaped.
    pub fn play_text(text: &str) -> Self {
        let safe = text.replace('\'', "'\\''");
        Self::run_shell(format!("/usr/sbin/tts_play.sh '{safe}'"))
    }

    /// Re-open the microphone. `silent` skips the wake-word prompt sound.
    pub fn wake_up(silent: bool) -> Self {
        if silent {
            Self::run_shell("ubus call pnshelper event_notify '{\"src\":1,\"event\":0}'")
        } else {
            Self::run_shell(
                "ubus call pnshelper event_notify '{\"src\":3, \"event\":7}' && \
                 sleep 0.1 && \
                 ubus call pnshelper event_notify '{\"src\":3, \"event\":8}'",
            )
        }
    }

    pub fn mic_on() -> Self {
        Self::run_shell("ubus -t1 -S call pnshelper event_notify '{\"src\":3, \"event\":7}' 2>&1")
    }

    pub fn mic_off() -> Self {
        Self::run_shell("ubus -t1 -S call pnshelper event_notify '{\"src\":3, \"event\":8}' 2>&1")
    }

    /// Hand `text` to the built-in assistant's NLP as if it were spoken.
    pub fn ask_xiaoai(text: &str) -> Self {
        let safe = text.replace('"', "\\\"");
        Self::run_shell(format!(
            "ubus call mibrain ai_service '{{\"tts\":1,\"nlp\":1,\"nlp_text\":\"{safe}\"}}'"
        ))
    }

    pub fn set_volume(level: u8) -> Self {
        let level = level.min(100);
        Self::run_shell(format!(
            "ubus call player_command volume_ctrl '{{\"action\":\"set\",\"value\":{level}}}'"
        ))
    }

    pub fn volume_up() -> Self {
        Self::run_shell("ubus call player_command volume_ctrl '{\"action\":\"up\",\"value\":10}'")
    }

    pub fn volume_down() -> Self {
        Self::run_shell("ubus call player_command volume_ctrl '{\"action\":\"down\",\"value\":10}'")
    }

    pub fn get_device_model() -> Self {
        Self::run_shell("echo $(micocfg_model)")
    }

    pub fn get_device_sn() -> Self {
        Self::run_shell("echo $(micocfg_sn)")
    }

    /// Start capture from the shared ALSA device (`pcm="noop"` is the
    /// dsnoop capture the cloud assistant also reads from, which is why a
    /// wake must be paired with [`Request::abort_xiaoai`]).
    pub fn start_recording(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self::new(
            "start_recording",
            Some(serde_json::json!({
                "pcm": "noop",
                "sample_rate": sample_rate,
                "channels": channels,
                "bits_per_sample": bits_per_sample,
                "period_size": 360,
                "buffer_size": 1440,
            })),
        )
    }

    pub fn stop_recording() -> Self {
        Self::new("stop_recording", None)
    }

    pub fn start_play(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self::new(
            "start_play",
            Some(serde_json::json!({
                "pcm": "noop",
                "sample_rate": sample_rate,
                "channels": channels,
                "bits_per_sample": bits_per_sample,
            })),
        )
    }

    pub fn stop_play() -> Self {
        Self::new("stop_play", None)
    }

    pub fn get_version() -> Self {
        Self::new("get_version", None)
    }
}

/// Reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn is_failure(&self) -> bool {
        self.code == Some(-1)
    }
}

/// Binary stream record (`tag = "record"` is microphone audio).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    #[serde(default)]
    pub id: String,
    pub tag: String,
    #[serde(default)]
    pub bytes: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Stream {
    pub fn is_audio(&self) -> bool {
        self.tag == "record"
    }
}
