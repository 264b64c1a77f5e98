use aide::axum::routing::{get_with, post_with};
use aide::transform::TransformOperation;
use axum::extract::{Path, State};
use itertools::Itertools;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::extractor::Json;
use crate::api::{ApiResult, ApiRouter, AppState};
use sv_system::data::DeviceCommand;
use sv_system::protocol::Request;

pub fn config() -> ApiRouter<AppState> {
    ApiRouter::new()
        .nest(
            "/devices",
            ApiRouter::new()
                .api_route("/", get_with(list_devices, list_devices_docs))
                .api_route("/:id/command", post_with(send_command, send_command_docs)),
        )
        .with_path_items(|t| {
            t.tag("Devices")
                .description("Inspect connected speakers and push commands to them")
        })
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DeviceInfo {
    pub device_id: String,
    pub listen_state: String,
    pub playing_state: String,
    pub queue_active: bool,
}

#[tracing::instrument(skip(state))]
pub async fn list_devices(state: State<AppState>) -> ApiResult<Json<Vec<DeviceInfo>>> {
    let sessions = state.system.manager().sessions().await;

    let devices = sessions
        .into_iter()
        .map(|session| DeviceInfo {
            device_id: session.device_id.clone(),
            listen_state: format!("{:?}", session.listen_state()).to_lowercase(),
            playing_state: format!("{:?}", session.playing_state()).to_lowercase(),
            queue_active: session.queue_active(),
        })
        .sorted_by(|a, b| a.device_id.cmp(&b.device_id))
        .collect();

    Ok(Json(devices))
}

fn list_devices_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the currently connected devices and their session state")
        .response::<200, Json<Vec<DeviceInfo>>>()
}

/// A command pushed to a device from the admin surface.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommandBody {
    Pause,
    Play,
    VolumeUp,
    VolumeDown,
    SetVolume { level: u8 },
    /// Speak `text` through the device's own TTS.
    Speak { text: String },
    PlayUrl { url: String },
    /// Advance the device's play queue, respecting its play mode.
    Next,
    Previous,
    /// Wake the device as if the wake word was heard.
    Wake { silent: bool },
    MicOn,
    MicOff,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CommandOutcome {
    pub device_id: String,
    pub sent: bool,
}

#[tracing::instrument(skip(state, body))]
pub async fn send_command(
    state: State<AppState>,
    Path(device_id): Path<String>,
    Json(body): Json<DeviceCommandBody>,
) -> ApiResult<Json<CommandOutcome>> {
    if state.system.manager().get(&device_id).await.is_none() {
        return Err(ApiError::UnknownDevice { device_id });
    }

    // Queue navigation goes through the pipeline so it respects the play
    // mode and skips unplayable entries; everything else is a plain device
    // request.
    let request = match body {
        DeviceCommandBody::Next => {
            state.system.skip_track(&device_id, DeviceCommand::Next).await;
            return Ok(Json(CommandOutcome {
                device_id,
                sent: true,
            }));
        }
        DeviceCommandBody::Previous => {
            state
                .system
                .skip_track(&device_id, DeviceCommand::Previous)
                .await;
            return Ok(Json(CommandOutcome {
                device_id,
                sent: true,
            }));
        }
        DeviceCommandBody::Pause => Request::pause(),
        DeviceCommandBody::Play => Request::play(),
        DeviceCommandBody::VolumeUp => Request::volume_up(),
        DeviceCommandBody::VolumeDown => Request::volume_down(),
        DeviceCommandBody::SetVolume { level } => Request::set_volume(level),
        DeviceCommandBody::Speak { text } => Request::play_text(&text),
        DeviceCommandBody::PlayUrl { url } => Request::play_url(&url),
        DeviceCommandBody::Wake { silent } => Request::wake_up(silent),
        DeviceCommandBody::MicOn => Request::mic_on(),
        DeviceCommandBody::MicOff => Request::mic_off(),
    };

    state
        .system
        .manager()
        .send_request(&device_id, request, false)
        .await;

    Ok(Json(CommandOutcome {
        device_id,
        sent: true,
    }))
}

fn send_command_docs(op: TransformOperation) -> TransformOperation {
    op.description("Send a control command to a connected device")
        .response::<200, Json<CommandOutcome>>()
}
