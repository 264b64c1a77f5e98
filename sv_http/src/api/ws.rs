//! The device-facing WebSocket endpoint.
//!
//! One socket = one device session. Outbound frames travel through a channel
//! pumped by a writer task, so the core never touches the socket directly;
//! inbound frames are fed straight into the coordinator, which keeps its own
//! long-running work off this loop.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::api::AppState;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| device_session(state, socket))
}

async fn device_session(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let (outbound, mut outbound_rx) = mpsc::channel::<String>(64);
    let session = state.system.manager().accept(outbound).await;
    let coordinator = state.system.coordinator().clone();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => coordinator.handle_text(&session, &text).await,
            Ok(Message::Binary(bytes)) => coordinator.handle_binary(&session, &bytes).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(device_id = %session.device_id, %error, "websocket error");
                break;
            }
        }
    }

    state.system.manager().disconnect(&session.device_id).await;
    writer.abort();
}
