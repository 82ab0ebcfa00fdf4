//! Chat event stream over WebSocket.
//!
//! The upgrade only names the user (`?uid=`); the client proves that identity
//! with an authenticate request once the socket is open.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use chatline_hub::Frame;
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::server::{ApiError, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/ws", get(websocket_handler))
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    uid: Option<String>,
}

/// GET /chat/ws?uid=<user id>
#[instrument(skip(ws, state))]
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
) -> Result<Response, ApiError> {
    let user_id = params
        .uid
        .map(|uid| uid.trim().to_string())
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing uid query parameter"))?;
    if state.shutdown.is_stopping() {
        return Err(ApiError::unavailable("Server is shutting down"));
    }

    let limit = state.hub.config().max_frame_size;
    info!(user_id = %user_id, "Chat WebSocket upgrade requested");
    Ok(ws
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, user_id, state)))
}

/// Hand an upgraded socket to the hub and hold a drain guard until both
/// pumps finish.
async fn handle_socket(socket: WebSocket, user_id: String, state: Arc<AppState>) {
    let _guard = state.shutdown.guard();
    let (sink, stream) = socket.split();
    let stream = stream.map(|result| result.map(frame_from_message));
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(message_from_frame(frame))));

    match state.hub.accept(&user_id, stream, sink).await {
        Ok(tasks) => {
            let id = tasks.id;
            tasks.join().await;
            info!(user_id = %user_id, connection_id = %id, "Chat WebSocket closed");
        }
        Err(e) => warn!(user_id = %user_id, error = %e, "Failed to accept chat connection"),
    }
}

fn frame_from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(_) => Frame::Close,
    }
}

fn message_from_frame(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        })),
    }
}
