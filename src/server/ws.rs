//! Popup WebSocket stream.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::AppState;
use crate::notify::{PopupHub, WsMessage};

#[derive(Debug, Deserialize)]
pub(super) struct WsParams {
    user_id: Option<String>,
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> impl IntoResponse {
    info!(user_id = params.user_id.as_deref().unwrap_or("*"), "WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.hub, params.user_id))
}

async fn send_json(socket: &mut WebSocket, msg: &WsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode WS message");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<PopupHub>, user_id: Option<String>) {
    // Subscribe before greeting so nothing published in between is lost.
    let mut rx = hub.subscribe();

    let hello = WsMessage::Connected {
        user_id: user_id.clone(),
    };
    if !send_json(&mut socket, &hello).await {
        warn!("Failed to send greeting, client disconnected");
        return;
    }
    info!(user_id = user_id.as_deref().unwrap_or("*"), "WebSocket client connected");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if !msg.is_for(user_id.as_deref()) {
                            continue;
                        }
                        if !send_json(&mut socket, &msg).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind popups");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Popup channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}
