//! Pipeline introspection: live statistics and the static stage graph.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;

use crate::pipeline::stats::flow_nodes;

use super::scan::send_json;
use super::AppState;

pub async fn status(State(state): State<AppState>) -> Response {
    Json(state.supervisor.snapshot()).into_response()
}

pub async fn flow() -> Response {
    Json(json!({ "stages": flow_nodes() })).into_response()
}

pub async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| pipeline_ws(socket, state))
}

async fn pipeline_ws(mut socket: WebSocket, state: AppState) {
    let mut rx = state.broadcaster.subscribe();

    let initial = state.supervisor.snapshot();
    if send_json(&mut socket, &initial).await.is_err() {
        return;
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
    heartbeat.reset();

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Ok(frame) => {
                    if send_json(&mut socket, &frame.pipeline).await.is_err() {
                        return;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            },
            _ = heartbeat.tick() => {
                if send_json(&mut socket, &json!({"heartbeat": true})).await.is_err() {
                    return;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => continue,
                    _ => return,
                }
            }
        }
    }
}
