//! Scan control endpoints and the scan-progress WebSocket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;

use super::{ApiResult, AppState};

pub async fn status(State(state): State<AppState>) -> Response {
    Json(state.supervisor.scan_snapshot()).into_response()
}

pub async fn trigger(State(state): State<AppState>) -> ApiResult<Response> {
    let started = state
        .supervisor
        .trigger_scan()
        .map_err(super::ApiError::Internal)?;
    let body = if started {
        json!({"status": "scan_started"})
    } else {
        json!({"status": "already_scanning"})
    };
    Ok(Json(body).into_response())
}

pub async fn stop(State(state): State<AppState>) -> Response {
    state.supervisor.stop_scan();
    Json(json!({"status": "stop_requested"})).into_response()
}

pub async fn clear_index(State(state): State<AppState>) -> ApiResult<Response> {
    let cleared = state
        .supervisor
        .clear_index()
        .map_err(super::ApiError::Internal)?;
    let body = if cleared {
        json!({"status": "cleared"})
    } else {
        json!({"status": "refused_while_scanning"})
    };
    Ok(Json(body).into_response())
}

pub async fn failed_items(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.catalog.failed_items(200)?).into_response())
}

pub async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| scan_ws(socket, state))
}

/// Push scan snapshots as they change; a heartbeat frame every 30 s
/// distinguishes idle from disconnected.
async fn scan_ws(mut socket: WebSocket, state: AppState) {
    let mut rx = state.broadcaster.subscribe();

    let initial = state.supervisor.scan_snapshot();
    if send_json(&mut socket, &initial).await.is_err() {
        return;
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
    heartbeat.reset();

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Ok(frame) => {
                    if send_json(&mut socket, &frame.scan).await.is_err() {
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
                // Clients never send payloads; any close/error ends the
                // session.
                match incoming {
                    Some(Ok(_)) => continue,
                    _ => return,
                }
            }
        }
    }
}

pub(super) async fn send_json<T: serde::Serialize>(
    socket: &mut WebSocket,
    value: &T,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text)).await
}
