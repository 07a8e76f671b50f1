//! HTTP read API and WebSocket progress surface. Thin by design: every
//! handler translates a request into one catalog query or one supervisor
//! call.

mod browse;
mod photos;
mod pipeline;
mod scan;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

use crate::broadcast::ProgressBroadcaster;
use crate::config::Config;
use crate::db::Catalog;
use crate::pipeline::Supervisor;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub config: Arc<Config>,
    pub supervisor: Arc<Supervisor>,
    pub broadcaster: ProgressBroadcaster,
}

/// Handler error: either a clean 404 or an opaque 500 with the detail in
/// the log.
pub enum ApiError {
    NotFound,
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => {
                (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "not found"})))
                    .into_response()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "API handler error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "internal error"})),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        // Photos
        .route("/api/photos", get(photos::list))
        .route("/api/photos/:id", get(photos::detail))
        .route("/api/photos/:id/thumbnail", get(photos::thumbnail))
        .route("/api/photos/:id/original", get(photos::original))
        .route("/api/photos/:id/motion", get(photos::motion_video))
        .route("/api/photos/:id/favorite", post(photos::toggle_favorite))
        .route("/api/stats", get(photos::stats))
        // Browse
        .route("/api/directories", get(browse::directories))
        .route("/api/timeline", get(browse::timeline))
        .route("/api/timeline/years", get(browse::years))
        .route("/api/persons", get(browse::persons))
        .route(
            "/api/persons/:id",
            get(browse::person_detail).patch(browse::rename_person),
        )
        .route("/api/persons/:id/photos", get(browse::person_photos))
        .route("/api/persons/:id/merge", post(browse::merge_persons))
        .route("/api/events", get(browse::events))
        .route("/api/events/:id", get(browse::event_detail))
        .route("/api/events/:id/photos", get(browse::event_photos))
        .route("/api/locations/countries", get(browse::countries))
        .route("/api/locations/cities", get(browse::cities))
        .route("/api/locations/map", get(browse::map_points))
        .route("/api/tags", get(browse::tags))
        .route("/api/duplicates", get(browse::duplicates))
        .route("/api/large-files", get(browse::large_files))
        .route("/api/search", get(browse::search))
        // Scan control
        .route("/api/scan/status", get(scan::status))
        .route("/api/scan/trigger", post(scan::trigger))
        .route("/api/scan/stop", post(scan::stop))
        .route("/api/scan/clear-index", post(scan::clear_index))
        .route("/api/scan/failed", get(scan::failed_items))
        .route("/api/scan/ws", get(scan::websocket))
        // Pipeline introspection
        .route("/api/pipeline/status", get(pipeline::status))
        .route("/api/pipeline/flow", get(pipeline::flow))
        .route("/api/pipeline/ws", get(pipeline::websocket))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "app": "lumika",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
