//! Photo endpoints: listing, detail, bytes, favorite toggle, stats.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::db::PhotoFilter;

use super::{ApiError, ApiResult, AppState};

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<PhotoFilter>,
) -> ApiResult<Response> {
    let page = state.catalog.list_photos(&filter)?;
    Ok(Json(page).into_response())
}

pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let meta = state.catalog.get_file(&id)?.ok_or(ApiError::NotFound)?;
    let faces = state.catalog.faces_for_file(&id)?;
    let tags = state.catalog.tags_for_file(&id)?;
    let duplicate_group = state.catalog.duplicate_group_of(&id)?;
    Ok(Json(json!({
        "photo": meta,
        "faces": faces,
        "tags": tags,
        "duplicate_group": duplicate_group,
    }))
    .into_response())
}

#[derive(Deserialize)]
pub struct ThumbParams {
    #[serde(default = "default_thumb_size")]
    pub size: u32,
}

fn default_thumb_size() -> u32 {
    600
}

pub async fn thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ThumbParams>,
) -> ApiResult<Response> {
    let meta = state
        .catalog
        .thumbnail_for(&id, params.size)?
        .ok_or(ApiError::NotFound)?;
    let path = state.config.data_dir.join(&meta.rel_path);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, "image/webp")], bytes).into_response())
}

pub async fn original(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let meta = state.catalog.get_file(&id)?.ok_or(ApiError::NotFound)?;
    let path = state.config.photos_path.join(&meta.path);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound)?;
    let mime = meta.mime_type.unwrap_or_else(|| "application/octet-stream".into());
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

/// Motion companion video: the extracted artifact for embedded motion
/// photos, or the sidecar file for Live Photos.
pub async fn motion_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let meta = state.catalog.get_file(&id)?.ok_or(ApiError::NotFound)?;

    let path = if let Some(rel) = &meta.motion_video {
        state.config.data_dir.join(rel)
    } else if let Some(rel) = &meta.live_video {
        state.config.photos_path.join(rel)
    } else {
        return Err(ApiError::NotFound);
    };

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, "video/mp4")], bytes).into_response())
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let value = state
        .catalog
        .toggle_favorite(&id)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(json!({"id": id, "is_favorite": value})).into_response())
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Response> {
    let stats = state.catalog.stats()?;
    Ok(Json(stats).into_response())
}
