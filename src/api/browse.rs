//! Browse endpoints: directories, timeline, persons, events, locations,
//! tags, duplicates, large files, search.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::db::PhotoFilter;

use super::{ApiError, ApiResult, AppState};

pub async fn directories(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.catalog.directories()?).into_response())
}

#[derive(Deserialize)]
pub struct TimelineParams {
    pub year: Option<i32>,
}

pub async fn timeline(
    State(state): State<AppState>,
    Query(params): Query<TimelineParams>,
) -> ApiResult<Response> {
    Ok(Json(state.catalog.timeline(params.year)?).into_response())
}

pub async fn years(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.catalog.timeline_years()?).into_response())
}

pub async fn persons(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.catalog.list_persons()?).into_response())
}

pub async fn person_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let person = state.catalog.get_person(id)?.ok_or(ApiError::NotFound)?;
    Ok(Json(person).into_response())
}

pub async fn person_photos(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(mut filter): Query<PhotoFilter>,
) -> ApiResult<Response> {
    filter.person_id = Some(id);
    Ok(Json(state.catalog.list_photos(&filter)?).into_response())
}

#[derive(Deserialize)]
pub struct RenameBody {
    pub name: String,
}

pub async fn rename_person(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RenameBody>,
) -> ApiResult<Response> {
    if !state.catalog.rename_person(id, body.name.trim())? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({"id": id, "name": body.name.trim()})).into_response())
}

#[derive(Deserialize)]
pub struct MergeBody {
    pub from: Vec<i64>,
}

pub async fn merge_persons(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<MergeBody>,
) -> ApiResult<Response> {
    state.catalog.get_person(id)?.ok_or(ApiError::NotFound)?;
    state.catalog.merge_persons(id, &body.from)?;
    Ok(Json(json!({"merged_into": id, "from": body.from})).into_response())
}

pub async fn events(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.catalog.list_events()?).into_response())
}

pub async fn event_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let event = state.catalog.get_event(id)?.ok_or(ApiError::NotFound)?;
    Ok(Json(event).into_response())
}

pub async fn event_photos(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    state.catalog.get_event(id)?.ok_or(ApiError::NotFound)?;
    Ok(Json(state.catalog.event_photos(id)?).into_response())
}

pub async fn countries(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.catalog.location_countries()?).into_response())
}

#[derive(Deserialize)]
pub struct CitiesParams {
    pub country: Option<String>,
}

pub async fn cities(
    State(state): State<AppState>,
    Query(params): Query<CitiesParams>,
) -> ApiResult<Response> {
    Ok(Json(state.catalog.location_cities(params.country.as_deref())?).into_response())
}

#[derive(Deserialize)]
pub struct MapParams {
    #[serde(default = "default_map_limit")]
    pub limit: u32,
}

fn default_map_limit() -> u32 {
    5000
}

pub async fn map_points(
    State(state): State<AppState>,
    Query(params): Query<MapParams>,
) -> ApiResult<Response> {
    Ok(Json(state.catalog.map_points(params.limit)?).into_response())
}

pub async fn tags(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.catalog.list_tags()?).into_response())
}

pub async fn duplicates(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.catalog.list_duplicate_groups()?).into_response())
}

#[derive(Deserialize)]
pub struct LargeParams {
    #[serde(default = "default_large_limit")]
    pub limit: u32,
}

fn default_large_limit() -> u32 {
    100
}

pub async fn large_files(
    State(state): State<AppState>,
    Query(params): Query<LargeParams>,
) -> ApiResult<Response> {
    Ok(Json(state.catalog.large_files(params.limit)?).into_response())
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Full-text search over paths, filenames, place names, tags, captions
/// and person names.
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Response> {
    let filter = PhotoFilter {
        q: Some(params.q),
        limit: params.limit,
        offset: params.offset,
        ..Default::default()
    };
    Ok(Json(state.catalog.list_photos(&filter)?).into_response())
}
