//! Release endpoints

use std::collections::HashMap;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use pdt_common::db::{Release, ReleaseInput, ReleasePatch};
use pdt_common::store::releases;

use super::{filtered_page, resource_routes};
use crate::endpoints::RELEASES;
use crate::error::ApiError;
use crate::pagination::Page;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    resource_routes(
        "/api/releases",
        get(list_releases).post(create_release),
        get(get_release)
            .put(update_release)
            .patch(patch_release)
            .delete(delete_release),
    )
}

/// GET /api/releases/
pub async fn list_releases(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Page<Release>>, ApiError> {
    let query = RELEASES.parse_query(raw)?;
    let rows = releases::list_releases(&state.db).await?;
    Ok(Json(filtered_page(rows, &query, &RELEASES)?))
}

pub async fn get_release(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Release>, ApiError> {
    let Path(id) = id?;
    Ok(Json(releases::get_release(&state.db, id).await?))
}

pub async fn create_release(
    State(state): State<AppState>,
    payload: Result<Json<ReleaseInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Release>), ApiError> {
    let Json(input) = payload?;
    let release = releases::create_release(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(release)))
}

pub async fn update_release(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ReleaseInput>, JsonRejection>,
) -> Result<Json<Release>, ApiError> {
    let Path(id) = id?;
    let Json(input) = payload?;
    Ok(Json(releases::update_release(&state.db, id, input).await?))
}

pub async fn patch_release(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ReleasePatch>, JsonRejection>,
) -> Result<Json<Release>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let current = releases::get_release(&state.db, id).await?;
    Ok(Json(releases::update_release(&state.db, id, patch.apply(current)).await?))
}

pub async fn delete_release(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    releases::delete_release(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
