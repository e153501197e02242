//! CI project endpoints

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
use pdt_common::db::{CIProject, CIProjectInput, CIProjectPatch};
use pdt_common::store::ci_projects;

use super::{filtered_page, resource_routes};
use crate::endpoints::CI_PROJECTS;
use crate::error::ApiError;
use crate::pagination::Page;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    resource_routes(
        "/api/ci-projects",
        get(list_ci_projects).post(create_ci_project),
        get(get_ci_project)
            .put(update_ci_project)
            .patch(patch_ci_project)
            .delete(delete_ci_project),
    )
}

/// GET /api/ci-projects/
pub async fn list_ci_projects(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Page<CIProject>>, ApiError> {
    let query = CI_PROJECTS.parse_query(raw)?;
    let rows = ci_projects::list_ci_projects(&state.db).await?;
    Ok(Json(filtered_page(rows, &query, &CI_PROJECTS)?))
}

pub async fn get_ci_project(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<CIProject>, ApiError> {
    let Path(id) = id?;
    Ok(Json(ci_projects::get_ci_project(&state.db, id).await?))
}

pub async fn create_ci_project(
    State(state): State<AppState>,
    payload: Result<Json<CIProjectInput>, JsonRejection>,
) -> Result<(StatusCode, Json<CIProject>), ApiError> {
    let Json(input) = payload?;
    let ci_project = ci_projects::create_ci_project(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(ci_project)))
}

pub async fn update_ci_project(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CIProjectInput>, JsonRejection>,
) -> Result<Json<CIProject>, ApiError> {
    let Path(id) = id?;
    let Json(input) = payload?;
    Ok(Json(ci_projects::update_ci_project(&state.db, id, input).await?))
}

pub async fn patch_ci_project(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CIProjectPatch>, JsonRejection>,
) -> Result<Json<CIProject>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let current = ci_projects::get_ci_project(&state.db, id).await?;
    Ok(Json(ci_projects::update_ci_project(&state.db, id, patch.apply(current)).await?))
}

pub async fn delete_ci_project(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    ci_projects::delete_ci_project(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
