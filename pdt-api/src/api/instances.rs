//! Instance endpoints

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
use pdt_common::db::{Instance, InstanceInput, InstancePatch};
use pdt_common::store::instances;

use super::{filtered_page, resource_routes};
use crate::endpoints::INSTANCES;
use crate::error::ApiError;
use crate::pagination::Page;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    resource_routes(
        "/api/instances",
        get(list_instances).post(create_instance),
        get(get_instance)
            .put(update_instance)
            .patch(patch_instance)
            .delete(delete_instance),
    )
}

/// GET /api/instances/
pub async fn list_instances(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Page<Instance>>, ApiError> {
    let query = INSTANCES.parse_query(raw)?;
    let rows = instances::list_instances(&state.db).await?;
    Ok(Json(filtered_page(rows, &query, &INSTANCES)?))
}

pub async fn get_instance(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Instance>, ApiError> {
    let Path(id) = id?;
    Ok(Json(instances::get_instance(&state.db, id).await?))
}

pub async fn create_instance(
    State(state): State<AppState>,
    payload: Result<Json<InstanceInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Instance>), ApiError> {
    let Json(input) = payload?;
    let instance = instances::create_instance(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

pub async fn update_instance(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<InstanceInput>, JsonRejection>,
) -> Result<Json<Instance>, ApiError> {
    let Path(id) = id?;
    let Json(input) = payload?;
    Ok(Json(instances::update_instance(&state.db, id, input).await?))
}

pub async fn patch_instance(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<InstancePatch>, JsonRejection>,
) -> Result<Json<Instance>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let current = instances::get_instance(&state.db, id).await?;
    Ok(Json(instances::update_instance(&state.db, id, patch.apply(current)).await?))
}

pub async fn delete_instance(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    instances::delete_instance(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
