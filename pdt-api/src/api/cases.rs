//! Case endpoints
//!
//! Case lists support the `deployed_on` / `exclude_deployed_on` filters,
//! which look at deployment reports. `trigger_sync` is public and only
//! queues a pull of the case.

use std::collections::HashMap;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use pdt_common::db::{Case, CaseInput, CasePatch};
use pdt_common::filter::{apply_ordering, case_filter};
use pdt_common::store::cases;
use pdt_sync::Task;
use serde::Serialize;
use tracing::info;

use super::{resource_routes, route_both};
use crate::endpoints::CASES;
use crate::error::ApiError;
use crate::pagination::Page;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    resource_routes(
        "/api/cases",
        get(list_cases).post(create_case),
        get(get_case).put(update_case).patch(patch_case).delete(delete_case),
    )
}

/// Routes reachable without the API token
pub fn public_routes() -> Router<AppState> {
    route_both(Router::new(), "/api/cases/:id/trigger_sync", post(trigger_sync))
}

/// GET /api/cases/
pub async fn list_cases(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Page<Case>>, ApiError> {
    let query = CASES.parse_query(raw)?;
    let expr = case_filter(&query.filters, CASES.filters)?;

    let mut views = expr.apply(cases::list_case_views(&state.db).await?);
    apply_ordering(&mut views, &query.ordering);
    let rows = views.into_iter().map(|v| v.case).collect();

    Ok(Json(Page::from_rows(rows, query.page, query.page_size)))
}

pub async fn get_case(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Case>, ApiError> {
    let Path(id) = id?;
    Ok(Json(cases::get_case(&state.db, id).await?))
}

pub async fn create_case(
    State(state): State<AppState>,
    payload: Result<Json<CaseInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Case>), ApiError> {
    let Json(input) = payload?;
    let case = cases::create_case(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(case)))
}

/// PUT /api/cases/:id
///
/// Title and tag changes are recorded as edits for the next push.
pub async fn update_case(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CaseInput>, JsonRejection>,
) -> Result<Json<Case>, ApiError> {
    let Path(id) = id?;
    let Json(input) = payload?;
    Ok(Json(cases::update_case(&state.db, id, input).await?))
}

pub async fn patch_case(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CasePatch>, JsonRejection>,
) -> Result<Json<Case>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let current = cases::get_case(&state.db, id).await?;
    Ok(Json(cases::update_case(&state.db, id, patch.apply(current)).await?))
}

pub async fn delete_case(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    cases::delete_case(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct SyncTriggered {
    pub status: &'static str,
}

/// POST /api/cases/:id/trigger_sync/
///
/// Returns as soon as the pull is queued; the case does not need to exist
/// locally yet.
pub async fn trigger_sync(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<SyncTriggered>, ApiError> {
    let Path(id) = id?;
    state.tasks.enqueue(Task::PullCase(id))?;
    info!(case_id = id, "Case sync triggered");

    Ok(Json(SyncTriggered {
        status: "sync is triggered successfully",
    }))
}
