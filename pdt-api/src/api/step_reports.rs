//! Migration step report endpoints

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
use pdt_common::db::{MigrationStepReport, MigrationStepReportInput, MigrationStepReportPatch};
use pdt_common::store::step_reports;

use super::{filtered_page, resource_routes};
use crate::endpoints::MIGRATION_STEP_REPORTS;
use crate::error::ApiError;
use crate::pagination::Page;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    resource_routes(
        "/api/migration-step-reports",
        get(list_step_reports).post(create_step_report),
        get(get_step_report)
            .put(update_step_report)
            .patch(patch_step_report)
            .delete(delete_step_report),
    )
}

/// GET /api/migration-step-reports/
pub async fn list_step_reports(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Page<MigrationStepReport>>, ApiError> {
    let query = MIGRATION_STEP_REPORTS.parse_query(raw)?;
    let rows = step_reports::list_step_reports(&state.db).await?;
    Ok(Json(filtered_page(rows, &query, &MIGRATION_STEP_REPORTS)?))
}

pub async fn get_step_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MigrationStepReport>, ApiError> {
    let Path(id) = id?;
    Ok(Json(step_reports::get_step_report(&state.db, id).await?))
}

pub async fn create_step_report(
    State(state): State<AppState>,
    payload: Result<Json<MigrationStepReportInput>, JsonRejection>,
) -> Result<(StatusCode, Json<MigrationStepReport>), ApiError> {
    let Json(input) = payload?;
    let step_report = step_reports::create_step_report(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(step_report)))
}

pub async fn update_step_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<MigrationStepReportInput>, JsonRejection>,
) -> Result<Json<MigrationStepReport>, ApiError> {
    let Path(id) = id?;
    let Json(input) = payload?;
    Ok(Json(step_reports::update_step_report(&state.db, id, input).await?))
}

pub async fn patch_step_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<MigrationStepReportPatch>, JsonRejection>,
) -> Result<Json<MigrationStepReport>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let current = step_reports::get_step_report(&state.db, id).await?;
    Ok(Json(step_reports::update_step_report(&state.db, id, patch.apply(current)).await?))
}

pub async fn delete_step_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    step_reports::delete_step_report(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
