//! Migration report endpoints

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
use pdt_common::db::{MigrationReport, MigrationReportInput, MigrationReportPatch};
use pdt_common::store::reports;

use super::{filtered_page, resource_routes};
use crate::endpoints::MIGRATION_REPORTS;
use crate::error::ApiError;
use crate::pagination::Page;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    resource_routes(
        "/api/migration-reports",
        get(list_migration_reports).post(create_migration_report),
        get(get_migration_report)
            .put(update_migration_report)
            .patch(patch_migration_report)
            .delete(delete_migration_report),
    )
}

/// GET /api/migration-reports/
pub async fn list_migration_reports(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Page<MigrationReport>>, ApiError> {
    let query = MIGRATION_REPORTS.parse_query(raw)?;
    let rows = reports::list_migration_reports(&state.db).await?;
    Ok(Json(filtered_page(rows, &query, &MIGRATION_REPORTS)?))
}

pub async fn get_migration_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MigrationReport>, ApiError> {
    let Path(id) = id?;
    Ok(Json(reports::get_migration_report(&state.db, id).await?))
}

pub async fn create_migration_report(
    State(state): State<AppState>,
    payload: Result<Json<MigrationReportInput>, JsonRejection>,
) -> Result<(StatusCode, Json<MigrationReport>), ApiError> {
    let Json(input) = payload?;
    let migration_report = reports::create_migration_report(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(migration_report)))
}

pub async fn update_migration_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<MigrationReportInput>, JsonRejection>,
) -> Result<Json<MigrationReport>, ApiError> {
    let Path(id) = id?;
    let Json(input) = payload?;
    Ok(Json(reports::update_migration_report(&state.db, id, input).await?))
}

pub async fn patch_migration_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<MigrationReportPatch>, JsonRejection>,
) -> Result<Json<MigrationReport>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let current = reports::get_migration_report(&state.db, id).await?;
    Ok(Json(reports::update_migration_report(&state.db, id, patch.apply(current)).await?))
}

pub async fn delete_migration_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    reports::delete_migration_report(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
