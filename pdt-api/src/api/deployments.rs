//! Deployment report endpoints

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
use pdt_common::db::{DeploymentReport, DeploymentReportInput, DeploymentReportPatch};
use pdt_common::store::deployments;

use super::{filtered_page, resource_routes};
use crate::endpoints::DEPLOYMENT_REPORTS;
use crate::error::ApiError;
use crate::pagination::Page;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    resource_routes(
        "/api/deployment-reports",
        get(list_deployment_reports).post(create_deployment_report),
        get(get_deployment_report)
            .put(update_deployment_report)
            .patch(patch_deployment_report)
            .delete(delete_deployment_report),
    )
}

/// GET /api/deployment-reports/
pub async fn list_deployment_reports(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Page<DeploymentReport>>, ApiError> {
    let query = DEPLOYMENT_REPORTS.parse_query(raw)?;
    let rows = deployments::list_deployment_reports(&state.db).await?;
    Ok(Json(filtered_page(rows, &query, &DEPLOYMENT_REPORTS)?))
}

pub async fn get_deployment_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<DeploymentReport>, ApiError> {
    let Path(id) = id?;
    Ok(Json(deployments::get_deployment_report(&state.db, id).await?))
}

pub async fn create_deployment_report(
    State(state): State<AppState>,
    payload: Result<Json<DeploymentReportInput>, JsonRejection>,
) -> Result<(StatusCode, Json<DeploymentReport>), ApiError> {
    let Json(input) = payload?;
    let deployment_report = deployments::create_deployment_report(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(deployment_report)))
}

pub async fn update_deployment_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<DeploymentReportInput>, JsonRejection>,
) -> Result<Json<DeploymentReport>, ApiError> {
    let Path(id) = id?;
    let Json(input) = payload?;
    Ok(Json(deployments::update_deployment_report(&state.db, id, input).await?))
}

pub async fn patch_deployment_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<DeploymentReportPatch>, JsonRejection>,
) -> Result<Json<DeploymentReport>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let current = deployments::get_deployment_report(&state.db, id).await?;
    Ok(Json(deployments::update_deployment_report(&state.db, id, patch.apply(current)).await?))
}

pub async fn delete_deployment_report(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    deployments::delete_deployment_report(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
