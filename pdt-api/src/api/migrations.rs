//! Migration endpoints
//!
//! The migration list is never paginated and always comes back in
//! dependency order, whatever `order_by` says.

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
use pdt_common::db::{Migration, MigrationInput, MigrationPatch};
use pdt_common::filter::migration_filter;
use pdt_common::sort_migrations;
use pdt_common::store::migrations;
use tracing::debug;

use super::resource_routes;
use crate::endpoints::MIGRATIONS;
use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    resource_routes(
        "/api/migrations",
        get(list_migrations).post(create_migration),
        get(get_migration)
            .put(update_migration)
            .patch(patch_migration)
            .delete(delete_migration),
    )
}

/// GET /api/migrations/
pub async fn list_migrations(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Migration>>, ApiError> {
    let query = MIGRATIONS.parse_query(raw)?;
    let expr = migration_filter(&query.filters, MIGRATIONS.filters)?;

    let views = expr.apply(migrations::list_migration_views(&state.db).await?);
    let sorted = sort_migrations(views)?;
    debug!(count = sorted.len(), "Migrations sorted by dependency");

    Ok(Json(sorted.into_iter().map(|v| v.migration).collect()))
}

pub async fn get_migration(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Migration>, ApiError> {
    let Path(id) = id?;
    Ok(Json(migrations::get_migration(&state.db, id).await?))
}

pub async fn create_migration(
    State(state): State<AppState>,
    payload: Result<Json<MigrationInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Migration>), ApiError> {
    let Json(input) = payload?;
    let migration = migrations::create_migration(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(migration)))
}

/// PUT /api/migrations/:id
///
/// Omitting `steps` keeps the stored steps; sending them replaces all steps
/// and their step reports.
pub async fn update_migration(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<MigrationInput>, JsonRejection>,
) -> Result<Json<Migration>, ApiError> {
    let Path(id) = id?;
    let Json(input) = payload?;
    Ok(Json(migrations::update_migration(&state.db, id, input).await?))
}

pub async fn patch_migration(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<MigrationPatch>, JsonRejection>,
) -> Result<Json<Migration>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let current = migrations::get_migration(&state.db, id).await?;
    Ok(Json(migrations::update_migration(&state.db, id, patch.apply(current)).await?))
}

pub async fn delete_migration(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    migrations::delete_migration(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
