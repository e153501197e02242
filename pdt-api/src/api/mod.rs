//! HTTP API handlers for pdt-api
//!
//! One module per entity. Collection routes answer on both `/api/<entity>`
//! and `/api/<entity>/`.

pub mod auth;
pub mod cases;
pub mod ci_projects;
pub mod deployments;
pub mod health;
pub mod instances;
pub mod migrations;
pub mod releases;
pub mod reports;
pub mod step_reports;

use axum::routing::MethodRouter;
use axum::Router;
use pdt_common::filter::{apply_ordering, direct_filter, Fields};

pub use auth::auth_middleware;
pub use health::health_routes;

use crate::endpoints::{EndpointConfig, ListQuery};
use crate::error::ApiError;
use crate::pagination::Page;
use crate::AppState;

/// Register `path` with and without a trailing slash
pub(crate) fn route_both(router: Router<AppState>, path: &str, method_router: MethodRouter<AppState>) -> Router<AppState> {
    router
        .route(path, method_router.clone())
        .route(&format!("{}/", path), method_router)
}

/// Collection and item routes of one entity
pub(crate) fn resource_routes(
    base: &str,
    collection: MethodRouter<AppState>,
    item: MethodRouter<AppState>,
) -> Router<AppState> {
    let router = route_both(Router::new(), base, collection);
    route_both(router, &format!("{}/:id", base), item)
}

/// Filter by plain field lookups, order and paginate
pub(crate) fn filtered_page<R: Fields>(
    rows: Vec<R>,
    query: &ListQuery,
    config: &EndpointConfig,
) -> Result<Page<R>, ApiError> {
    let expr = direct_filter(&query.filters, config.filters)?;
    let mut rows = expr.apply(rows);
    apply_ordering(&mut rows, &query.ordering);
    Ok(Page::from_rows(rows, query.page, query.page_size))
}
