//! pdt-api library - REST API over the PDT store
//!
//! Every `/api` route except `trigger_sync` requires the API token when one
//! is configured; `/health` is always public.

use axum::Router;
use pdt_sync::TaskQueue;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod endpoints;
pub mod error;
pub mod pagination;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Queue drained by the sync worker
    pub tasks: TaskQueue,
    /// Required API token; `None` disables authentication
    pub api_token: Option<String>,
}

impl AppState {
    pub fn new(db: SqlitePool, tasks: TaskQueue, api_token: Option<String>) -> Self {
        Self { db, tasks, api_token }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    // Protected routes (require the API token)
    let protected = Router::new()
        .merge(api::instances::routes())
        .merge(api::ci_projects::routes())
        .merge(api::releases::routes())
        .merge(api::cases::routes())
        .merge(api::migrations::routes())
        .merge(api::reports::routes())
        .merge(api::step_reports::routes())
        .merge(api::deployments::routes())
        .layer(middleware::from_fn_with_state(state.clone(), api::auth_middleware));

    // Public routes
    let public = Router::new()
        .merge(api::cases::public_routes())
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
