//! API token middleware
//!
//! Protected routes require `Authorization: Token <token>` when a token is
//! configured. No configured token disables the check.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

const SCHEME: &str = "Token ";

pub async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, ApiError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(SCHEME))
        .map(str::trim);

    if provided != Some(expected) {
        warn!(path = %request.uri().path(), "Rejected request with missing or invalid API token");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}
