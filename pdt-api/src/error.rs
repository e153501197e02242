//! Error responses
//!
//! Every error is rendered as `{"error": {"code": ..., "message": ...}}`.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pdt_common::Error;
use pdt_sync::TaskError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] Error),

    #[error("Missing or invalid API token")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("Task queue unavailable: {0}")]
    Unavailable(#[from] TaskError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Store(Error::Validation(_)) | ApiError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            ApiError::Store(Error::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Store(Error::DependencyCycle(_)) => (StatusCode::CONFLICT, "DEPENDENCY_CYCLE"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_UNAVAILABLE"),
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            ApiError::Store(Error::Validation(msg)) | ApiError::Store(Error::NotFound(msg)) => msg.clone(),
            ApiError::Store(Error::DependencyCycle(ids)) => {
                error!(migrations = ?ids, "Migration dependencies form a cycle");
                self.to_string()
            }
            ApiError::Store(_) => {
                error!(error = %self, "Request failed");
                "Internal server error".to_string()
            }
            ApiError::Unavailable(_) => {
                error!(error = %self, "Request failed");
                self.to_string()
            }
            ApiError::Unauthorized | ApiError::BadRequest(_) => self.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
