//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use pagewright_types::error::{ProjectError, RepositoryError};

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
///
/// Every variant is raised before a build stream starts; failures after
/// that point travel as `error` events inside the stream.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Malformed request body or a turn the session cannot accept.
    #[error("{0}")]
    Validation(String),

    /// Missing credentials or configuration needed to run a build.
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Project(ProjectError::NotFound) => (StatusCode::NOT_FOUND, "PROJECT_NOT_FOUND"),
            AppError::Project(ProjectError::InvalidName(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::Project(ProjectError::StorageError(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
            }
            AppError::Repository(RepositoryError::NotFound) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Repository(RepositoryError::Conflict(_)) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Repository(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        }

        let mut body = serde_json::to_value(ApiResponse::failure(code, self.to_string()))
            .unwrap_or_else(|_| json!({"errors": [{"code": code}]}));
        body["data"] = serde_json::Value::Null;

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
