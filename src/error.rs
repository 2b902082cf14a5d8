use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::storage::StorageError;
use crate::utils::{error_codes, error_to_api_response};

/// Errors surfaced by the to-do handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("todo {0} not found")]
    NotFound(String),
    #[error("todo {0} already exists")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("no image attached to todo {0}")]
    NoImage(String),
    #[error("image for todo {0} not found")]
    ImageMissing(String),
    #[error("failed to store image: {0}")]
    Upload(#[from] std::io::Error),
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => AppError::NotFound(id),
            StorageError::Conflict(id) => AppError::Conflict(id),
            other => AppError::Storage(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::NotFound(_) | AppError::NoImage(_) | AppError::ImageMissing(_) => {
                (StatusCode::NOT_FOUND, error_codes::NOT_FOUND)
            }
            AppError::Conflict(_) => (StatusCode::CONFLICT, error_codes::CONFLICT),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR),
            AppError::Upload(_) | AppError::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR)
            }
        };

        (status, error_to_api_response::<()>(code, self.to_string())).into_response()
    }
}

/// A request turned away by one of the admission gates. These are expected
/// under load and are answered directly at the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionRejected {
    #[error("too many connections. limit {limit}")]
    ConnectionLimit { limit: usize },
    #[error("Too many requests. Please try again later.")]
    RateLimit,
}

impl AdmissionRejected {
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionRejected::ConnectionLimit { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionRejected::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for AdmissionRejected {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
