use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::coordinates::CoordinateError;
use crate::services::kml::KmlError;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Transient failure talking to the remote statistics service
    /// (transport error, HTTP 5xx, HTTP 429). Safe to retry.
    #[error("External service error: {0}")]
    ExternalServiceError(String),

    /// The remote service understood the request and refused it.
    #[error("External service rejected request (HTTP {status}): {message}")]
    ExternalRejected { status: u16, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Coordinate error: {0}")]
    Coordinate(#[from] CoordinateError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("KML error: {0}")]
    Kml(#[from] KmlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ExternalServiceError(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Coordinate(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::ExternalServiceError(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::ExternalRejected { status, message } => (
                StatusCode::BAD_GATEWAY,
                format!("upstream HTTP {}: {}", status, message),
            ),
            AppError::ConfigError(msg) | AppError::InternalError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Csv(_) | AppError::Kml(_) | AppError::Io(_) => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}
